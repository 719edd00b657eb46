// src/probe/mod.rs

pub mod command;
pub mod types;
pub mod validation;

pub use command::{CommandBuilder, CommandLine};
pub use types::{OutputChunk, ProbeKind, ProbeRequest, ProbeResult, ProbeState, ScanCommand, StreamSource};
pub use validation::{validate_network_request, validate_probe, validate_scan_command};
