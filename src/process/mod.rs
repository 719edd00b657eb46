// src/process/mod.rs

pub mod registry;
pub mod runner;
pub mod types;

pub use registry::ProcessRegistry;
pub use runner::{ProcessRunner, RunnerSettings, RunningProbe};
pub use types::{KillReason, ProbeEvent, ProcessHandle, ProcessInfo};
