// src/logging/mod.rs
// Log setup and structured probe lifecycle events

use crate::error::{SpawnError, ValidationError};
use crate::probe::command::CommandLine;
use crate::probe::types::{ProbeKind, ProbeResult, ProbeState};
use crate::process::types::{KillReason, ProcessInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log target for the one-line JSON lifecycle events, so they can be
/// filtered separately (`RUST_LOG=probe_events=info`).
pub const EVENT_TARGET: &str = "probe_events";

const DEFAULT_FILTER: &str = "netprobe=info,probe_events=info,warp=info";

/// Install the global subscriber. `log` records are bridged into it, so
/// the `log::info!` calls across the crate land in the same output.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();

    if let Err(e) = result {
        log::debug!("Logging already initialized: {}", e);
    }
}

/// A single lifecycle event.
#[derive(Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProbeKind>,
    pub event_data: JsonValue,
    pub app_version: String,
    pub platform: String,
}

impl Event {
    fn new(event_type: &str, probe_id: Option<&str>, kind: Option<ProbeKind>, event_data: JsonValue) -> Self {
        Self {
            event_type: event_type.to_string(),
            probe_id: probe_id.map(str::to_string),
            kind,
            event_data,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

pub fn log_event(event: Event) {
    match serde_json::to_string(&event) {
        Ok(line) => log::info!(target: EVENT_TARGET, "{}", line),
        Err(e) => log::debug!("Failed to serialize {} event: {}", event.event_type, e),
    }
}

// ============================================================================
// Probe lifecycle
// ============================================================================

pub fn log_probe_started(id: &str, kind: ProbeKind, command: &CommandLine, pid: Option<u32>) {
    log_event(Event::new(
        "probe_started",
        Some(id),
        Some(kind),
        serde_json::json!({
            "program": command.program,
            "args": command.args,
            "removed_options": command.removed,
            "pid": pid,
        }),
    ));
}

pub fn log_probe_finished(id: &str, kind: ProbeKind, result: &ProbeResult, duration: Duration) {
    log_event(Event::new(
        "probe_finished",
        Some(id),
        Some(kind),
        serde_json::json!({
            "state": result.state().to_string(),
            "exit_code": result.exit_code,
            "killed_by_user": result.killed_by_user,
            "timed_out": result.timed_out,
            "duration_ms": duration.as_millis() as u64,
        }),
    ));
}

pub fn log_probe_cancelled(info: &ProcessInfo, reason: KillReason) {
    log_event(Event::new(
        "probe_cancelled",
        Some(&info.id),
        Some(info.kind),
        serde_json::json!({
            "reason": reason,
            "pid": info.pid,
            "running_for_ms": info.running_for_ms,
        }),
    ));
}

pub fn log_probe_expired(info: &ProcessInfo) {
    log_event(Event::new(
        "probe_expired",
        Some(&info.id),
        Some(info.kind),
        serde_json::json!({
            "pid": info.pid,
            "running_for_ms": info.running_for_ms,
        }),
    ));
}

// ============================================================================
// Failures before a process exists
// ============================================================================

pub fn log_spawn_failed(kind: ProbeKind, program: &str, error: &SpawnError) {
    log::error!("Failed to spawn {}: {}", program, error);
    log_event(Event::new(
        "spawn_failed",
        None,
        Some(kind),
        serde_json::json!({
            "program": program,
            "error_message": error.to_string(),
            "state": ProbeState::SpawnFailed.to_string(),
        }),
    ));
}

pub fn log_validation_rejected(kind: Option<ProbeKind>, error: &ValidationError) {
    log_event(Event::new(
        "validation_rejected",
        None,
        kind,
        serde_json::json!({
            "error_message": error.to_string(),
            "state": ProbeState::Rejected.to_string(),
        }),
    ));
}
