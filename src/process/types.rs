use crate::probe::types::{OutputChunk, ProbeKind, ProbeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::oneshot;

/// Why a probe was told to stop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    /// `DELETE /probe` from the caller.
    Cancelled,
    /// The HTTP response stream was dropped before the probe ended.
    ClientDisconnected,
    /// The lifetime sweep found the probe too old.
    Expired,
    /// The server is shutting down.
    Shutdown,
}

impl KillReason {
    pub fn is_user_initiated(&self) -> bool {
        matches!(self, KillReason::Cancelled | KillReason::ClientDisconnected)
    }
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::Cancelled => write!(f, "cancelled"),
            KillReason::ClientDisconnected => write!(f, "client_disconnected"),
            KillReason::Expired => write!(f, "expired"),
            KillReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// What the runner hands the transport, in order: any number of
/// `Output`, then exactly one `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Output(OutputChunk),
    Finished(ProbeResult),
}

/// Registry entry for one live probe process. The child itself stays with
/// the runner's supervisor task; this handle carries the pid and the
/// channel that tells the supervisor to terminate it.
#[derive(Debug)]
pub struct ProcessHandle {
    pub id: String,
    pub kind: ProbeKind,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    started: Instant,
    terminate_tx: oneshot::Sender<KillReason>,
}

impl ProcessHandle {
    pub fn new(
        id: String,
        kind: ProbeKind,
        pid: Option<u32>,
        terminate_tx: oneshot::Sender<KillReason>,
    ) -> Self {
        Self {
            id,
            kind,
            pid,
            started_at: Utc::now(),
            started: Instant::now(),
            terminate_tx,
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Ask the supervisor to signal the process. Returns false if the
    /// supervisor is already gone (the process exited on its own).
    pub fn terminate(self, reason: KillReason) -> bool {
        self.terminate_tx.send(reason).is_ok()
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            id: self.id.clone(),
            kind: self.kind,
            pid: self.pid,
            started_at: self.started_at,
            running_for_ms: self.age().as_millis() as u64,
        }
    }
}

/// Serializable snapshot of a registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub id: String,
    pub kind: ProbeKind,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub running_for_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_delivers_reason() {
        let (tx, mut rx) = oneshot::channel();
        let handle = ProcessHandle::new("abc".to_string(), ProbeKind::Ping, Some(42), tx);

        assert!(handle.terminate(KillReason::Cancelled));
        assert_eq!(rx.try_recv().unwrap(), KillReason::Cancelled);
    }

    #[test]
    fn test_terminate_reports_gone_supervisor() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let handle = ProcessHandle::new("abc".to_string(), ProbeKind::Scan, None, tx);

        assert!(!handle.terminate(KillReason::Expired));
    }

    #[test]
    fn test_info_snapshot_serializes_camel_case() {
        let (tx, _rx) = oneshot::channel();
        let handle = ProcessHandle::new("abc".to_string(), ProbeKind::Traceroute, Some(7), tx);
        let json = serde_json::to_value(handle.info()).unwrap();

        assert_eq!(json["id"], "abc");
        assert_eq!(json["kind"], "traceroute");
        assert_eq!(json["pid"], 7);
        assert!(json.get("startedAt").is_some());
        assert!(json.get("runningForMs").is_some());
    }

    #[test]
    fn test_only_user_kills_count_as_user_initiated() {
        assert!(KillReason::Cancelled.is_user_initiated());
        assert!(KillReason::ClientDisconnected.is_user_initiated());
        assert!(!KillReason::Expired.is_user_initiated());
        assert!(!KillReason::Shutdown.is_user_initiated());
    }
}
