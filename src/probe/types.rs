use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which diagnostic program a probe runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Traceroute,
    Scan,
}

impl ProbeKind {
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "ping" => Some(ProbeKind::Ping),
            "traceroute" => Some(ProbeKind::Traceroute),
            "scan" | "nmap" => Some(ProbeKind::Scan),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Ping => write!(f, "ping"),
            ProbeKind::Traceroute => write!(f, "traceroute"),
            ProbeKind::Scan => write!(f, "scan"),
        }
    }
}

/// A validated probe. Only the validator constructs these, so holding one
/// means the target already passed the IPv4/domain checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    kind: ProbeKind,
    target: String,
    options: BTreeMap<String, String>,
}

impl ProbeRequest {
    pub(super) fn new(kind: ProbeKind, target: String, options: BTreeMap<String, String>) -> Self {
        Self {
            kind,
            target,
            options,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A raw scan invocation that passed the metacharacter, privileged-flag and
/// file-option checks, already split into an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    program: String,
    args: Vec<String>,
}

impl ScanCommand {
    pub(super) fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One block of bytes read from a probe's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: StreamSource,
    pub payload: Bytes,
    /// Monotonic per process, across both streams.
    pub sequence: u64,
}

/// How a probe process ended. Produced exactly once per spawned process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub exit_code: Option<i32>,
    pub killed_by_user: bool,
    pub timed_out: bool,
}

impl ProbeResult {
    pub fn exited(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            killed_by_user: false,
            timed_out: false,
        }
    }

    pub fn state(&self) -> ProbeState {
        if self.killed_by_user {
            ProbeState::Killed
        } else if self.timed_out {
            ProbeState::DeadlineExceeded
        } else {
            ProbeState::Completed
        }
    }

    /// The trailing diagnostic line appended to the stream, if any.
    pub fn exit_line(&self, kind: ProbeKind) -> Option<String> {
        if self.killed_by_user || self.timed_out {
            return None;
        }

        let code = self.exit_code?;
        if code == 0 {
            return None;
        }

        // Continuous ping only ever stops on a signal; wrappers report that as 128+N.
        if kind == ProbeKind::Ping && code > 128 {
            return None;
        }

        Some(format!("\nProcess exited with code {}\n", code))
    }
}

/// Per-request lifecycle. The last five states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Validating,
    Spawning,
    Streaming,
    Rejected,
    SpawnFailed,
    Completed,
    Killed,
    DeadlineExceeded,
}

impl ProbeState {
    /// Legal edges: Idle -> Validating -> Rejected | Spawning,
    /// Spawning -> SpawnFailed | Streaming, Streaming -> Completed | Killed | DeadlineExceeded.
    pub fn can_transition_to(self, next: ProbeState) -> bool {
        use ProbeState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Spawning)
                | (Spawning, SpawnFailed)
                | (Spawning, Streaming)
                | (Streaming, Completed)
                | (Streaming, Killed)
                | (Streaming, DeadlineExceeded)
        )
    }

    /// Move to `next`. An illegal edge is logged and leaves the state unchanged.
    #[must_use]
    pub fn advance(self, next: ProbeState) -> ProbeState {
        if self.can_transition_to(next) {
            log::debug!("Request state {} -> {}", self, next);
            next
        } else {
            log::warn!("Ignoring request state change {} -> {}", self, next);
            self
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProbeState::Rejected
                | ProbeState::SpawnFailed
                | ProbeState::Completed
                | ProbeState::Killed
                | ProbeState::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeState::Idle => write!(f, "idle"),
            ProbeState::Validating => write!(f, "validating"),
            ProbeState::Spawning => write!(f, "spawning"),
            ProbeState::Streaming => write!(f, "streaming"),
            ProbeState::Rejected => write!(f, "rejected"),
            ProbeState::SpawnFailed => write!(f, "spawn_failed"),
            ProbeState::Completed => write!(f, "completed"),
            ProbeState::Killed => write!(f, "killed"),
            ProbeState::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}
