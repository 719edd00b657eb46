// src/process/runner.rs
use crate::config::ServerConfig;
use crate::error::SpawnError;
use crate::logging;
use crate::probe::command::CommandLine;
use crate::probe::types::{OutputChunk, ProbeKind, ProbeResult, StreamSource};
use crate::process::registry::ProcessRegistry;
use crate::process::types::{KillReason, ProbeEvent, ProcessHandle};
use bytes::Bytes;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// Upper bound on waiting for the pipe readers after the process is gone.
/// Covers a stalled client holding back the last buffered chunks.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub traceroute_deadline: Duration,
    pub kill_grace: Duration,
    pub channel_capacity: usize,
    pub read_buffer_size: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            traceroute_deadline: config.traceroute_deadline(),
            kill_grace: config.kill_grace(),
            channel_capacity: config.channel_capacity.max(1),
            read_buffer_size: config.read_buffer_size.max(1),
        }
    }

    /// Only traceroute carries an intrinsic deadline; ping and scan run
    /// until they exit, are cancelled, or are swept.
    pub fn deadline_for(&self, kind: ProbeKind) -> Option<Duration> {
        match kind {
            ProbeKind::Traceroute => Some(self.traceroute_deadline),
            ProbeKind::Ping | ProbeKind::Scan => None,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// A spawned, registered probe. `events` yields its output in order and
/// ends with exactly one `ProbeEvent::Finished`.
#[derive(Debug)]
pub struct RunningProbe {
    pub id: String,
    pub kind: ProbeKind,
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<ProbeEvent>,
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    registry: ProcessRegistry,
    settings: RunnerSettings,
}

impl ProcessRunner {
    pub fn new(registry: ProcessRegistry, settings: RunnerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Spawn `command` as a discrete argument vector, register it, and start
    /// the pipe readers and the supervisor. The registry entry exists before
    /// this returns, so a cancel that races the response still finds it.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn spawn(&self, kind: ProbeKind, command: &CommandLine) -> Result<RunningProbe, SpawnError> {
        let id = Uuid::new_v4().to_string();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let err = SpawnError::from_io(&command.program, e);
            logging::log_spawn_failed(kind, &command.program, &err);
            err
        })?;

        let pid = child.id();
        log::info!("Probe {} spawned {} with PID: {:?}", id, command.program, pid);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (events_tx, events_rx) = mpsc::channel(self.settings.channel_capacity);
        let (terminate_tx, terminate_rx) = oneshot::channel();

        if let Err(e) = self
            .registry
            .insert(ProcessHandle::new(id.clone(), kind, pid, terminate_tx))
        {
            let _ = child.start_kill();
            return Err(SpawnError::Io {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()),
            });
        }

        let sequence = Arc::new(AtomicU64::new(0));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(pump_output(
                stdout,
                StreamSource::Stdout,
                events_tx.clone(),
                sequence.clone(),
                self.settings.read_buffer_size,
            )));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(pump_output(
                stderr,
                StreamSource::Stderr,
                events_tx.clone(),
                sequence,
                self.settings.read_buffer_size,
            )));
        }

        logging::log_probe_started(&id, kind, command, pid);

        tokio::spawn(supervise(Supervision {
            id: id.clone(),
            kind,
            child,
            terminate_rx,
            readers,
            events: events_tx,
            registry: self.registry.clone(),
            deadline: self.settings.deadline_for(kind),
            grace: self.settings.kill_grace,
        }));

        Ok(RunningProbe {
            id,
            kind,
            pid,
            events: events_rx,
        })
    }
}

/// Forward one pipe into the event channel, one chunk per read. The bounded
/// channel makes a slow consumer stall the read, which in turn stalls the
/// child on a full pipe instead of growing a buffer here.
async fn pump_output<R>(
    mut reader: R,
    source: StreamSource,
    events: mpsc::Sender<ProbeEvent>,
    sequence: Arc<AtomicU64>,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    source,
                    payload: Bytes::copy_from_slice(&buffer[..n]),
                    sequence: sequence.fetch_add(1, Ordering::SeqCst),
                };
                if events.send(ProbeEvent::Output(chunk)).await.is_err() {
                    log::debug!("{:?} consumer went away, stopping reader", source);
                    break;
                }
            }
            Err(e) => {
                log::error!("Failed to read probe {:?}: {}", source, e);
                break;
            }
        }
    }
}

struct Supervision {
    id: String,
    kind: ProbeKind,
    child: Child,
    terminate_rx: oneshot::Receiver<KillReason>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::Sender<ProbeEvent>,
    registry: ProcessRegistry,
    deadline: Option<Duration>,
    grace: Duration,
}

enum Stop {
    Exited(std::io::Result<ExitStatus>),
    Killed(KillReason),
    DeadlineExceeded,
}

async fn supervise(mut s: Supervision) {
    let started = Instant::now();

    let limit = s.deadline;
    let deadline = async move {
        match limit {
            Some(limit) => sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let stop = tokio::select! {
        status = s.child.wait() => Stop::Exited(status),
        Ok(reason) = &mut s.terminate_rx => Stop::Killed(reason),
        _ = deadline => Stop::DeadlineExceeded,
    };
    // Late cancels must see a closed channel and report NotFound.
    drop(s.terminate_rx);

    let result = match stop {
        Stop::Exited(Ok(status)) => ProbeResult::exited(status.code()),
        Stop::Exited(Err(e)) => {
            log::error!("Error waiting for probe {}: {}", s.id, e);
            ProbeResult::exited(None)
        }
        Stop::Killed(reason) => {
            let status = terminate(&mut s.child, s.grace).await;
            ProbeResult {
                exit_code: status.and_then(|st| st.code()),
                // Shutdown closes the stream the same way a cancel does.
                killed_by_user: reason.is_user_initiated() || reason == KillReason::Shutdown,
                timed_out: reason == KillReason::Expired,
            }
        }
        Stop::DeadlineExceeded => {
            log::info!(
                "Probe {} ({}) hit its {:?} deadline, terminating",
                s.id,
                s.kind,
                limit.unwrap_or_default()
            );
            s.registry.remove(&s.id);
            let status = terminate(&mut s.child, s.grace).await;
            ProbeResult {
                exit_code: status.and_then(|st| st.code()),
                killed_by_user: false,
                timed_out: true,
            }
        }
    };

    s.registry.remove(&s.id);

    for mut reader in s.readers {
        if timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            log::warn!("Probe {} output reader did not drain in time, aborting", s.id);
            reader.abort();
        }
    }

    logging::log_probe_finished(&s.id, s.kind, &result, started.elapsed());

    if s.events.send(ProbeEvent::Finished(result)).await.is_err() {
        log::debug!("Probe {} finished after its consumer went away", s.id);
    }
}

/// SIGTERM, then SIGKILL if the process is still around after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    send_term_signal(child);

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            log::error!("Error waiting for terminated probe: {}", e);
            None
        }
        Err(_) => {
            log::warn!("Probe PID {:?} ignored SIGTERM for {:?}, killing", child.id(), grace);
            if let Err(e) = child.kill().await {
                log::error!("Failed to kill probe: {}", e);
            }
            child.try_wait().ok().flatten()
        }
    }
}

#[cfg(unix)]
fn send_term_signal(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the child was already reaped.
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::warn!("SIGTERM to {} failed ({}), falling back to kill", pid, e);
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_term_signal(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::warn!("Failed to stop probe process: {}", e);
    }
}
