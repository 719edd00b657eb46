// src/transport/mod.rs
// Turns a running probe's events into the HTTP response body stream

use crate::logging;
use crate::probe::types::{OutputChunk, ProbeKind, StreamSource};
use crate::process::registry::ProcessRegistry;
use crate::process::runner::RunningProbe;
use crate::process::types::{KillReason, ProbeEvent};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::mpsc;

const STDERR_LABEL: &[u8] = b"Error: ";

/// Kills the probe if the body is dropped before the probe finished.
struct DisconnectGuard {
    id: String,
    registry: ProcessRegistry,
    armed: bool,
}

impl DisconnectGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match self.registry.kill_and_remove(&self.id, KillReason::ClientDisconnected) {
            Ok(info) => {
                log::info!("Client went away, stopping probe {}", self.id);
                logging::log_probe_cancelled(&info, KillReason::ClientDisconnected);
            }
            Err(_) => log::debug!("Client went away after probe {} ended", self.id),
        }
    }
}

struct BodyState {
    kind: ProbeKind,
    events: mpsc::Receiver<ProbeEvent>,
    notice: Option<&'static str>,
    guard: DisconnectGuard,
    done: bool,
}

/// Body stream for one probe: the optional notice, every output chunk in
/// arrival order, then the exit line when there is one.
///
/// Pulling happens only as fast as the HTTP layer writes, so a slow client
/// backs up into the bounded event channel and then the process pipes.
pub fn probe_body(
    probe: RunningProbe,
    registry: ProcessRegistry,
    notice: Option<&'static str>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let state = BodyState {
        kind: probe.kind,
        events: probe.events,
        notice,
        guard: DisconnectGuard {
            id: probe.id,
            registry,
            armed: true,
        },
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        if let Some(notice) = state.notice.take() {
            return Some((Ok::<_, Infallible>(Bytes::from_static(notice.as_bytes())), state));
        }

        match state.events.recv().await {
            Some(ProbeEvent::Output(chunk)) => {
                let bytes = render_chunk(state.kind, chunk);
                Some((Ok(bytes), state))
            }
            Some(ProbeEvent::Finished(result)) => {
                state.guard.disarm();
                state.done = true;
                result
                    .exit_line(state.kind)
                    .map(|line| (Ok(Bytes::from(line)), state))
            }
            None => {
                // Runner dropped without a result; nothing left to kill.
                log::warn!("Probe {} event channel closed early", state.guard.id);
                state.guard.disarm();
                None
            }
        }
    })
}

/// Single-chunk body for failures that happen after the response was
/// committed to streaming, such as a missing executable.
pub fn failure_body(message: String) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::once(async move { Ok(Bytes::from(message)) })
}

/// Ping and traceroute label stderr so it reads as an error in the
/// combined text; scan output is passed through untouched.
fn render_chunk(kind: ProbeKind, chunk: OutputChunk) -> Bytes {
    match (kind, chunk.source) {
        (ProbeKind::Ping | ProbeKind::Traceroute, StreamSource::Stderr) => {
            let mut labelled = BytesMut::with_capacity(STDERR_LABEL.len() + chunk.payload.len());
            labelled.put_slice(STDERR_LABEL);
            labelled.put_slice(&chunk.payload);
            labelled.freeze()
        }
        _ => chunk.payload,
    }
}
