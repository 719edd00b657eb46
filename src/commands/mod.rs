// src/commands/mod.rs
// HTTP handlers and the response helpers they share

pub mod process;
pub mod scan;

pub use process::{list_probes, start_probe, stop_probe};
pub use scan::{scan_raw, scan_structured};

use crate::error::{ProbeError, ValidationError};
use crate::logging;
use crate::probe::command::CommandLine;
use crate::probe::types::{ProbeKind, ProbeState};
use crate::state::AppState;
use crate::transport;
use warp::http::header::{self, HeaderName, HeaderValue};
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::Reply;

pub type HttpResponse = warp::reply::Response;

pub const PROCESS_ID_HEADER: &str = "x-process-id";

/// Body framing of a streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Ping and traceroute; the dashboard reads it with an event-stream reader.
    EventStream,
    /// Scans; chunked plain text.
    PlainText,
}

pub fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message })),
        status,
    )
    .into_response()
}

pub fn probe_error_response(error: &ProbeError) -> HttpResponse {
    let status = match error {
        ProbeError::Validation(_) | ProbeError::CancellationNotFound(_) => StatusCode::BAD_REQUEST,
        ProbeError::TooManyProbes => StatusCode::SERVICE_UNAVAILABLE,
        // Spawn failures are normally streamed; this only covers callers
        // that have no stream to write into.
        ProbeError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &error.to_string())
}

pub(crate) fn validation_rejected(
    lifecycle: ProbeState,
    kind: Option<ProbeKind>,
    error: ValidationError,
) -> HttpResponse {
    let _ = lifecycle.advance(ProbeState::Rejected);
    log::warn!("Rejected {} request: {}", kind.map(|k| k.to_string()).unwrap_or_default(), error);
    logging::log_validation_rejected(kind, &error);
    probe_error_response(&ProbeError::Validation(error))
}

/// Admission, spawn and streaming for a command whose request is still in
/// `lifecycle` (normally `Validating`).
pub(crate) fn launch(
    state: &AppState,
    lifecycle: ProbeState,
    kind: ProbeKind,
    command: CommandLine,
    format: StreamFormat,
) -> HttpResponse {
    if state.at_capacity() {
        let _ = lifecycle.advance(ProbeState::Rejected);
        log::warn!(
            "Refusing {} probe: {} already active",
            kind,
            state.registry.len()
        );
        return probe_error_response(&ProbeError::TooManyProbes);
    }

    let notice = command.notice();
    let lifecycle = lifecycle.advance(ProbeState::Spawning);

    match state.runner.spawn(kind, &command) {
        Ok(probe) => {
            let _ = lifecycle.advance(ProbeState::Streaming);
            let id = probe.id.clone();
            let body = Body::wrap_stream(transport::probe_body(probe, state.registry.clone(), notice));
            stream_response(format, body, Some(&id))
        }
        Err(e) => {
            let _ = lifecycle.advance(ProbeState::SpawnFailed);
            let message = format!("Error starting process: {}\n", e);
            stream_response(format, Body::wrap_stream(transport::failure_body(message)), None)
        }
    }
}

fn stream_response(format: StreamFormat, body: Body, process_id: Option<&str>) -> HttpResponse {
    let mut response = HttpResponse::new(body);
    let headers = response.headers_mut();

    match format {
        StreamFormat::EventStream => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        StreamFormat::PlainText => {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if let Some(id) = process_id {
        match HeaderValue::from_str(id) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(PROCESS_ID_HEADER), value);
            }
            Err(e) => log::error!("Process id {} is not a valid header value: {}", id, e),
        }
    }

    response
}
