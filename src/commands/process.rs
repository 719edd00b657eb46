use crate::commands::{launch, probe_error_response, validation_rejected, HttpResponse, StreamFormat};
use crate::error::ProbeError;
use crate::logging;
use crate::probe::types::{ProbeKind, ProbeState};
use crate::probe::validation::validate_network_request;
use crate::process::types::KillReason;
use crate::state::AppState;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use warp::{Rejection, Reply};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProbeBody {
    pub command: Option<String>,
    pub ip: Option<String>,
    pub custom_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopProbeBody {
    // Anything other than a string id is just an unknown id.
    pub process_id: Option<JsonValue>,
}

// POST /probe
pub async fn start_probe(body: StartProbeBody, state: AppState) -> Result<HttpResponse, Rejection> {
    log::info!("HTTP: start_probe called for command: {:?}", body.command);
    let lifecycle = ProbeState::Idle.advance(ProbeState::Validating);

    let request = match validate_network_request(
        body.command.as_deref(),
        body.ip.as_deref(),
        body.custom_endpoint.as_deref(),
    ) {
        Ok(request) => request,
        Err(e) => {
            let kind = body.command.as_deref().and_then(ProbeKind::parse);
            return Ok(validation_rejected(lifecycle, kind, e));
        }
    };

    let command = state.builder.build(&request);
    Ok(launch(&state, lifecycle, request.kind(), command, StreamFormat::EventStream))
}

// DELETE /probe
pub async fn stop_probe(body: StopProbeBody, state: AppState) -> Result<HttpResponse, Rejection> {
    let id = body
        .process_id
        .as_ref()
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    log::info!("HTTP: stop_probe called for process: {}", id);

    match state.registry.kill_and_remove(&id, KillReason::Cancelled) {
        Ok(info) => {
            logging::log_probe_cancelled(&info, KillReason::Cancelled);
            Ok(warp::reply::json(&serde_json::json!({ "success": true })).into_response())
        }
        Err(e) => {
            log::debug!("Cancel for {} ignored: {}", id, e);
            Ok(probe_error_response(&ProbeError::CancellationNotFound(id)))
        }
    }
}

// GET /probes
pub async fn list_probes(state: AppState) -> Result<HttpResponse, Rejection> {
    let probes = state.registry.list();
    log::debug!("HTTP: list_probes returning {} entries", probes.len());
    Ok(warp::reply::json(&probes).into_response())
}
