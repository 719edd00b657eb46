// src/server.rs
use crate::commands::{self, error_response, HttpResponse};
use crate::state::AppState;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Request bodies are a handful of short strings.
const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let start_probe = warp::path!("probe")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(commands::start_probe);

    let stop_probe = warp::path!("probe")
        .and(warp::delete())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(commands::stop_probe);

    let scan_raw = warp::path!("scan")
        .and(warp::get())
        .and(warp::query())
        .and(with_state(state.clone()))
        .and_then(commands::scan_raw);

    let scan_structured = warp::path!("scan")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(commands::scan_structured);

    let list_probes = warp::path!("probes")
        .and(warp::get())
        .and(with_state(state))
        .and_then(commands::list_probes);

    start_probe
        .or(stop_probe)
        .or(scan_raw)
        .or(scan_structured)
        .or(list_probes)
        .recover(handle_rejection)
        .with(warp::log("netprobe::http"))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

async fn handle_rejection(err: Rejection) -> Result<HttpResponse, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(error_response(status, &message))
}
