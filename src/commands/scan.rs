use crate::commands::{launch, validation_rejected, HttpResponse, StreamFormat};
use crate::probe::types::{ProbeKind, ProbeState};
use crate::probe::validation::{validate_probe, validate_scan_command};
use crate::state::AppState;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use warp::Rejection;

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanBody {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub options: BTreeMap<String, JsonValue>,
}

// GET /scan?command=
pub async fn scan_raw(query: ScanQuery, state: AppState) -> Result<HttpResponse, Rejection> {
    let raw = query.command.unwrap_or_default();
    log::info!("HTTP: scan_raw called with: {}", raw);
    let lifecycle = ProbeState::Idle.advance(ProbeState::Validating);

    let scan = match validate_scan_command(&raw) {
        Ok(scan) => scan,
        Err(e) => return Ok(validation_rejected(lifecycle, Some(ProbeKind::Scan), e)),
    };

    let command = state.builder.build_scan_command(&scan);
    Ok(launch(&state, lifecycle, ProbeKind::Scan, command, StreamFormat::PlainText))
}

// POST /scan
pub async fn scan_structured(body: ScanBody, state: AppState) -> Result<HttpResponse, Rejection> {
    log::info!("HTTP: scan_structured called for target: {}", body.target);
    let lifecycle = ProbeState::Idle.advance(ProbeState::Validating);

    let options = option_values(body.options);
    let request = match validate_probe(ProbeKind::Scan, &body.target, options) {
        Ok(request) => request,
        Err(e) => return Ok(validation_rejected(lifecycle, Some(ProbeKind::Scan), e)),
    };

    let command = state.builder.build(&request);
    Ok(launch(&state, lifecycle, ProbeKind::Scan, command, StreamFormat::PlainText))
}

/// The scan form posts checkboxes as JSON booleans and counts as numbers;
/// the builder works on strings.
fn option_values(raw: BTreeMap<String, JsonValue>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                JsonValue::String(s) => s,
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Null => return None,
                other => {
                    log::debug!("Dropping non-scalar scan option {}: {}", key, other);
                    return None;
                }
            };
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_values_flattens_scalars() {
        let raw: BTreeMap<String, JsonValue> = serde_json::from_value(serde_json::json!({
            "sV": true,
            "pn": false,
            "topPorts": 100,
            "script": "http-title",
            "oX": null,
            "bogus": ["a"],
        }))
        .unwrap();

        let values = option_values(raw);

        assert_eq!(values.get("sV").map(String::as_str), Some("true"));
        assert_eq!(values.get("pn").map(String::as_str), Some("false"));
        assert_eq!(values.get("topPorts").map(String::as_str), Some("100"));
        assert_eq!(values.get("script").map(String::as_str), Some("http-title"));
        assert!(!values.contains_key("oX"));
        assert!(!values.contains_key("bogus"));
    }
}
