use netprobe::server::routes;
use netprobe::{AppState, ServerConfig};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_test::assert_ok;
use warp::http::StatusCode;

const MISSING_PROGRAM: &str = "netprobe-test-no-such-binary";

fn state_with(configure: impl FnOnce(&mut ServerConfig)) -> AppState {
    let mut config = ServerConfig {
        ping_program: MISSING_PROGRAM.to_string(),
        traceroute_program: MISSING_PROGRAM.to_string(),
        scan_program: MISSING_PROGRAM.to_string(),
        kill_grace_millis: 500,
        ..ServerConfig::default()
    };
    configure(&mut config);
    AppState::new(config)
}

fn error_of(body: &[u8]) -> String {
    let value: Value = assert_ok!(serde_json::from_slice(body));
    value["error"].as_str().unwrap_or_default().to_string()
}

async fn post_probe(state: &AppState, body: Value) -> warp::http::Response<bytes::Bytes> {
    warp::test::request()
        .method("POST")
        .path("/probe")
        .json(&body)
        .reply(&routes(state.clone()))
        .await
}

#[tokio::test]
async fn test_probe_request_validation_messages() {
    let state = state_with(|_| {});
    let cases = [
        (json!({}), "Missing required parameters"),
        (json!({ "command": "ping" }), "Missing IP address"),
        (json!({ "command": "traceroute" }), "Missing endpoint for traceroute"),
        (json!({ "command": "ping", "ip": "999.1.1.1" }), "Invalid IP address format"),
        (
            json!({ "command": "traceroute", "customEndpoint": "bad_domain!" }),
            "Invalid domain format",
        ),
        (json!({ "command": "dig", "ip": "1.1.1.1" }), "Invalid command"),
    ];

    for (body, message) in cases {
        let response = post_probe(&state, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(error_of(response.body()), message, "body: {}", body);
    }
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_missing_executable_streams_one_error_chunk() {
    let state = state_with(|_| {});
    let response = post_probe(&state, json!({ "command": "ping", "ip": "1.1.1.1" })).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-process-id").is_none());
    let body = String::from_utf8_lossy(response.body());
    assert!(body.starts_with("Error starting process:"), "body: {}", body);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_id_is_bad_request() {
    let state = state_with(|_| {});
    let api = routes(state.clone());

    for body in [json!({ "processId": "nope" }), json!({}), json!({ "processId": 42 })] {
        let response = warp::test::request()
            .method("DELETE")
            .path("/probe")
            .json(&body)
            .reply(&api)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_of(response.body()), "Invalid process ID");
    }
}

#[tokio::test]
async fn test_raw_scan_rejections() {
    let state = state_with(|_| {});
    let api = routes(state.clone());
    let cases = [
        ("/scan", "Command is required"),
        ("/scan?command=ping%201.1.1.1", "Only nmap commands are allowed"),
        (
            "/scan?command=nmap%20example.com%3B%20rm%20-rf%20%2F",
            "Command contains forbidden characters",
        ),
        (
            "/scan?command=nmap%20-sS%20example.com",
            "The command contains privileged option \"-sS\" which is not allowed",
        ),
        (
            "/scan?command=nmap%20-sSU%20example.com",
            "The command contains privileged option \"-sSU\" which is not allowed",
        ),
    ];

    for (path, message) in cases {
        let response = warp::test::request().method("GET").path(path).reply(&api).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "path: {}", path);
        assert_eq!(error_of(response.body()), message, "path: {}", path);
    }
}

#[tokio::test]
async fn test_structured_scan_rejects_bad_option_values() {
    let state = state_with(|_| {});
    let response = warp::test::request()
        .method("POST")
        .path("/scan")
        .json(&json!({ "target": "example.com", "options": { "topPorts": "lots" } }))
        .reply(&routes(state))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(response.body()).contains("topPorts"));
}

#[tokio::test]
async fn test_unknown_route_and_malformed_body() {
    let state = state_with(|_| {});
    let api = routes(state);

    let response = warp::test::request().method("GET").path("/nowhere").reply(&api).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = warp::test::request()
        .method("POST")
        .path("/probe")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_probe_list() {
    let state = state_with(|_| {});
    let response = warp::test::request()
        .method("GET")
        .path("/probes")
        .reply(&routes(state))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let list: Value = assert_ok!(serde_json::from_slice(response.body()));
    assert_eq!(list, json!([]));
}

#[cfg(unix)]
mod with_processes {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    /// Writes an executable stand-in for ping/traceroute/nmap.
    fn fake_program(dir: &TempDir, name: &str, script: &str) -> String {
        let path: PathBuf = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn wait_for_registration(state: &AppState) -> String {
        timeout(Duration::from_secs(10), async {
            loop {
                if let Some(info) = state.registry.list().first() {
                    return info.id.clone();
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("probe never registered")
    }

    #[tokio::test]
    async fn test_ping_streams_output_with_headers() {
        let dir = TempDir::new().unwrap();
        let ping = fake_program(&dir, "ping", "echo \"reply from $1\"; echo 'lost one' >&2");
        let state = state_with(|c| c.ping_program = ping);

        let response = post_probe(&state, json!({ "command": "ping", "ip": "1.1.1.1" })).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert!(response.headers().get("x-process-id").is_some());

        let body = String::from_utf8_lossy(response.body());
        assert!(body.contains("reply from 1.1.1.1\n"), "body: {}", body);
        assert!(body.contains("Error: lost one\n"), "body: {}", body);
        assert!(!body.contains("Process exited"));
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_appends_trailer() {
        let dir = TempDir::new().unwrap();
        let traceroute = fake_program(&dir, "traceroute", "echo \"hop 1\"; exit 2");
        let state = state_with(|c| c.traceroute_program = traceroute);

        let response = post_probe(
            &state,
            json!({ "command": "traceroute", "customEndpoint": "example.com" }),
        )
        .await;

        assert_eq!(
            String::from_utf8_lossy(response.body()),
            "hop 1\n\nProcess exited with code 2\n"
        );
    }

    #[tokio::test]
    async fn test_traceroute_deadline_ends_stream_quietly() {
        let dir = TempDir::new().unwrap();
        let traceroute = fake_program(&dir, "traceroute", "echo started; exec sleep 30");
        let state = state_with(|c| {
            c.traceroute_program = traceroute;
            c.traceroute_deadline_secs = 1;
        });

        let response = timeout(
            Duration::from_secs(10),
            post_probe(&state, json!({ "command": "traceroute", "ip": "1.1.1.1" })),
        )
        .await
        .expect("deadline did not end the stream");

        assert_eq!(String::from_utf8_lossy(response.body()), "started\n");
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_raw_scan_keeps_argument_vector() {
        let dir = TempDir::new().unwrap();
        let nmap = fake_program(&dir, "nmap", "for arg in \"$@\"; do echo \"[$arg]\"; done");
        let state = state_with(|c| c.scan_program = nmap);

        let response = warp::test::request()
            .method("GET")
            .path("/scan?command=nmap%20-sT%20--script%20%22http-title%2Cbanner%22%20example.com")
            .reply(&routes(state.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
        assert!(response.headers().get("x-process-id").is_some());
        assert_eq!(
            String::from_utf8_lossy(response.body()),
            "[-sT]\n[--script]\n[http-title,banner]\n[example.com]\n"
        );
    }

    #[tokio::test]
    async fn test_structured_custom_scan_strips_privileged_flags() {
        let dir = TempDir::new().unwrap();
        let nmap = fake_program(&dir, "nmap", "echo \"$@\"");
        let state = state_with(|c| c.scan_program = nmap);

        let response = warp::test::request()
            .method("POST")
            .path("/scan")
            .json(&json!({
                "target": "example.com",
                "options": { "customCommand": "-sS -sT -p 22" }
            }))
            .reply(&routes(state))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            String::from_utf8_lossy(response.body()),
            "Note: Some privileged options were removed from your command.\n\n\
             --stats-every=0.5s -sT -p 22 example.com\n"
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_running_probe() {
        let dir = TempDir::new().unwrap();
        let ping = fake_program(&dir, "ping", "echo \"pinging $1\"; exec sleep 30");
        let state = state_with(|c| c.ping_program = ping);
        let api = routes(state.clone());

        let streaming = {
            let api = api.clone();
            tokio::spawn(async move {
                warp::test::request()
                    .method("POST")
                    .path("/probe")
                    .json(&json!({ "command": "ping", "ip": "1.1.1.1" }))
                    .reply(&api)
                    .await
            })
        };

        let id = wait_for_registration(&state).await;

        let listed = warp::test::request().method("GET").path("/probes").reply(&api).await;
        let listed: Value = assert_ok!(serde_json::from_slice(listed.body()));
        assert_eq!(listed[0]["id"], id.as_str());
        assert_eq!(listed[0]["kind"], "ping");

        let cancelled = warp::test::request()
            .method("DELETE")
            .path("/probe")
            .json(&json!({ "processId": id }))
            .reply(&api)
            .await;
        assert_eq!(cancelled.status(), StatusCode::OK);
        let cancelled: Value = assert_ok!(serde_json::from_slice(cancelled.body()));
        assert_eq!(cancelled, json!({ "success": true }));

        let response = timeout(Duration::from_secs(10), streaming)
            .await
            .expect("cancel did not end the stream")
            .unwrap();
        assert_eq!(response.headers()["x-process-id"], id.as_str());
        assert!(!String::from_utf8_lossy(response.body()).contains("Process exited"));
        assert!(state.registry.is_empty());

        // Second cancel of the same id is NotFound.
        let again = warp::test::request()
            .method("DELETE")
            .path("/probe")
            .json(&json!({ "processId": id }))
            .reply(&api)
            .await;
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;
        use tokio::sync::oneshot;

        let dir = TempDir::new().unwrap();
        let ping = fake_program(
            &dir,
            "ping",
            "while true; do echo \"reply from $1\"; sleep 0.1; done",
        );
        let state = state_with(|c| c.ping_program = ping);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (addr, server) = netprobe::bind(state.clone(), ([127, 0, 0, 1], 0).into(), async move {
            let _ = stop_rx.await;
        })
        .unwrap();
        let server = tokio::spawn(server);

        let body = json!({ "command": "ping", "ip": "1.1.1.1" }).to_string();
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(
            format!(
                "POST /probe HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .as_bytes(),
        )
        .await
        .unwrap();

        wait_for_registration(&state).await;
        stop_tx.send(()).unwrap();

        timeout(Duration::from_secs(10), server)
            .await
            .expect("server kept running with a stream open")
            .unwrap();
        assert!(state.registry.is_empty());

        let mut raw = Vec::new();
        let _ = timeout(Duration::from_secs(5), conn.read_to_end(&mut raw)).await;
        let raw = String::from_utf8_lossy(&raw);
        assert!(raw.starts_with("HTTP/1.1 200"), "response: {}", raw);
        assert!(!raw.contains("Process exited"));
    }

    #[tokio::test]
    async fn test_admission_bound_refuses_extra_probes() {
        let dir = TempDir::new().unwrap();
        let ping = fake_program(&dir, "ping", "exec sleep 30");
        let state = state_with(|c| {
            c.ping_program = ping;
            c.max_active_probes = 1;
        });
        let api = routes(state.clone());

        let first = {
            let api = api.clone();
            tokio::spawn(async move {
                warp::test::request()
                    .method("POST")
                    .path("/probe")
                    .json(&json!({ "command": "ping", "ip": "1.1.1.1" }))
                    .reply(&api)
                    .await
            })
        };
        let id = wait_for_registration(&state).await;

        let refused = post_probe(&state, json!({ "command": "ping", "ip": "8.8.8.8" })).await;
        assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_of(refused.body()), "Too many active probes");

        assert!(state
            .registry
            .kill_and_remove(&id, netprobe::process::KillReason::Cancelled)
            .is_ok());
        timeout(Duration::from_secs(10), first).await.unwrap().unwrap();
    }
}
