//! End-to-end integration tests — real TCP connections against running
//! workspace servers, exercising both wire framings and the registry
//! lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use harbor_protocol::ToolSpec;
use harbor_server::{ServerEntry, ServerRegistry, ToolRegistry};

fn test_tools() -> Arc<ToolRegistry> {
    let tools = Arc::new(ToolRegistry::new());
    tools.register_fn(
        ToolSpec {
            name: "echo".into(),
            description: "Echo the provided text".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
            }),
        },
        |args| async move {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => Ok(json!(text)),
                None => Ok(args),
            }
        },
    );
    tools
}

/// Start a registry with one workspace server on an OS-assigned port.
async fn start_test_server() -> (Arc<ServerRegistry>, Arc<ToolRegistry>, ServerEntry, PathBuf) {
    let workspace = TempDir::new().unwrap();
    // Leak the TempDir so it persists for the test duration.
    let workspace_path = Box::leak(Box::new(workspace)).path().to_path_buf();

    let tools = test_tools();
    let registry = Arc::new(ServerRegistry::new(tools.clone()));
    let entry = registry.ensure_server(&workspace_path).await.unwrap();

    (registry, tools, entry, workspace_path)
}

async fn connect(port: u16) -> TcpStream {
    timeout(
        Duration::from_secs(5),
        TcpStream::connect(("127.0.0.1", port)),
    )
    .await
    .expect("connect timed out")
    .expect("connect failed")
}

/// Send one line-framed message and read one line-framed reply.
async fn line_roundtrip(stream: &mut TcpStream, request: &str) -> Value {
    stream.write_all(request.as_bytes()).await.unwrap();
    read_line_message(stream).await
}

async fn read_line_message(stream: &mut TcpStream) -> Value {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("read timed out")
        .expect("read failed");
    serde_json::from_str(line.trim_end()).expect("reply was not valid JSON")
}

/// Read one Content-Length framed reply: header lines until blank, then
/// exactly the advertised number of body bytes.
async fn read_header_message(stream: &mut TcpStream) -> Value {
    let mut reader = BufReader::new(stream);
    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("read timed out")
            .expect("read failed");
        assert!(n > 0, "connection closed while reading headers");

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(len) = trimmed.strip_prefix("Content-Length: ") {
            content_length = len.parse().unwrap();
        }
    }
    assert!(content_length > 0, "reply had no Content-Length header");

    let mut body = vec![0u8; content_length];
    timeout(Duration::from_secs(5), reader.read_exact(&mut body))
        .await
        .expect("read timed out")
        .expect("read failed");
    serde_json::from_slice(&body).expect("reply body was not valid JSON")
}

// ─────────────────────────────────────────────────────────────────────────
// Wire framings
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_over_line_framing() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    let resp = line_roundtrip(&mut stream, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
    assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
}

#[tokio::test]
async fn tools_list_over_header_framing() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    let body = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
    let request = format!("Content-Length: {}\r\n\r\n{body}", body.len());
    stream.write_all(request.as_bytes()).await.unwrap();

    // The connection committed to header framing, so the reply is header
    // framed as well.
    let resp = read_header_message(&mut stream).await;
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn pipelined_line_requests_answered_in_order() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    stream
        .write_all(
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        )
        .await
        .unwrap();

    let mut reader = BufReader::new(&mut stream);
    for expected_id in [1, 2] {
        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("read timed out")
            .expect("read failed");
        let resp: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(resp["id"], expected_id);
    }
}

#[tokio::test]
async fn malformed_content_length_closes_the_connection() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    stream
        .write_all(b"Content-Length: nope\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    assert_eq!(n, 0, "server should close the connection");
}

// ─────────────────────────────────────────────────────────────────────────
// Tool invocation
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tools_call_echo_returns_text_content() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"text": "hello harbor"}}
    });
    let resp = line_roundtrip(&mut stream, &format!("{request}\n")).await;

    assert_eq!(resp["id"], 3);
    assert_eq!(resp["result"]["content"][0]["type"], "text");
    assert_eq!(resp["result"]["content"][0]["text"], "hello harbor");
    assert_eq!(resp["result"]["isError"], false);
}

#[tokio::test]
async fn tools_call_unknown_tool_reports_internal_error() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": {"name": "does_not_exist"}
    });
    let resp = line_roundtrip(&mut stream, &format!("{request}\n")).await;

    assert_eq!(resp["error"]["code"], -32603);
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap()
        .contains("does_not_exist"));
}

#[tokio::test]
async fn tools_registered_after_start_are_listed() {
    let (_registry, tools, entry, _path) = start_test_server().await;

    tools.register_fn(
        ToolSpec {
            name: "late_arrival".into(),
            description: "Registered after the server started".into(),
            input_schema: json!({"type": "object"}),
        },
        |_args| async move { Ok(json!("late")) },
    );

    let mut stream = connect(entry.port).await;
    let resp =
        line_roundtrip(&mut stream, "{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"tools/list\"}\n")
            .await;

    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["echo", "late_arrival"]);
}

// ─────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_handshake() {
    let (_registry, _tools, entry, _path) = start_test_server().await;
    let mut stream = connect(entry.port).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": "init-1",
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "0.1.0"}
        }
    });
    let resp = line_roundtrip(&mut stream, &format!("{request}\n")).await;

    assert_eq!(resp["id"], "init-1");
    assert_eq!(resp["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(resp["result"]["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(resp["result"]["serverInfo"]["name"], "harbor-mcp");
}

// ─────────────────────────────────────────────────────────────────────────
// Broadcast
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn notify_all_reaches_every_session() {
    let (_registry, _tools, entry, _path) = start_test_server().await;

    let mut first = connect(entry.port).await;
    let mut second = connect(entry.port).await;

    // Commit both connections to line framing before broadcasting.
    let ping = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
    line_roundtrip(&mut first, ping).await;
    line_roundtrip(&mut second, ping).await;

    entry.instance.notify_all(
        "notifications/tools/list_changed",
        Some(json!({"reason": "test"})),
    );

    let a = read_line_message(&mut first).await;
    let b = read_line_message(&mut second).await;
    assert_eq!(a, b);
    assert_eq!(a["method"], "notifications/tools/list_changed");
    assert_eq!(a["params"]["reason"], "test");
}

// ─────────────────────────────────────────────────────────────────────────
// Registry lifecycle
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_server_is_idempotent_across_trailing_separator() {
    let (registry, _tools, entry, path) = start_test_server().await;

    let with_separator = PathBuf::from(format!("{}/", path.display()));
    let again = registry.ensure_server(&with_separator).await.unwrap();

    assert_eq!(entry.port, again.port);
    assert_eq!(registry.workspace_paths().len(), 1);

    let looked_up = registry.get_server(&with_separator).unwrap();
    assert_eq!(looked_up.port, entry.port);
}

#[tokio::test]
async fn get_server_never_creates() {
    let tools = test_tools();
    let registry = ServerRegistry::new(tools);

    let missing = TempDir::new().unwrap();
    assert!(registry.get_server(missing.path()).is_none());
    assert!(registry.workspace_paths().is_empty());
}

#[tokio::test]
async fn created_callback_fires_once_per_path() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();

    let registry = ServerRegistry::new(test_tools()).with_created_callback(Arc::new(
        move |_path, _entry| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    ));

    let workspace = TempDir::new().unwrap();
    registry.ensure_server(workspace.path()).await.unwrap();
    registry.ensure_server(workspace.path()).await.unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_all_clears_the_registry_and_closes_servers() {
    let (registry, _tools, entry, path) = start_test_server().await;

    registry.stop_all().await;

    assert!(registry.get_server(&path).is_none());
    assert!(registry.workspace_paths().is_empty());

    // The listener is gone; new connections are refused.
    let outcome = timeout(
        Duration::from_secs(5),
        TcpStream::connect(("127.0.0.1", entry.port)),
    )
    .await
    .expect("connect timed out");
    assert!(outcome.is_err(), "listener should be closed");
}

#[tokio::test]
async fn restart_all_recreates_servers_for_known_paths() {
    let (registry, _tools, _entry, path) = start_test_server().await;

    let entries = registry.restart_all().await.unwrap();
    assert_eq!(entries.len(), 1);

    let entry = registry.get_server(&path).expect("path should still be registered");
    let mut stream = connect(entry.port).await;
    let resp = line_roundtrip(&mut stream, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
    assert_eq!(resp["result"], json!({}));
}

#[tokio::test]
async fn sessions_are_removed_on_disconnect() {
    let (_registry, _tools, entry, _path) = start_test_server().await;

    let mut stream = connect(entry.port).await;
    line_roundtrip(&mut stream, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
    assert_eq!(entry.instance.session_count(), 1);

    drop(stream);

    // The connection task notices EOF and removes the session.
    for _ in 0..50 {
        if entry.instance.session_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("session was not removed after disconnect");
}
