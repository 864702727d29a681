mod support;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use sqlgate::{AccessMode, server};
use support::{FakeBackend, gateway, settings, user_rows};

#[tokio::test]
async fn handles_each_request_kind() {
    let backend = FakeBackend::new();
    backend.set_rows(user_rows());
    let gw = gateway(settings(AccessMode::ReadOnly), &backend);

    let out = server::handle_line(&gw, r#"{"method": "list_tools"}"#, "127.0.0.1").await;
    assert_eq!(out["mode"], "READ_ONLY");
    assert_eq!(out["tools"].as_array().map(Vec::len), Some(11));
    assert!(out["tools"][0]["parameters"].is_array());

    let out = server::handle_line(&gw, r#"{"method": "info"}"#, "127.0.0.1").await;
    assert_eq!(out["name"], "sqlgate");
    assert_eq!(out["limits"]["maxResultRows"], 5);
    assert_eq!(out["limits"]["windowSeconds"], 60.0);

    let out = server::handle_line(&gw, r#"{"method": "health"}"#, "127.0.0.1").await;
    assert_eq!(out["databaseReachable"], true);

    let out = server::handle_line(&gw, "not json", "127.0.0.1").await;
    assert_eq!(out["success"], false);
    assert!(out["error"].as_str().unwrap().starts_with("invalid request"));

    let line = json!({
        "method": "call_tool",
        "tool": "execute_select",
        "arguments": {"query": "SELECT * FROM users"},
        "client_id": "reporting",
    })
    .to_string();
    let out = server::handle_line(&gw, &line, "127.0.0.1").await;
    assert_eq!(out["success"], true);
    assert_eq!(out["rowCount"], 5);
    assert_eq!(out["operationName"], "execute_select");

    let out = server::handle_line(&gw, r#"{"method": "info"}"#, "127.0.0.1").await;
    assert_eq!(out["trackedCallers"], 1);
}

#[tokio::test]
async fn serves_newline_delimited_json_over_tcp() {
    let backend = FakeBackend::new();
    let gw = Arc::new(gateway(settings(AccessMode::FullAccess), &backend));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(Arc::clone(&gw), listener, stop_rx));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer
        .write_all(b"{\"method\":\"call_tool\",\"tool\":\"nope\"}\n{\"method\":\"list_tools\"}\n")
        .await
        .unwrap();

    let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["errorCode"], "TOOL_NOT_FOUND");

    let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(second["tools"].as_array().map(Vec::len), Some(22));

    stop_tx.send(()).unwrap();
    serving.await.unwrap();
}

#[tokio::test]
async fn oversized_request_gets_an_error_and_the_session_survives() {
    let backend = FakeBackend::new();
    let gw = Arc::new(gateway(settings(AccessMode::ReadOnly), &backend));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(Arc::clone(&gw), listener, stop_rx));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut payload = vec![b'x'; server::MAX_REQUEST_BYTES + 1];
    payload.extend_from_slice(b"\n{\"method\":\"list_tools\"}\n");
    writer.write_all(&payload).await.unwrap();

    let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["success"], false);
    assert!(first["error"].as_str().unwrap().starts_with("request exceeds"));

    let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(second["tools"].as_array().map(Vec::len), Some(11));

    stop_tx.send(()).unwrap();
    serving.await.unwrap();
}
