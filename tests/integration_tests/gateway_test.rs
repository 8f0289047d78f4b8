//! WebSocket gateway tests
//!
//! Real sockets against gateways bound to ephemeral ports:
//! 1. Handshake offset drives replay, frames carry the JSON protocol
//! 2. Acks echo the client's ack id, duplicates are flagged
//! 3. Health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use murmur::cluster::{Node, NodeOptions};
use murmur::config::ServerConfig;
use murmur::coordinator::BroadcastBus;
use murmur::gateway::{GatewayServer, HealthResponse};
use murmur::storage::{create_memory_log, SharedMessageLog};

use super::fixtures::{shared_bus, start_instance, RECV_TIMEOUT, SILENCE_WINDOW};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn local_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Start a node on an ephemeral port and return its address
async fn spawn_node(log: &SharedMessageLog, bus: &Arc<dyn BroadcastBus>) -> SocketAddr {
    let options = NodeOptions {
        replay_batch_size: 2,
        ..Default::default()
    };
    let node = Node::start(local_config(), Arc::clone(log), Arc::clone(bus), options);
    let listener = node.server().bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = node.serve(listener, std::future::pending()).await;
    });
    addr
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws{query}");
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut Client, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next JSON frame from the server
async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();

        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn expect_no_frame(ws: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(SILENCE_WINDOW, ws.next()).await {
        panic!("expected no frame, got {}", text.as_str());
    }
}

#[tokio::test]
async fn test_chat_roundtrip_with_ack() {
    let log = create_memory_log();
    let bus = shared_bus();
    let addr = spawn_node(&log, &bus).await;

    let mut sender = connect(addr, "").await;
    let mut peer = connect(addr, "?offset=0").await;

    send_json(
        &mut sender,
        json!({"type": "chat-message", "content": "hi", "clientOffset": "c-1", "ackId": 1}),
    )
    .await;

    // Broadcast goes out before the ack
    assert_eq!(
        recv_json(&mut sender).await,
        json!({"type": "chat-message", "content": "hi", "serverOffset": 1})
    );
    assert_eq!(
        recv_json(&mut sender).await,
        json!({"type": "ack", "ackId": 1, "serverOffset": 1, "duplicate": false})
    );
    assert_eq!(
        recv_json(&mut peer).await,
        json!({"type": "chat-message", "content": "hi", "serverOffset": 1})
    );

    // Same token again: acked as duplicate, nothing broadcast
    send_json(
        &mut sender,
        json!({"type": "chat-message", "content": "hi", "clientOffset": "c-1", "ackId": 2}),
    )
    .await;
    assert_eq!(
        recv_json(&mut sender).await,
        json!({"type": "ack", "ackId": 2, "serverOffset": 1, "duplicate": true})
    );
    expect_no_frame(&mut peer).await;
}

#[tokio::test]
async fn test_handshake_offset_replays_across_nodes() {
    let log = create_memory_log();
    let bus = shared_bus();
    let a = spawn_node(&log, &bus).await;
    let b = spawn_node(&log, &bus).await;

    let mut writer = connect(a, "").await;
    for i in 1..=4 {
        send_json(
            &mut writer,
            json!({"type": "chat-message", "content": format!("m{i}"), "clientOffset": format!("w-{i}"), "ackId": i}),
        )
        .await;
    }
    // Drain until the last ack so everything is stored
    loop {
        let frame = recv_json(&mut writer).await;
        if frame["type"] == "ack" && frame["ackId"] == 4 {
            break;
        }
    }

    let mut reader = connect(b, "?offset=2").await;
    let first = recv_json(&mut reader).await;
    let second = recv_json(&mut reader).await;
    assert_eq!(first["serverOffset"], 3);
    assert_eq!(first["content"], "m3");
    assert_eq!(second["serverOffset"], 4);
    expect_no_frame(&mut reader).await;

    // Live traffic from the other node follows the replay
    send_json(&mut writer, json!({"type": "chat-message", "content": "m5"})).await;
    let live = recv_json(&mut reader).await;
    assert_eq!(live["serverOffset"], 5);
    assert_eq!(live["content"], "m5");
}

#[tokio::test]
async fn test_recovered_handshake_skips_replay() {
    let log = create_memory_log();
    let bus = shared_bus();
    let addr = spawn_node(&log, &bus).await;

    let mut writer = connect(addr, "").await;
    send_json(&mut writer, json!({"type": "chat-message", "content": "old", "ackId": 1})).await;
    recv_json(&mut writer).await;
    recv_json(&mut writer).await;

    let mut reader = connect(addr, "?offset=0&recovered=true").await;
    expect_no_frame(&mut reader).await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_connection_survives() {
    let log = create_memory_log();
    let bus = shared_bus();
    let addr = spawn_node(&log, &bus).await;

    let mut ws = connect(addr, "").await;
    ws.send(Message::text("not json")).await.unwrap();

    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");

    send_json(&mut ws, json!({"type": "hello", "value": "world", "ackId": 9})).await;
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"type": "ack", "ackId": 9, "duplicate": false})
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let log = create_memory_log();
    let bus = shared_bus();
    let sessions = start_instance("node-health", &log, &bus);
    let server = GatewayServer::new(local_config(), sessions);

    let response = server
        .build_router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);

    let health: HealthResponse = serde_json::from_value(json["data"].clone()).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.instance_id, "node-health");
    assert_eq!(health.bus, "memory");
    assert_eq!(health.connections, 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    murmur::metrics::init_metrics();
    murmur::metrics::record_append("node-metrics", "accepted");

    let log = create_memory_log();
    let bus = shared_bus();
    let sessions = start_instance("node-metrics", &log, &bus);
    let server = GatewayServer::new(local_config(), sessions);

    let response = server
        .build_router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("murmur_"));
}

#[tokio::test]
async fn test_disconnect_updates_connection_count() {
    let log = create_memory_log();
    let bus = shared_bus();
    let sessions = start_instance("node-count", &log, &bus);
    let server = GatewayServer::new(local_config(), sessions.clone());
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener, std::future::pending()).await;
    });

    let mut ws = connect(addr, "").await;
    send_json(&mut ws, json!({"type": "hello", "value": 1, "ackId": 1})).await;
    recv_json(&mut ws).await;
    assert_eq!(sessions.coordinator().hub().connection_count().await, 1);

    ws.close(None).await.unwrap();

    let hub = Arc::clone(sessions.coordinator().hub());
    let drained = tokio::time::timeout(Duration::from_secs(2), async move {
        while hub.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());
}
