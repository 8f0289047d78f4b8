//! HTTP and WebSocket handlers
//!
//! Routes:
//! - `GET /ws?offset=N&recovered=bool` - chat connection
//! - `GET /health` - instance health
//! - `GET /metrics` - Prometheus exposition

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{ClientFrame, ServerFrame};
use super::server::AppState;
use crate::error::{Error, MurmurErrorTrait};
use crate::models::{AckReceipt, Handshake, Outbound, NO_OFFSET};
use crate::session::Session;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instance_id: String,
    pub bus: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub timestamp: String,
}

/// Query parameters of the WebSocket handshake
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Highest sequence id the client has seen
    pub offset: Option<i64>,

    /// The client's transport session was restored
    #[serde(default)]
    pub recovered: bool,
}

impl From<ConnectParams> for Handshake {
    fn from(params: ConnectParams) -> Self {
        let offset = params.offset.unwrap_or(NO_OFFSET);
        if params.recovered {
            Handshake::recovered(offset)
        } else {
            Handshake::resume_from(offset)
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the gateway router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = state.sessions.coordinator();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: coordinator.instance_id().to_string(),
        bus: coordinator.bus_name().to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: coordinator.hub().connection_count().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Prometheus scrape endpoint
async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// WebSocket Handlers
// ============================================================================

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let handshake = Handshake::from(params);
    ws.on_upgrade(move |socket| handle_socket(socket, state, handshake))
}

/// Drive one WebSocket connection until the client leaves
async fn handle_socket(socket: WebSocket, state: AppState, handshake: Handshake) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.outbound_buffer);

    // Writer task: must be draining before connect, which blocks on replay
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match ServerFrame::from(event).encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server frame");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let session = state.sessions.connect(handshake, tx).await;

    // Frames from one client are handled strictly in arrival order
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => handle_frame(&session, text.as_str()).await,
            WsMessage::Close(_) => break,
            _ => {} // axum answers pings
        }
    }

    session.disconnect().await;
    writer.abort();
}

/// Handle one text frame from a client
pub async fn handle_frame(session: &Session, text: &str) {
    let frame = match ClientFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session_id = %session.id(), error = %e, "Malformed client frame");
            session
                .reply(Outbound::Notice(format!("Malformed frame: {e}")))
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::ChatMessage {
            content,
            client_offset,
            ack_id,
        } => {
            let mut stored = None;
            let result = session
                .submit(&content, client_offset.as_deref(), |receipt| stored = Some(receipt))
                .await;

            match (result, stored, ack_id) {
                (Ok(_), Some(receipt), Some(ack_id)) => {
                    session.reply(Outbound::Ack { ack_id, receipt }).await;
                }
                (Ok(_), _, _) => {}
                (Err(e), _, _) => {
                    let err = Error::from(e);
                    warn!(
                        session_id = %session.id(),
                        category = err.category().as_str(),
                        recoverable = err.is_recoverable(),
                        error = %err,
                        "Submission not stored"
                    );
                    // No ack: the client retries with the same clientOffset
                    session.reply(Outbound::Notice(storage_notice(&err))).await;
                }
            }
        }
        ClientFrame::Hello { value, ack_id } => {
            info!(session_id = %session.id(), value = %value, "Hello from client");
            if let Some(ack_id) = ack_id {
                session
                    .reply(Outbound::Ack {
                        ack_id,
                        receipt: AckReceipt {
                            sequence_id: None,
                            duplicate: false,
                        },
                    })
                    .await;
            }
        }
    }
}

/// Notice text for a submission that could not be stored
fn storage_notice(err: &Error) -> String {
    if err.is_recoverable() {
        "Message could not be stored, retry with the same clientOffset".to_string()
    } else {
        "Message could not be stored".to_string()
    }
}
