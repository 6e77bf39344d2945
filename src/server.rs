//! Reference collector for development and integration testing.
//!
//! This module provides a local collector that:
//! - Accepts fallback posts via POST /api/events
//! - Accepts streamed messages as newline-delimited JSON over TCP and answers
//!   each with an `event_received` ack
//! - Keeps everything it receives in memory for inspection
//!
//! # Architecture
//!
//! ```text
//! TrackingSession ──→ TCP stream (ack) ──┐
//!        │                               ├──→ collector ──→ GET /api/events/all
//!        └─────→ POST /api/events ───────┘
//! ```

use crate::delivery::{InboundAck, OutboundMessage};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port to bind to (0 for random)
    pub port: u16,
    /// Streaming port; `None` disables the streaming listener
    pub stream_port: Option<u16>,
    /// Whether streamed messages are acknowledged
    pub ack_stream_messages: bool,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, stream_port: Option<u16>) -> Self {
        Self {
            port,
            stream_port,
            ack_stream_messages: true,
        }
    }

    /// Keep accepting streamed messages but never ack them.
    pub fn without_stream_acks(mut self) -> Self {
        self.ack_stream_messages = false;
        self
    }
}

/// Shared server state
#[derive(Default)]
pub struct ServerState {
    packets: RwLock<Vec<OutboundMessage>>,
}

impl ServerState {
    /// Store a packet and return the new total.
    pub async fn store(&self, message: OutboundMessage) -> usize {
        let mut packets = self.packets.write().await;
        packets.push(message);
        packets.len()
    }

    pub async fn packets(&self) -> Vec<OutboundMessage> {
        self.packets.read().await.clone()
    }

    pub async fn total(&self) -> usize {
        self.packets.read().await.len()
    }

    pub async fn clear(&self) {
        self.packets.write().await.clear();
    }
}

/// Response from the ingest endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_packets: Option<usize>,
}

/// All stored packets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketsResponse {
    pub total_packets: usize,
    pub packets: Vec<OutboundMessage>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/events
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorResponse>)> {
    let message: OutboundMessage = serde_json::from_value(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid event: {e}"),
                code: "INVALID_EVENT".to_string(),
            }),
        )
    })?;

    tracing::debug!(
        user_id = %message.user_id,
        event_type = ?message.event_type,
        "fallback packet received"
    );
    let total = state.store(message).await;

    Ok(Json(IngestResponse {
        status: "success".to_string(),
        message: "Event received".to_string(),
        total_packets: Some(total),
    }))
}

/// GET /api/events/all
async fn all_packets(State(state): State<Arc<ServerState>>) -> Json<PacketsResponse> {
    let packets = state.packets().await;
    Json(PacketsResponse {
        total_packets: packets.len(),
        packets,
    })
}

/// POST /api/events/clear
async fn clear_packets(State(state): State<Arc<ServerState>>) -> Json<IngestResponse> {
    state.clear().await;
    Json(IngestResponse {
        status: "success".to_string(),
        message: "All packets cleared".to_string(),
        total_packets: None,
    })
}

/// Build the HTTP router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", post(ingest))
        .route("/api/events/all", get(all_packets))
        .route("/api/events/clear", post(clear_packets))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost:5174"),
                    HeaderValue::from_static("http://localhost:3000"),
                    HeaderValue::from_static("http://127.0.0.1:5174"),
                    HeaderValue::from_static("http://127.0.0.1:3000"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// A running collector.
pub struct CollectorHandle {
    pub http_addr: SocketAddr,
    pub stream_addr: Option<SocketAddr>,
    pub state: Arc<ServerState>,
    shutdown: CancellationToken,
}

impl CollectorHandle {
    /// Stop both listeners and drop open stream connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run the collector
pub async fn run(config: ServerConfig) -> anyhow::Result<CollectorHandle> {
    let state = Arc::new(ServerState::default());
    let shutdown = CancellationToken::new();

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let http_addr = listener.local_addr()?;
    tracing::info!("Collector listening on http://{}", http_addr);

    let app = router(state.clone());
    let http_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_shutdown.cancelled().await;
                tracing::info!("Collector shutdown signal received");
            })
            .await
        {
            tracing::error!("Collector error: {}", e);
        }
    });

    let stream_addr = match config.stream_port {
        Some(port) => {
            let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
            let stream_addr = listener.local_addr()?;
            tracing::info!("Collector accepting streams on {}", stream_addr);
            tokio::spawn(accept_streams(
                listener,
                state.clone(),
                config.ack_stream_messages,
                shutdown.clone(),
            ));
            Some(stream_addr)
        }
        None => None,
    };

    Ok(CollectorHandle {
        http_addr,
        stream_addr,
        state,
        shutdown,
    })
}

async fn accept_streams(
    listener: TcpListener,
    state: Arc<ServerState>,
    ack: bool,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, peer)) => {
                tracing::debug!(%peer, "stream client connected");
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_stream(socket, state, ack, shutdown).await {
                        tracing::warn!(%peer, error = %e, "stream client error");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "stream accept failed"),
        }
    }
}

async fn serve_stream(
    socket: TcpStream,
    state: Arc<ServerState>,
    ack: bool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let message: OutboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "invalid stream message");
                continue;
            }
        };

        let correlation_id = message.correlation_id;
        state.store(message).await;

        if ack {
            let mut reply = serde_json::to_string(&InboundAck::received(correlation_id))?;
            reply.push('\n');
            writer.write_all(reply.as_bytes()).await?;
        }
    }
}
