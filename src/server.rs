//! WebSocket/HTTP endpoint for live subscribers.
//!
//! This module provides a server that:
//! - Registers each WebSocket client on `GET /ws` as a telemetry subscriber
//! - Streams `pulseData` and `bpmData` events as JSON text frames
//! - Reports health and relay statistics over plain HTTP
//!
//! # Architecture
//!
//! ```text
//! pipeline ──→ Publisher ──→ per-client queues ──→ GET /ws ──→ dashboard
//!                  │
//!                  └──→ GET /status (last BPM, counters)
//! ```

use crate::stats::{SharedRelayStats, StatsSnapshot};
use crate::telemetry::{SharedPublisher, Subscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind_address: IpAddr, port: u16) -> Self {
        Self { bind_address, port }
    }

    /// Loopback on a random port, for tests and local tools.
    pub fn local_ephemeral() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }
}

/// Shared server state
pub struct ServerState {
    publisher: SharedPublisher,
    stats: SharedRelayStats,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Relay status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub last_bpm: Option<u32>,
    pub subscribers: usize,
    pub stats: StatsSnapshot,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        last_bpm: state.publisher.last_bpm(),
        subscribers: state.publisher.subscriber_count(),
        stats: state.stats.snapshot(),
    })
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let subscription = state.publisher.subscribe();
        handle_socket(socket, subscription, &state).await;
    })
}

/// Forward telemetry to one client until either side goes away.
async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription, state: &ServerState) {
    let id = subscription.id();
    tracing::info!(subscriber = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // Publisher let go of us: shutdown or eviction.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode telemetry event");
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = %id, error = %e, "WebSocket receive error");
                        break;
                    }
                    _ => {} // clients have nothing to say
                }
            }
        }
    }

    state.publisher.unsubscribe(id);
    tracing::info!(subscriber = %id, "WebSocket client disconnected");
}

/// Build the router without binding.
pub fn router(publisher: SharedPublisher, stats: SharedRelayStats) -> Router {
    let state = Arc::new(ServerState { publisher, stats });

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the server
pub async fn run(
    config: ServerConfig,
    publisher: SharedPublisher,
    stats: SharedRelayStats,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(publisher, stats);

    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Pulse relay listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
