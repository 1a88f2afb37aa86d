//! HTTP transport for the MCP server.
//!
//! Provides an HTTP/SSE transport: JSON-RPC requests over POST and outbound
//! resource notifications streamed to connected SSE sessions.

use crate::error::McpError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::resources::NotificationSink;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// HTTP transport handler state.
pub struct HttpTransportState {
    /// Channel for sending requests to the MCP server task.
    request_tx: mpsc::Sender<(JsonRpcRequest, mpsc::Sender<JsonRpcResponse>)>,
    /// Active SSE connections for streaming notifications.
    sse_connections: RwLock<HashMap<String, mpsc::Sender<JsonRpcNotification>>>,
}

impl HttpTransportState {
    /// Create a new HTTP transport state.
    pub fn new(
        request_tx: mpsc::Sender<(JsonRpcRequest, mpsc::Sender<JsonRpcResponse>)>,
    ) -> Self {
        Self {
            request_tx,
            sse_connections: RwLock::new(HashMap::new()),
        }
    }
}

/// Resource notifications fan out to every connected SSE session.
/// Best-effort: a full or closed session drops the event.
impl NotificationSink for HttpTransportState {
    fn notify(&self, method: &str, params: Option<Value>) {
        let notification = JsonRpcNotification::new(method, params);
        let connections = self.sse_connections.read().unwrap();
        for (session_id, tx) in connections.iter() {
            if tx.try_send(notification.clone()).is_err() {
                tracing::warn!(session_id = %session_id, method, "could not deliver notification");
            }
        }
    }
}

/// Query parameters for the MCP endpoint.
#[derive(Debug, Deserialize)]
pub struct McpQuery {
    /// Session ID for SSE connections.
    session_id: Option<String>,
}

/// Create the HTTP router for MCP.
pub fn create_router(state: Arc<HttpTransportState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/mcp", get(handle_mcp_sse))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle POST requests to /mcp (JSON-RPC over HTTP).
async fn handle_mcp_post(
    State(state): State<Arc<HttpTransportState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let (response_tx, mut response_rx) = mpsc::channel(1);

    // Send request to the MCP server task
    if state.request_tx.send((request, response_tx)).await.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonRpcResponse::error(
                None,
                -32603,
                "MCP server unavailable",
            )),
        );
    }

    // Wait for response
    match response_rx.recv().await {
        Some(response) => (StatusCode::OK, Json(response)),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonRpcResponse::error(None, -32603, "No response from MCP server")),
        ),
    }
}

/// Handle GET requests to /mcp (SSE notification stream).
async fn handle_mcp_sse(
    State(state): State<Arc<HttpTransportState>>,
    Query(query): Query<McpQuery>,
) -> impl IntoResponse {
    let session_id = query
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (event_tx, event_rx) = mpsc::channel(100);

    // Register SSE connection
    state
        .sse_connections
        .write()
        .unwrap()
        .insert(session_id.clone(), event_tx);

    // Create SSE stream
    let stream = async_stream::stream! {
        let mut rx = event_rx;
        while let Some(notification) = rx.recv().await {
            let data = serde_json::to_string(&notification).unwrap_or_default();
            yield Ok::<_, Infallible>(axum::response::sse::Event::default()
                .event("message")
                .data(data));
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(30))
            .text("ping"),
    )
}

/// Handle health check requests.
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nl2kql-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// HTTP server for the MCP transport.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpTransportState>,
}

impl HttpServer {
    /// Create a new HTTP server over an existing transport state.
    pub fn new(port: u16, state: Arc<HttpTransportState>) -> Self {
        Self { port, state }
    }

    /// Run the HTTP server.
    pub async fn run(self) -> Result<(), McpError> {
        let app = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .map_err(|e| {
                McpError::StartupFailed(format!("failed to bind to port {}: {}", self.port, e))
            })?;

        tracing::info!(port = self.port, "MCP HTTP server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| McpError::Internal(e.into()))?;

        Ok(())
    }
}
