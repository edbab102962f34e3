//! HTTP front end: one JSON-RPC envelope per POST

use crate::mcp::McpServer;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server address
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 7071).into(),
        }
    }
}

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Serves the MCP dispatcher over HTTP
pub struct ApiServer {
    config: ApiServerConfig,
    mcp: Arc<McpServer>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, mcp: Arc<McpServer>) -> Self {
        Self { config, mcp }
    }

    /// Build router
    pub fn router(mcp: Arc<McpServer>) -> Router {
        Router::new()
            .route("/mcp", post(mcp_handler))
            .route("/health", get(health_handler))
            .with_state(mcp)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the MCP server's shutdown token is cancelled
    pub async fn serve(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        info!("API server listening on http://{}", listener.local_addr()?);

        let shutdown = self.mcp.shutdown_token();
        let router = Self::router(self.mcp);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// `POST /mcp`: 200 with the response envelope, 202 for notifications
async fn mcp_handler(State(mcp): State<Arc<McpServer>>, body: String) -> Response {
    debug!("HTTP envelope: {} bytes", body.len());

    match mcp.handle_message(&body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
