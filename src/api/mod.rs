//! HTTP-triggered mode
//!
//! Provides:
//! - `POST /mcp` carrying one JSON-RPC envelope
//! - `GET /health`

pub mod server;

pub use server::{ApiServer, ApiServerConfig, HealthResponse};
