//! ServiceNow MCP gateway
//!
//! Exposes ServiceNow incident, change request and user operations to MCP
//! clients as tools and resources:
//! - JSON-RPC 2.0 over stdio, or one envelope per HTTP POST
//! - Table API client with retry and a circuit breaker
//! - Typed domain services behind traits
//!
//! # Example
//!
//! ```ignore
//! use servicenow_mcp_core::{build_server, ServiceNowClient, ServiceNowConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> servicenow_mcp_core::Result<()> {
//!     let config = ServiceNowConfig::load(None)?;
//!     let client = Arc::new(ServiceNowClient::new(&config)?);
//!     let server = Arc::new(build_server(client)?);
//!     server.run_stdio().await
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod mcp;
pub mod services;
pub mod types;

pub use client::{ServiceNowClient, TableApi, TableQuery};
pub use config::ServiceNowConfig;
pub use error::{Result, ServiceNowError};
pub use mcp::{McpServer, ResourceRegistry, ToolRegistry};
pub use types::{ChangeRequest, Incident, User};

use services::{ServiceNowChangeRequests, ServiceNowIncidents, ServiceNowUsers};
use std::sync::Arc;

/// Wire the ServiceNow services, tools and resources into a server
pub fn build_server(api: Arc<dyn TableApi>) -> Result<McpServer> {
    let incidents = Arc::new(ServiceNowIncidents::new(api.clone()));
    let changes = Arc::new(ServiceNowChangeRequests::new(api.clone()));
    let users = Arc::new(ServiceNowUsers::new(api));

    let tools = ToolRegistry::servicenow(incidents.clone(), users)?;
    let resources = ResourceRegistry::servicenow(incidents, changes)?;

    Ok(McpServer::new(tools, resources))
}
