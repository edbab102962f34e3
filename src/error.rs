//! Error types for the ServiceNow MCP gateway
//!
//! This module provides structured error definitions using thiserror and
//! anyhow interop for error propagation at the binary edge.

use std::time::Duration;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum ServiceNowError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("ServiceNow returned {status}: {message}")]
    UpstreamStatus {
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body, or the raw body
        message: String,
    },

    /// Record or endpoint not found (HTTP 404 or empty lookup)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Circuit breaker is open, call was not attempted
    #[error("Circuit open: upstream calls suspended (retry in {}s)", retry_after.as_secs())]
    CircuitOpen {
        /// Time until the breaker allows a trial call
        retry_after: Duration,
    },

    /// Tool argument has the wrong shape or value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Required tool argument is absent
    #[error("Missing required argument '{field}' for tool '{tool}'")]
    MissingArgument {
        /// Tool being invoked
        tool: String,
        /// Field named in the tool's required set
        field: String,
    },

    /// Tool name not present in the catalog
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Resource URI not present in the catalog
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// MCP protocol error
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    /// Call abandoned because the session was torn down
    #[error("Cancelled: session closed before the call completed")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ServiceNowError {
    /// Whether the failure is worth retrying and counts against the circuit breaker.
    ///
    /// Connect, timeout and send failures and every non-success status are
    /// transient; a 404 is a terminal answer from a healthy upstream. Request
    /// builder and decode errors would fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::UpstreamStatus { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, ServiceNowError>;

/// Convert anyhow::Error to ServiceNowError
impl From<anyhow::Error> for ServiceNowError {
    fn from(err: anyhow::Error) -> Self {
        ServiceNowError::Other(err.to_string())
    }
}
