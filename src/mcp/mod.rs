//! Model Context Protocol (MCP) server implementation
//!
//! Provides a JSON-RPC 2.0 server over stdio exposing ServiceNow incident
//! and user tools plus two read-only resources.

pub mod catalog;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

pub use catalog::{ResourceDescriptor, ToolCallResult, ToolDescriptor};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use resources::{McpResource, ResourceRegistry};
pub use server::McpServer;
pub use tools::{McpTool, ToolRegistry};
