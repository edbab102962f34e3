//! MCP server with stdio transport
//!
//! Reads newline-delimited JSON-RPC 2.0 envelopes, handles each request in
//! its own task and writes responses as they complete through a single
//! writer task, so lines never interleave.

use super::catalog::ToolCallResult;
use super::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use super::resources::ResourceRegistry;
use super::tools::ToolRegistry;
use crate::error::{Result, ServiceNowError};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server name reported by `initialize`
pub const SERVER_NAME: &str = "servicenow-mcp";

/// Default limit on one request line, in bytes
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// MCP server that dispatches JSON-RPC requests to the tool and resource registries
pub struct McpServer {
    tools: ToolRegistry,
    resources: ResourceRegistry,
    shutdown: CancellationToken,
    max_line_length: usize,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(tools: ToolRegistry, resources: ResourceRegistry) -> Self {
        Self {
            tools,
            resources,
            shutdown: CancellationToken::new(),
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Longer request lines are discarded and answered with a parse error
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Cancelling this token ends the session and resolves in-flight calls
    /// with a cancellation result.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Serve stdin/stdout until EOF or shutdown
    pub async fn run_stdio(self: Arc<Self>) -> Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one duplex session.
    ///
    /// On EOF the reader stops and in-flight requests drain before returning.
    /// A failed write closes the session and aborts whatever is still running.
    pub async fn run<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("MCP server started, listening on stdin...");

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(self.max_line_length));
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut writer_task = tokio::spawn(write_responses(writer, rx));
        let mut writer_outcome = None;
        let mut in_flight = JoinSet::new();
        // FramedRead yields one `None` after a decode error before resuming
        let mut resume_after_overflow = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, closing session");
                    break;
                }
                outcome = &mut writer_task => {
                    error!("Output stream closed, ending session");
                    writer_outcome = Some(outcome);
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Request task failed: {}", e);
                    }
                }
                next = lines.next() => match next {
                    None if resume_after_overflow => {
                        resume_after_overflow = false;
                    }
                    None => {
                        debug!("Received EOF, shutting down");
                        break;
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("Discarding request longer than {} bytes", self.max_line_length);
                        resume_after_overflow = true;
                        let response = JsonRpcResponse::error(
                            None,
                            JsonRpcError::parse_error(format!(
                                "Request exceeds {} bytes",
                                self.max_line_length
                            )),
                        );
                        if let Ok(json) = serde_json::to_string(&response) {
                            if tx.send(json).is_err() {
                                warn!("Response dropped, output stream is closed");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                    Some(Ok(line)) => {
                        resume_after_overflow = false;
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }

                        debug!("Received request: {}", line);

                        let server = Arc::clone(&self);
                        let tx = tx.clone();
                        in_flight.spawn(async move {
                            if let Some(response) = server.handle_message(&line).await {
                                match serde_json::to_string(&response) {
                                    Ok(json) => {
                                        debug!("Sending response: {}", json);
                                        if tx.send(json).is_err() {
                                            warn!("Response dropped, output stream is closed");
                                        }
                                    }
                                    Err(e) => error!("Failed to serialize response: {}", e),
                                }
                            }
                        });
                    }
                }
            }
        }

        if writer_outcome.is_some() {
            in_flight.abort_all();
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Request task failed: {}", e),
                Ok(()) => {}
            }
        }

        drop(tx);
        let outcome = match writer_outcome {
            Some(outcome) => outcome,
            None => writer_task.await,
        };

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to write response: {}", e);
                Err(ServiceNowError::Io(e))
            }
            Err(e) => {
                error!("Writer task failed: {}", e);
                Err(ServiceNowError::Other(format!("writer task failed: {}", e)))
            }
        };

        info!("MCP server shutting down");
        result
    }

    /// Handle one envelope; `None` for notifications
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparsable request: {}", e);
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
                ));
            }
        };

        let id = value.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                ));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        if request.method.is_empty() {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("method must not be empty"),
            ));
        }

        let notification = request.is_notification();
        let method = request.method.clone();
        let response = self.process_request(request).await;

        if notification {
            debug!("Notification {} handled, no response", method);
            None
        } else {
            Some(response)
        }
    }

    async fn process_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "notifications/initialized" => {
                info!("Client initialized");
                JsonRpcResponse::success(request.id, json!({}))
            }
            "tools/list" => {
                debug!("Handling tools/list");
                JsonRpcResponse::success(request.id, self.tools.listing().clone())
            }
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => {
                debug!("Handling resources/list");
                JsonRpcResponse::success(request.id, self.resources.listing().clone())
            }
            "resources/read" => self.handle_resources_read(request).await,
            _ => {
                JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
            }
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling initialize");

        JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    },
                    "resources": {
                        "subscribe": false,
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling tools/call");

        let params = match request.params.as_object() {
            Some(obj) => obj,
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("params must be an object"),
                );
            }
        };

        let tool_name = match params.get("name").and_then(|v| v.as_str()) {
            Some(name) => name,
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("missing 'name' field"),
                );
            }
        };

        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!("Tool {} cancelled", tool_name);
                ToolCallResult::failure(&ServiceNowError::Cancelled)
            }
            result = self.tools.call(tool_name, arguments) => result,
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(
                request.id,
                JsonRpcError::internal_error(format!("Serialization error: {}", e)),
            ),
        }
    }

    async fn handle_resources_read(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling resources/read");

        let uri = match request.params.get("uri").and_then(|v| v.as_str()) {
            Some(uri) => uri,
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("missing 'uri' field"),
                );
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ServiceNowError::Cancelled),
            outcome = self.resources.read(uri) => outcome,
        };

        match outcome {
            Ok(contents) => JsonRpcResponse::success(request.id, contents),
            Err(e @ ServiceNowError::UnknownResource(_)) => {
                JsonRpcResponse::error(request.id, JsonRpcError::invalid_params(e.to_string()))
            }
            Err(e) => {
                warn!("Resource {} failed: {}", uri, e);
                JsonRpcResponse::error(request.id, JsonRpcError::server_error(e.to_string()))
            }
        }
    }
}

/// Single writer: one line per response, flushed immediately
async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockChangeRequestService, MockIncidentService, MockUserService};

    fn server() -> McpServer {
        let incidents = Arc::new(MockIncidentService::new());
        McpServer::new(
            ToolRegistry::servicenow(incidents.clone(), Arc::new(MockUserService::new())).unwrap(),
            ResourceRegistry::servicenow(incidents, Arc::new(MockChangeRequestService::new()))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle_message(r#"{"jsonrpc":"2.0","method":"initialize","id":1,"params":{}}"#)
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "servicenow-mcp");
        assert!(result["capabilities"]["resources"].is_object());
        assert_eq!(response.id, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = server().handle_message("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert_eq!(response.id, None);
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let response = server()
            .handle_message(r#"{"jsonrpc":"1.0","method":"tools/list","id":7}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert_eq!(response.id, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server()
            .handle_message(r#"{"jsonrpc":"2.0","method":"prompts/list","id":2}"#)
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, JsonRpcError::METHOD_NOT_FOUND);
        assert!(error.message.contains("prompts/list"));
    }

    #[tokio::test]
    async fn test_every_supported_method_is_routed() {
        let server = server();
        for method in [
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/call",
            "resources/list",
            "resources/read",
        ] {
            let request = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": {}});
            let response = server.handle_message(&request.to_string()).await.unwrap();
            if let Some(error) = response.error {
                assert_ne!(error.code, JsonRpcError::METHOD_NOT_FOUND, "{} not routed", method);
            }
        }
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let response = server()
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_tools_call_without_name_is_invalid_params() {
        let response = server()
            .handle_message(r#"{"jsonrpc":"2.0","method":"tools/call","id":3,"params":{}}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_cancelled_call_resolves_with_error_result() {
        let mut incidents = MockIncidentService::new();
        incidents.expect_get().never();
        let incidents = Arc::new(incidents);
        let server = McpServer::new(
            ToolRegistry::servicenow(incidents.clone(), Arc::new(MockUserService::new())).unwrap(),
            ResourceRegistry::servicenow(incidents, Arc::new(MockChangeRequestService::new()))
                .unwrap(),
        );
        server.shutdown_token().cancel();

        let response = server
            .handle_message(
                r#"{"jsonrpc":"2.0","method":"tools/call","id":4,"params":{"name":"get_incident","arguments":{"identifier":"INC0010001"}}}"#,
            )
            .await
            .unwrap();

        let result: ToolCallResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.is_error());
        assert!(result.text_content().starts_with("Error: Cancelled"));
    }
}
