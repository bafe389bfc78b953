//! MCP Server implementation
//!
//! Implements the Model Context Protocol server over newline-delimited
//! JSON-RPC on stdio.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{DispatchError, Result};
use crate::mcp::dispatch::Dispatcher;
use crate::mcp::types::*;

/// MCP Server info
const SERVER_NAME: &str = "gsuite";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for Gmail and Google Calendar
pub struct McpServer {
    dispatcher: Dispatcher,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Run the server on stdio until stdin closes
    pub async fn run_stdio(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve one message per line from `reader`, writing responses to `writer`
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                let mut response_str = serde_json::to_string(&response)?;
                response_str.push('\n');
                writer.write_all(response_str.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        tracing::info!("Input closed, shutting down");
        Ok(())
    }

    /// Handle one JSON-RPC message; notifications produce no response
    pub async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("Unparseable message: {}", e);
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            if request.method == methods::INITIALIZED {
                tracing::info!("Client initialized");
            } else {
                tracing::debug!("Ignoring notification {}", request.method);
            }
            return None;
        };

        let response = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(),
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(&request).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        Some(match response {
            Ok(result) => JsonRpcResponse::success(Some(id), result),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        })
    }

    fn handle_initialize(&self) -> std::result::Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
        };

        to_result(&result)
    }

    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        to_result(&ListToolsResult {
            tools: self.dispatcher.list_tools(),
        })
    }

    async fn handle_call_tool(
        &self,
        request: &JsonRpcRequest,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = match request.params.clone() {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };

        let content = self
            .dispatcher
            .call_tool(&params.name, params.arguments)
            .await
            .map_err(dispatch_error)?;

        to_result(&CallToolResult { content })
    }
}

fn to_result<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Protocol-level error for a failed tool call
fn dispatch_error(error: DispatchError) -> JsonRpcError {
    JsonRpcError {
        code: error.code(),
        message: error.to_string(),
        data: Some(json!({ "kind": error.kind() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info() {
        assert_eq!(SERVER_NAME, "gsuite");
    }

    #[test]
    fn test_dispatch_error_carries_kind() {
        let error = dispatch_error(DispatchError::UnknownAccount {
            account: "eve@example.com".to_string(),
        });
        assert_eq!(error.code, -32602);
        assert_eq!(error.data, Some(json!({"kind": "unknown_account"})));
        assert!(error.message.contains("eve@example.com"));
    }
}
