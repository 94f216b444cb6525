//! MCP server handler that proxies tool listing and invocation to the IDE.
//!
//! This handler validates protocol initialization, forwards `tools/list` and
//! `tools/call` to the discovered IDE endpoint, and triggers discovery on a
//! cache miss. Every other method is answered with method-not-found; the
//! bridge exposes a deliberately narrow surface.

use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolResult, ClientRequest, ListToolsResult, RpcError, TextContent,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};
use serde_json::Value as JsonValue;

use crate::ide::connection::ConnectionManager;
use crate::ide::endpoint::IdeEndpoint;
use crate::ide::forwarder;

/// Delay before re-running discovery after a failed forward; the IDE most
/// likely restarted on a different port.
const REDISCOVERY_DELAY: Duration = Duration::from_millis(100);

/// Routes MCP requests to the forwarding layer.
pub struct BridgeServerHandler {
    connection: ConnectionManager,
}

impl BridgeServerHandler {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Resolve an endpoint to forward to, running discovery on a cache miss.
    async fn require_endpoint(&self) -> Option<IdeEndpoint> {
        if let Some(endpoint) = self.connection.cached_endpoint() {
            return Some(endpoint);
        }
        tracing::debug!("no cached endpoint available, attempting discovery");
        self.connection.update_ide_endpoint().await;
        self.connection.cached_endpoint()
    }

    fn schedule_rediscovery(&self) {
        let connection = self.connection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REDISCOVERY_DELAY).await;
            connection.update_ide_endpoint().await;
        });
    }

    /// Error-flagged result for tool calls arriving while no IDE is reachable.
    /// The client expects a result envelope for invocations, never a raised
    /// transport error.
    fn not_connected_result() -> CallToolResult {
        let mut result = CallToolResult::text_content(vec![TextContent::from(
            "Not connected to the IDE. Make sure the IDE is running with its MCP plugin installed."
                .to_string(),
        )]);
        result.is_error = Some(true);
        result
    }
}

#[async_trait]
impl ServerHandlerCore for BridgeServerHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::info!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                // Initialize: enforce protocol compatibility and return server info
                ClientRequest::InitializeRequest(initialize_request) => {
                    tracing::debug!(
                        "initialize_request: client_protocol={}",
                        initialize_request.params.protocol_version
                    );
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                // List tools: forwarded to the IDE
                ClientRequest::ListToolsRequest(_) => {
                    let Some(endpoint) = self.require_endpoint().await else {
                        tracing::warn!("list_tools requested but no IDE endpoint is available");
                        return Err(RpcError::internal_error().with_message(
                            "Waiting for the IDE to start. Make sure it is running with its MCP plugin installed."
                                .to_string(),
                        ));
                    };
                    let config = self.connection.config();
                    match forwarder::fetch_tools_list(
                        self.connection.http(),
                        &endpoint,
                        config.list_timeout,
                    )
                    .await
                    {
                        Ok(tools) => {
                            tracing::info!("list_tools forwarded (count={})", tools.len());
                            Ok(ListToolsResult {
                                meta: None,
                                next_cursor: None,
                                tools,
                            }
                            .into())
                        }
                        Err(e) => {
                            tracing::error!("failed to list tools from {endpoint}: {e}");
                            self.schedule_rediscovery();
                            Err(RpcError::internal_error().with_message(e.to_string()))
                        }
                    }
                }

                // Call tool: forwarded to the IDE, always answered with a result
                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    let arguments =
                        JsonValue::Object(request.params.arguments.clone().unwrap_or_default());
                    tracing::info!("call_tool request: tool={}", tool);

                    let Some(endpoint) = self.require_endpoint().await else {
                        tracing::error!(
                            "cannot handle tool call '{tool}', no IDE connection available"
                        );
                        return Ok(Self::not_connected_result().into());
                    };

                    let config = self.connection.config();
                    let result = forwarder::forward_tool_call(
                        self.connection.http(),
                        &tool,
                        arguments,
                        &endpoint,
                        config.call_timeout,
                    )
                    .await;
                    Ok(result.into())
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(_) => {
                tracing::warn!("custom request not implemented");
                Err(RpcError::method_not_found()
                    .with_message("No handler is implemented for custom requests.".to_string()))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        match &notification {
            NotificationFromClient::ClientNotification(_) => {
                tracing::debug!("handle_notification: client notification")
            }
            NotificationFromClient::CustomNotification(_) => {
                tracing::debug!("handle_notification: custom notification")
            }
        }
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_result_is_error_flagged() {
        let result = BridgeServerHandler::not_connected_result();
        let val = serde_json::to_value(&result).expect("serialize result");
        assert_eq!(val["isError"], true);
        let text = val["content"][0]["text"].as_str().expect("text content");
        assert!(text.contains("IDE is running"));
    }
}
