//! Provider-side request loop.
//!
//! Exposes a set of [`Toolkit`]s to a connected session over any
//! [`Transport`]: answers `initialize`, `tools/list` and `tools/call`, and
//! shuts down when the channel closes. Tool failures are reported as
//! error-flagged results, never as dropped requests.

use std::sync::Arc;

use serde_json::Value;

use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::protocol::{
    error_codes, CallToolParams, CallToolResult, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolContent,
    ToolInfo, ToolsCapability, PROTOCOL_VERSION,
};
use crate::session::SessionError;
use crate::toolkit::Toolkit;
use crate::transport::Transport;

pub struct ToolServer {
    toolkits: Vec<Arc<dyn Toolkit>>,
    server_name: String,
    server_version: String,
}

impl ToolServer {
    pub fn new() -> Self {
        Self {
            toolkits: Vec::new(),
            server_name: "tether".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_toolkit(mut self, toolkit: Arc<dyn Toolkit>) -> Self {
        self.toolkits.push(toolkit);
        self
    }

    /// Serve requests until the transport closes.
    pub async fn run(&self, transport: &mut dyn Transport) -> Result<(), SessionError> {
        tracing::info!(server = %self.server_name, "tool server starting");

        loop {
            let frame = match transport.receive().await? {
                Some(frame) => frame,
                None => {
                    tracing::info!("transport closed, shutting down");
                    return Ok(());
                }
            };

            let raw: Value = match serde_json::from_str(&frame) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable frame");
                    let response =
                        JsonRpcResponse::error(0, error_codes::PARSE_ERROR, e.to_string());
                    transport.send(&serde_json::to_string(&response)?).await?;
                    continue;
                }
            };

            // Frames without an id are notifications.
            if raw.get("id").is_none() {
                if let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(raw) {
                    self.handle_notification(&notification);
                }
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_value(raw) {
                Ok(request) => request,
                Err(e) => {
                    let response =
                        JsonRpcResponse::error(0, error_codes::INVALID_REQUEST, e.to_string());
                    transport.send(&serde_json::to_string(&response)?).await?;
                    continue;
                }
            };

            let response = self.handle_request(&request).await;
            transport.send(&serde_json::to_string(&response)?).await?;
        }
    }

    pub async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_list_tools(request.id),
            "tools/call" => self.handle_call_tool(request.id, &request.params).await,
            method => {
                tracing::warn!(method = %method, "unknown method");
                JsonRpcResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {}", method),
                )
            }
        }
    }

    fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                tracing::debug!("client confirmed initialization");
            }
            method => {
                tracing::debug!(method = %method, "ignoring notification");
            }
        }
    }

    fn handle_initialize(&self, id: i64) -> JsonRpcResponse {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    fn handle_list_tools(&self, id: i64) -> JsonRpcResponse {
        let tools: Vec<ToolInfo> = self
            .toolkits
            .iter()
            .flat_map(|toolkit| toolkit.tools().iter().cloned().map(ToolInfo::from))
            .collect();
        match serde_json::to_value(ListToolsResult { tools }) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, id: i64, params: &Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params
            .clone()
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
        {
            Ok(params) => params,
            Err(message) => {
                return JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, message);
            }
        };

        let toolkit = match self.find_toolkit(&params.name) {
            Some(toolkit) => toolkit,
            None => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("unknown tool: {}", params.name),
                );
            }
        };

        tracing::debug!(tool = %params.name, "executing tool");
        let call = ToolCall::new(&params.name, params.arguments);
        let result = match toolkit.call(call).await {
            Ok(contents) => CallToolResult {
                content: contents.iter().map(content_to_wire).collect(),
                is_error: false,
            },
            Err(e) => CallToolResult::error(e.to_string()),
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    fn find_toolkit(&self, tool_name: &str) -> Option<&Arc<dyn Toolkit>> {
        self.toolkits
            .iter()
            .find(|toolkit| toolkit.tools().iter().any(|tool: &Tool| tool.name == tool_name))
    }
}

impl Default for ToolServer {
    fn default() -> Self {
        Self::new()
    }
}

fn content_to_wire(content: &Content) -> ToolContent {
    match content {
        Content::Text(text) => ToolContent::Text {
            text: text.text.clone(),
        },
        Content::Image(image) => ToolContent::Text {
            text: format!("[image: {}]", image.mime_type),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::DemoToolkit;
    use serde_json::json;

    fn demo_server() -> ToolServer {
        ToolServer::new().with_toolkit(Arc::new(DemoToolkit::new()))
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = demo_server();
        let request = JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test"}
            })),
        );

        let response = server.handle_request(&request).await;
        assert!(response.error.is_none());
        let result: InitializeResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "tether");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let server = demo_server();
        let request = JsonRpcRequest::new(2, "tools/list", None);

        let response = server.handle_request(&request).await;
        let result: ListToolsResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.tools.len(), 2);
        assert_eq!(result.tools[0].name, "count_words");
    }

    #[tokio::test]
    async fn test_call_tool() {
        let server = demo_server();
        let request = JsonRpcRequest::new(
            3,
            "tools/call",
            Some(json!({"name": "count_words", "arguments": {"text": "a b c d"}})),
        );

        let response = server.handle_request(&request).await;
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(!result.is_error);
        let ToolContent::Text { text } = &result.content[0];
        assert_eq!(text, r#"{"count":4}"#);
    }

    #[tokio::test]
    async fn test_call_tool_failure_is_flagged_result() {
        let server = demo_server();
        let request = JsonRpcRequest::new(
            4,
            "tools/call",
            Some(json!({"name": "count_words", "arguments": {}})),
        );

        let response = server.handle_request(&request).await;
        assert!(response.error.is_none());
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let server = demo_server();
        let request = JsonRpcRequest::new(
            5,
            "tools/call",
            Some(json!({"name": "nonexistent", "arguments": {}})),
        );

        let response = server.handle_request(&request).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let server = demo_server();
        let request = JsonRpcRequest::new(6, "resources/list", None);

        let response = server.handle_request(&request).await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }
}
