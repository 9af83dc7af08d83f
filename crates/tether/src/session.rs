//! Client-side session against a tool provider.
//!
//! A session owns exactly one transport. Opening performs the handshake and
//! tool discovery; discovery runs once and the tool set is cached for the
//! session's lifetime. Once the transport drops or `close` is called, every
//! further operation fails fast.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::tool::Tool;
use crate::protocol::{
    CallToolResult, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerInfo, PROTOCOL_VERSION,
};
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The channel dropped while a call was in flight. Fatal to the session.
    #[error("transport closed")]
    TransportClosed,

    /// Handshake or discovery failed; the session never reached ready.
    #[error("session initialization failed: {0}")]
    InitializationFailed(String),

    /// The session was already closed when the operation was attempted.
    #[error("session is closed")]
    SessionClosed,

    /// The peer violated the request/response contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A ready session. Constructed only by [`Session::open`]; a session that
/// failed initialization is never observable.
pub struct Session {
    server_info: ServerInfo,
    tools: Vec<Tool>,
    // None once closed. The lock also serializes concurrent calls, since the
    // underlying transport does not multiplex requests.
    channel: Mutex<Option<Box<dyn Transport>>>,
    next_id: AtomicI64,
}

impl Session {
    /// Open a session over `transport`: initialize, acknowledge, discover
    /// tools. Any failure closes the transport and surfaces as
    /// [`SessionError::InitializationFailed`].
    pub async fn open(mut transport: Box<dyn Transport>) -> Result<Self, SessionError> {
        let mut next_id = 1i64;
        match handshake(transport.as_mut(), &mut next_id).await {
            Ok((server_info, tools)) => {
                tracing::info!(
                    server = %server_info.name,
                    tools = tools.len(),
                    "session ready"
                );
                Ok(Session {
                    server_info,
                    tools,
                    channel: Mutex::new(Some(transport)),
                    next_id: AtomicI64::new(next_id),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "session initialization failed");
                // transport dropped here, releasing the channel (and any
                // spawned provider process) before the error is returned
                Err(SessionError::InitializationFailed(e.to_string()))
            }
        }
    }

    /// The tool set discovered at open. Static per connection.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Whether the session still holds its channel.
    pub async fn is_open(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Invoke a tool on the provider.
    ///
    /// Provider-side rejections (unknown tool, bad params, tool failure)
    /// come back as an error-flagged [`CallToolResult`], which is data for
    /// the conversation. Only channel loss or a closed session produce an
    /// `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, SessionError> {
        let mut guard = self.channel.lock().await;
        let transport = guard.as_mut().ok_or(SessionError::SessionClosed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tool = %name, id, "calling tool");
        let params = json!({ "name": name, "arguments": arguments });

        match request(transport.as_mut(), id, "tools/call", Some(params)).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    return Ok(CallToolResult::error(error.message));
                }
                let value = response
                    .result
                    .ok_or_else(|| SessionError::Protocol("response missing result".into()))?;
                Ok(serde_json::from_value(value)?)
            }
            Err(SessionError::TransportClosed) | Err(SessionError::Io(_)) => {
                // Channel is gone; drop it so later callers fail fast with
                // SessionClosed instead of hitting a dead transport.
                *guard = None;
                Err(SessionError::TransportClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the session, releasing the transport. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.channel.lock().await;
        if guard.take().is_some() {
            tracing::info!(server = %self.server_info.name, "session closed");
        }
    }
}

async fn handshake(
    transport: &mut dyn Transport,
    next_id: &mut i64,
) -> Result<(ServerInfo, Vec<Tool>), SessionError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "tether",
            "version": env!("CARGO_PKG_VERSION"),
        }
    });

    let response = request(transport, take_id(next_id), "initialize", Some(params)).await?;
    let init: InitializeResult = serde_json::from_value(expect_result(response)?)?;

    let notification = JsonRpcNotification::new("notifications/initialized", None);
    transport.send(&serde_json::to_string(&notification)?).await?;

    let response = request(transport, take_id(next_id), "tools/list", None).await?;
    let listed: ListToolsResult = serde_json::from_value(expect_result(response)?)?;
    let tools: Vec<Tool> = listed.tools.into_iter().map(Tool::from).collect();

    tracing::debug!(count = tools.len(), "tool discovery complete");
    Ok((init.server_info, tools))
}

/// One correlated request/response exchange.
async fn request(
    transport: &mut dyn Transport,
    id: i64,
    method: &str,
    params: Option<Value>,
) -> Result<JsonRpcResponse, SessionError> {
    let req = JsonRpcRequest::new(id, method, params);
    transport.send(&serde_json::to_string(&req)?).await?;

    let frame = transport
        .receive()
        .await?
        .ok_or(SessionError::TransportClosed)?;
    let response: JsonRpcResponse = serde_json::from_str(&frame)?;
    if response.id != id {
        return Err(SessionError::Protocol(format!(
            "response id {} does not match request id {}",
            response.id, id
        )));
    }
    Ok(response)
}

fn expect_result(response: JsonRpcResponse) -> Result<Value, SessionError> {
    if let Some(error) = response.error {
        return Err(SessionError::Protocol(error.message));
    }
    response
        .result
        .ok_or_else(|| SessionError::Protocol("response missing result".into()))
}

fn take_id(next_id: &mut i64) -> i64 {
    let id = *next_id;
    *next_id += 1;
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{error_codes, ServerCapabilities};
    use crate::transport::DuplexTransport;

    // Scripted provider end: answers the handshake, then runs `handler` for
    // each subsequent request until the channel closes.
    async fn scripted_provider<F>(mut transport: DuplexTransport, tools: Value, mut handler: F)
    where
        F: FnMut(JsonRpcRequest) -> Option<JsonRpcResponse> + Send,
    {
        while let Ok(Some(frame)) = transport.receive().await {
            let raw: Value = serde_json::from_str(&frame).unwrap();
            if raw.get("id").is_none() {
                continue; // notification
            }
            let request: JsonRpcRequest = serde_json::from_value(raw).unwrap();
            let response = match request.method.as_str() {
                "initialize" => Some(JsonRpcResponse::success(
                    request.id,
                    serde_json::to_value(InitializeResult {
                        protocol_version: PROTOCOL_VERSION.to_string(),
                        capabilities: ServerCapabilities::default(),
                        server_info: ServerInfo {
                            name: "scripted".to_string(),
                            version: None,
                        },
                    })
                    .unwrap(),
                )),
                "tools/list" => Some(JsonRpcResponse::success(
                    request.id,
                    json!({ "tools": tools.clone() }),
                )),
                _ => handler(request),
            };
            match response {
                Some(response) => {
                    let frame = serde_json::to_string(&response).unwrap();
                    if transport.send(&frame).await.is_err() {
                        break;
                    }
                }
                None => break, // simulate the provider dying mid-call
            }
        }
    }

    fn weather_tools() -> Value {
        json!([{
            "name": "fetch_weather",
            "description": "Current weather for a city",
            "inputSchema": {"type": "object", "required": ["city"]}
        }])
    }

    #[tokio::test]
    async fn test_open_discovers_tools() {
        let (client, server) = DuplexTransport::pair();
        tokio::spawn(scripted_provider(server, weather_tools(), |request| {
            Some(JsonRpcResponse::success(
                request.id,
                json!({"content": [{"type": "text", "text": "sunny"}]}),
            ))
        }));

        let session = Session::open(Box::new(client)).await.unwrap();
        assert!(session.is_open().await);
        assert_eq!(session.server_info().name, "scripted");
        assert_eq!(session.tools().len(), 1);
        assert_eq!(session.tools()[0].name, "fetch_weather");

        let result = session
            .call_tool("fetch_weather", json!({"city": "Tokyo"}))
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_failed_initialization_never_ready() {
        let (client, server) = DuplexTransport::pair();
        // Provider refuses the handshake.
        tokio::spawn(async move {
            let mut transport = server;
            let frame = transport.receive().await.unwrap().unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&frame).unwrap();
            let response = JsonRpcResponse::error(
                request.id,
                error_codes::INTERNAL_ERROR,
                "unsupported protocol version",
            );
            let _ = transport.send(&serde_json::to_string(&response).unwrap()).await;
        });

        let result = Session::open(Box::new(client)).await;
        assert!(matches!(result, Err(SessionError::InitializationFailed(_))));
    }

    #[tokio::test]
    async fn test_peer_gone_during_handshake_is_initialization_failure() {
        let (client, server) = DuplexTransport::pair();
        drop(server);

        let result = Session::open(Box::new(client)).await;
        assert!(matches!(result, Err(SessionError::InitializationFailed(_))));
    }

    #[tokio::test]
    async fn test_call_after_close_fails_fast() {
        let (client, server) = DuplexTransport::pair();
        tokio::spawn(scripted_provider(server, weather_tools(), |request| {
            Some(JsonRpcResponse::success(
                request.id,
                json!({"content": [{"type": "text", "text": "sunny"}]}),
            ))
        }));

        let session = Session::open(Box::new(client)).await.unwrap();
        session.close().await;
        assert!(!session.is_open().await);

        let result = session.call_tool("fetch_weather", json!({"city": "Tokyo"})).await;
        assert!(matches!(result, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_transport_drop_mid_call() {
        let (client, server) = DuplexTransport::pair();
        // Provider dies on the first tools/call instead of replying.
        tokio::spawn(scripted_provider(server, weather_tools(), |_| None));

        let session = Session::open(Box::new(client)).await.unwrap();
        let result = session.call_tool("fetch_weather", json!({"city": "Tokyo"})).await;
        assert!(matches!(result, Err(SessionError::TransportClosed)));

        // Later callers fail fast rather than hitting a dead channel.
        let result = session.call_tool("fetch_weather", json!({"city": "Tokyo"})).await;
        assert!(matches!(result, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_provider_rejection_is_data() {
        let (client, server) = DuplexTransport::pair();
        tokio::spawn(scripted_provider(server, weather_tools(), |request| {
            Some(JsonRpcResponse::error(
                request.id,
                error_codes::INVALID_PARAMS,
                "WEATHER_API_KEY is not configured",
            ))
        }));

        let session = Session::open(Box::new(client)).await.unwrap();
        let result = session
            .call_tool("fetch_weather", json!({"city": "Tokyo"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(session.is_open().await);
    }
}
