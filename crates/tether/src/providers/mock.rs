use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use super::base::{Provider, ProviderError, ProviderEventStream};
use crate::models::message::{Message, MessageContent};
use crate::stream::{StopReason, StreamEvent};

/// A provider that replays pre-configured responses, streamed as events the
/// way a real endpoint would deliver them.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
}

impl MockProvider {
    /// Create a mock with a sequence of responses, returned in order.
    pub fn new(responses: Vec<Message>) -> Self {
        Self::from_events(responses.iter().map(message_to_events).collect())
    }

    /// Create a mock that replays raw event sequences, for exercising
    /// stream-level edge cases (fragmented or malformed arguments).
    pub fn from_events(responses: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[crate::models::tool::Tool],
    ) -> Result<ProviderEventStream, ProviderError> {
        let events = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                vec![StreamEvent::MessageEnd {
                    stop_reason: StopReason::EndTurn,
                }]
            } else {
                responses.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// Explode a full message into the event sequence a streaming endpoint
/// would have produced for it.
fn message_to_events(message: &Message) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut has_calls = false;

    for content in &message.content {
        match content {
            MessageContent::Text(text) => events.push(StreamEvent::TextDelta {
                text: text.text.clone(),
            }),
            MessageContent::ToolRequest(request) => {
                if let Ok(call) = &request.tool_call {
                    has_calls = true;
                    events.push(StreamEvent::ToolCallStart {
                        id: request.id.clone(),
                        name: call.name.clone(),
                    });
                    events.push(StreamEvent::ToolCallDelta {
                        id: request.id.clone(),
                        arguments_delta: call.arguments.to_string(),
                    });
                    events.push(StreamEvent::ToolCallEnd {
                        id: request.id.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    events.push(StreamEvent::MessageEnd {
        stop_reason: if has_calls {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        },
    });
    events
}
