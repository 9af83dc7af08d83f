use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::message::Message;
use crate::models::tool::ToolCall;

/// Events emitted while a model provider streams a response.
/// Provider-agnostic; the provider layer translates its own wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of assistant text
    TextDelta { text: String },
    /// The model announced a tool call with a concrete name
    ToolCallStart { id: String, name: String },
    /// Incremental argument JSON for a tool call, keyed by call id
    ToolCallDelta { id: String, arguments_delta: String },
    /// The arguments for a tool call are complete
    ToolCallEnd { id: String },
    /// The turn is complete
    MessageEnd { stop_reason: StopReason },
    /// The provider reported a mid-stream problem
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of response
    EndTurn,
    /// The model wants to use tools
    ToolUse,
    /// Hit the max token limit
    MaxTokens,
}

/// Reassembles a stream of events into one assistant [`Message`].
///
/// Argument fragments are buffered per call id, so several interleaved
/// in-flight tool calls assemble independently. Calls appear in the finished
/// message in the order they were announced.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    text: String,
    calls: Vec<PendingCall>,
    stop_reason: Option<StopReason>,
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(text),
            StreamEvent::ToolCallStart { id, name } => {
                if !self.calls.iter().any(|call| &call.id == id) {
                    self.calls.push(PendingCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    });
                }
            }
            StreamEvent::ToolCallDelta {
                id,
                arguments_delta,
            } => {
                if let Some(call) = self.calls.iter_mut().find(|call| &call.id == id) {
                    call.arguments.push_str(arguments_delta);
                }
            }
            StreamEvent::ToolCallEnd { .. } => {}
            StreamEvent::MessageEnd { stop_reason } => {
                self.stop_reason = Some(stop_reason.clone());
            }
            StreamEvent::Error { .. } => {}
        }
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Produce the assembled assistant message. Undecodable call arguments
    /// become an error-carrying tool request rather than failing the turn.
    pub fn finish(self) -> Message {
        let mut message = Message::assistant();
        if !self.text.is_empty() {
            message = message.with_text(self.text.clone());
        }
        for call in self.calls {
            let arguments = if call.arguments.is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            let tool_call = match serde_json::from_str(&arguments) {
                Ok(value) => Ok(ToolCall::new(&call.name, value)),
                Err(e) => Err(AgentError::InvalidParameters(format!(
                    "could not decode arguments for call {}: {}",
                    call.id, e
                ))),
            };
            message = message.with_tool_request(call.id, tool_call);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageContent;
    use serde_json::json;

    #[test]
    fn test_assemble_text_only() {
        let mut assembler = MessageAssembler::new();
        assembler.push(&StreamEvent::TextDelta {
            text: "Hello".into(),
        });
        assembler.push(&StreamEvent::TextDelta {
            text: ", world".into(),
        });
        assembler.push(&StreamEvent::MessageEnd {
            stop_reason: StopReason::EndTurn,
        });

        assert_eq!(assembler.stop_reason(), Some(&StopReason::EndTurn));
        let message = assembler.finish();
        assert_eq!(message.text(), "Hello, world");
        assert!(message.tool_requests().is_empty());
    }

    #[test]
    fn test_assemble_interleaved_calls() {
        // Fragments for two in-flight calls arrive interleaved; each call
        // must assemble from its own fragments only.
        let mut assembler = MessageAssembler::new();
        assembler.push(&StreamEvent::ToolCallStart {
            id: "a".into(),
            name: "fetch_weather".into(),
        });
        assembler.push(&StreamEvent::ToolCallStart {
            id: "b".into(),
            name: "count_words".into(),
        });
        assembler.push(&StreamEvent::ToolCallDelta {
            id: "a".into(),
            arguments_delta: "{\"city\":".into(),
        });
        assembler.push(&StreamEvent::ToolCallDelta {
            id: "b".into(),
            arguments_delta: "{\"text\": \"hi\"}".into(),
        });
        assembler.push(&StreamEvent::ToolCallDelta {
            id: "a".into(),
            arguments_delta: " \"Tokyo\"}".into(),
        });
        assembler.push(&StreamEvent::ToolCallEnd { id: "b".into() });
        assembler.push(&StreamEvent::ToolCallEnd { id: "a".into() });
        assembler.push(&StreamEvent::MessageEnd {
            stop_reason: StopReason::ToolUse,
        });

        let message = assembler.finish();
        let requests = message.tool_requests();
        assert_eq!(requests.len(), 2);
        // Announcement order, not completion order
        assert_eq!(requests[0].id, "a");
        assert_eq!(requests[1].id, "b");
        let call_a = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(call_a.arguments, json!({"city": "Tokyo"}));
        let call_b = requests[1].tool_call.as_ref().unwrap();
        assert_eq!(call_b.arguments, json!({"text": "hi"}));
    }

    #[test]
    fn test_assemble_bad_arguments_become_data() {
        let mut assembler = MessageAssembler::new();
        assembler.push(&StreamEvent::ToolCallStart {
            id: "a".into(),
            name: "fetch_weather".into(),
        });
        assembler.push(&StreamEvent::ToolCallDelta {
            id: "a".into(),
            arguments_delta: "{\"city\": ".into(),
        });

        let message = assembler.finish();
        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tool_call.is_err());
        assert!(matches!(
            message.content[0],
            MessageContent::ToolRequest(_)
        ));
    }

    #[test]
    fn test_empty_arguments_default_to_object() {
        let mut assembler = MessageAssembler::new();
        assembler.push(&StreamEvent::ToolCallStart {
            id: "a".into(),
            name: "current_time".into(),
        });
        assembler.push(&StreamEvent::ToolCallEnd { id: "a".into() });

        let message = assembler.finish();
        let call = message.tool_requests()[0].tool_call.clone().unwrap();
        assert_eq!(call.arguments, json!({}));
    }
}
