//! Conversion between the internal message/tool model and the
//! OpenAI-compatible chat completions wire format, for both the full
//! response shape and the streamed delta chunks.

use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent, ToolResponse};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::{ProviderError, Usage};
use crate::stream::{StopReason, StreamEvent};

/// Convert the internal message history to the wire's message array.
/// Tool-role messages flatten into one wire entry per tool response,
/// correlated by `tool_call_id`.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            for content in &message.content {
                if let MessageContent::ToolResponse(response) = content {
                    spec.push(tool_response_to_spec(response));
                }
            }
            continue;
        }

        let mut converted = json!({ "role": message.role });
        let mut trailing = Vec::new();

        let text = message.text();
        if !text.is_empty() {
            converted["content"] = json!(text);
        }

        for content in &message.content {
            match content {
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let sanitized_name = sanitize_function_name(&tool_call.name);
                        let tool_calls = converted
                            .as_object_mut()
                            .unwrap()
                            .entry("tool_calls")
                            .or_insert(json!([]));
                        tool_calls.as_array_mut().unwrap().push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitized_name,
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        // The request never became a valid call; report the
                        // failure in its place so the model can see it.
                        trailing.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id,
                        }));
                    }
                },
                MessageContent::Image(image) => {
                    converted["content"] = json!([{
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", image.mime_type, image.data)
                        }
                    }]);
                }
                _ => {}
            }
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            spec.push(converted);
        }
        spec.extend(trailing);
    }

    spec
}

fn tool_response_to_spec(response: &ToolResponse) -> Value {
    match &response.tool_result {
        Ok(contents) => {
            let text = contents
                .iter()
                .map(|content| match content {
                    Content::Text(text) => text.text.clone(),
                    Content::Image(image) => format!("[image: {}]", image.mime_type),
                })
                .collect::<Vec<_>>()
                .join("\n");
            json!({
                "role": "tool",
                "content": text,
                "tool_call_id": response.id,
            })
        }
        Err(e) => json!({
            "role": "tool",
            "content": format!("The tool call returned the following error:\n{}", e),
            "tool_call_id": response.id,
        }),
    }
}

/// Convert tool descriptors to the wire's function-tool array.
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::InvalidResponse(format!(
                "duplicate tool name: {}",
                tool.name
            )));
        }
        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert a non-streaming completion response to an assistant message.
pub fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = &response["choices"][0]["message"];
    if original.is_null() {
        return Err(ProviderError::InvalidResponse(
            "response carries no message".into(),
        ));
    }

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "the function name '{}' has invalid characters, it must match [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                match serde_json::from_str::<Value>(&arguments) {
                    Ok(params) => {
                        message = message
                            .with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "could not decode arguments for call {}: {}",
                            id, e
                        ));
                        message = message.with_tool_request(id, Err(error));
                    }
                }
            }
        }
    }

    Ok(message)
}

/// Token usage from a completion response; absent fields stay None.
pub fn usage_from_response(response: &Value) -> Usage {
    let usage = &response["usage"];
    let input_tokens = usage["prompt_tokens"].as_i64().map(|v| v as i32);
    let output_tokens = usage["completion_tokens"].as_i64().map(|v| v as i32);
    let total_tokens = usage["total_tokens"].as_i64().map(|v| v as i32).or(
        match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        },
    );
    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// Translates streamed delta chunks into [`StreamEvent`]s.
///
/// The wire identifies a call by array index within the turn and only sends
/// its id on the first fragment, so the index→id mapping is tracked here and
/// every emitted event is keyed by the call id.
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    open_calls: Vec<(u64, String)>,
    ended: bool,
}

impl OpenAiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let Some(choice) = chunk["choices"].get(0) else {
            return events;
        };

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(StreamEvent::TextDelta {
                    text: text.to_string(),
                });
            }
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tool_call in tool_calls {
                let index = tool_call["index"].as_u64().unwrap_or(0);
                if let Some(id) = tool_call["id"].as_str().filter(|id| !id.is_empty()) {
                    let name = tool_call["function"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    self.open_calls.push((index, id.to_string()));
                    events.push(StreamEvent::ToolCallStart {
                        id: id.to_string(),
                        name,
                    });
                }
                if let Some(arguments) = tool_call["function"]["arguments"].as_str() {
                    if !arguments.is_empty() {
                        if let Some((_, id)) =
                            self.open_calls.iter().find(|(i, _)| *i == index)
                        {
                            events.push(StreamEvent::ToolCallDelta {
                                id: id.clone(),
                                arguments_delta: arguments.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            for (_, id) in self.open_calls.drain(..) {
                events.push(StreamEvent::ToolCallEnd { id });
            }
            events.push(StreamEvent::MessageEnd {
                stop_reason: match reason {
                    "tool_calls" => StopReason::ToolUse,
                    "length" => StopReason::MaxTokens,
                    _ => StopReason::EndTurn,
                },
            });
            self.ended = true;
        }

        events
    }

    /// Close anything left open when the stream ends without a finish reason.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.ended {
            return Vec::new();
        }
        self.ended = true;
        let mut events: Vec<StreamEvent> = self
            .open_calls
            .drain(..)
            .map(|(_, id)| StreamEvent::ToolCallEnd { id })
            .collect();
        events.push(StreamEvent::MessageEnd {
            stop_reason: StopReason::EndTurn,
        });
        events
    }
}

fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

/// Some endpoints report exceeded context windows inside an error object.
pub fn check_context_length_error(error: &Value) -> Option<String> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        Some(
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        )
    } else {
        None
    }
}
