//! In-process tool providers.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A named set of tools executed in-process. The uniform surface behind
/// which local capabilities and (via the registry) remote sessions look the
/// same to the agent loop.
#[async_trait]
pub trait Toolkit: Send + Sync {
    /// Name of the toolkit
    fn name(&self) -> &str;

    /// Short description of what the toolkit offers
    fn description(&self) -> &str;

    /// Guidance injected into the system prompt
    fn instructions(&self) -> &str {
        ""
    }

    /// The tools this toolkit exposes
    fn tools(&self) -> &[Tool];

    /// Execute one tool call. Failures are returned as values; the loop
    /// forwards them to the model as tool results.
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// Built-in toolkit used by `tether serve` and the examples: no network,
/// no credentials, enough to exercise a full decide-act-observe turn.
pub struct DemoToolkit {
    tools: Vec<Tool>,
}

impl DemoToolkit {
    pub fn new() -> Self {
        Self {
            tools: vec![
                Tool::new(
                    "count_words",
                    "Count the number of words in text",
                    json!({
                        "type": "object",
                        "properties": {
                            "text": {
                                "type": "string",
                                "description": "The text to count words in"
                            }
                        },
                        "required": ["text"]
                    }),
                ),
                Tool::new(
                    "current_time",
                    "Get the current UTC date and time",
                    json!({
                        "type": "object",
                        "properties": {}
                    }),
                ),
            ],
        }
    }
}

impl Default for DemoToolkit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Toolkit for DemoToolkit {
    fn name(&self) -> &str {
        "demo"
    }

    fn description(&self) -> &str {
        "Small local utilities for trying out tool calls"
    }

    fn instructions(&self) -> &str {
        "Use count_words for word counts and current_time for the current UTC time."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "count_words" => {
                let text = tool_call
                    .arguments
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AgentError::InvalidParameters("text parameter required".into())
                    })?;
                let count = text.split_whitespace().count();
                Ok(vec![Content::text(
                    json!({ "count": count }).to_string(),
                )])
            }
            "current_time" => Ok(vec![Content::text(Utc::now().to_rfc3339())]),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
