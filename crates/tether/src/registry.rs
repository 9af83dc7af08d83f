//! Uniform tool lookup and dispatch.
//!
//! The registry normalizes tools from two kinds of backends, in-process
//! [`Toolkit`]s and remote [`Session`]s, into one flat, name-unique set of
//! descriptors. It is populated before the first turn and read-only after.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::protocol::{CallToolResult, ToolContent};
use crate::session::{Session, SessionError};
use crate::toolkit::Toolkit;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateTool(String),
}

/// Where a registered tool's provider came from; rendered into the system
/// prompt.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

struct RegisteredTool {
    descriptor: Tool,
    backend: Backend,
}

enum Backend {
    Toolkit(Arc<dyn Toolkit>),
    Session(Arc<Session>),
}

#[derive(Default)]
pub struct ToolRegistry {
    // Vec keeps registration order, so tool listings (and the rendered
    // system prompt) are deterministic.
    entries: Vec<RegisteredTool>,
    sources: Vec<SourceInfo>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool of an in-process toolkit.
    pub fn register_toolkit(&mut self, toolkit: Arc<dyn Toolkit>) -> Result<(), RegistryError> {
        for tool in toolkit.tools() {
            self.insert(tool.clone(), Backend::Toolkit(Arc::clone(&toolkit)))?;
        }
        self.sources.push(SourceInfo {
            name: toolkit.name().to_string(),
            description: toolkit.description().to_string(),
            instructions: toolkit.instructions().to_string(),
        });
        Ok(())
    }

    /// Register the tool set a session discovered at open.
    pub fn register_session(&mut self, session: Arc<Session>) -> Result<(), RegistryError> {
        for tool in session.tools() {
            self.insert(tool.clone(), Backend::Session(Arc::clone(&session)))?;
        }
        let info = session.server_info();
        self.sources.push(SourceInfo {
            name: info.name.clone(),
            description: "remote tool provider".to_string(),
            instructions: String::new(),
        });
        Ok(())
    }

    fn insert(&mut self, descriptor: Tool, backend: Backend) -> Result<(), RegistryError> {
        if self.entries.iter().any(|e| e.descriptor.name == descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.entries.push(RegisteredTool { descriptor, backend });
        Ok(())
    }

    /// Look up a descriptor by name.
    pub fn resolve(&self, name: &str) -> Option<&Tool> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| &e.descriptor)
    }

    /// All registered descriptors, in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Registered providers, for prompt rendering.
    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execute one tool call.
    ///
    /// Two layers of failure: the outer `Err` is a session/transport loss and
    /// aborts the turn; the inner [`AgentResult`] is data. Unknown tools,
    /// schema mismatches and provider-reported failures all flow back into
    /// the conversation as tool results.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
    ) -> Result<AgentResult<Vec<Content>>, SessionError> {
        let entry = match self.entries.iter().find(|e| e.descriptor.name == call.name) {
            Some(entry) => entry,
            None => return Ok(Err(AgentError::ToolNotFound(call.name.clone()))),
        };

        if let Err(e) = validate_arguments(&entry.descriptor.input_schema, &call.arguments) {
            return Ok(Err(e));
        }

        match &entry.backend {
            Backend::Toolkit(toolkit) => Ok(toolkit.call(call.clone()).await),
            Backend::Session(session) => {
                let result = session.call_tool(&call.name, call.arguments.clone()).await?;
                Ok(convert_call_result(result))
            }
        }
    }
}

/// Best-effort check of `arguments` against the tool's JSON schema: the
/// top-level shape and required keys only. Providers remain the authority
/// and may still reject.
fn validate_arguments(schema: &Value, arguments: &Value) -> AgentResult<()> {
    if schema.get("type").and_then(|t| t.as_str()) == Some("object") && !arguments.is_object() {
        return Err(AgentError::InvalidParameters(
            "arguments must be a JSON object".into(),
        ));
    }
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if arguments.get(key).is_none() {
                return Err(AgentError::InvalidParameters(format!(
                    "missing required parameter: {}",
                    key
                )));
            }
        }
    }
    Ok(())
}

fn convert_call_result(result: CallToolResult) -> AgentResult<Vec<Content>> {
    let contents: Vec<Content> = result
        .content
        .into_iter()
        .map(|content| match content {
            ToolContent::Text { text } => Content::text(text),
        })
        .collect();

    if result.is_error {
        let message = contents
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        Err(AgentError::ExecutionError(message))
    } else {
        Ok(contents)
    }
}
