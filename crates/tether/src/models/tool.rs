use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool that a model can invoke mid-conversation.
///
/// Descriptors are built once per connection from provider-reported metadata
/// and are never mutated after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// Unique name within a registry
    pub name: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// JSON schema describing the accepted arguments
    pub input_schema: Value,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A concrete invocation request produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
