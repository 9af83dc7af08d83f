use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tool-level failures. These are data, not control flow: they are embedded
/// in the conversation as tool results so the model can react to them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Turn limit of {0} reached without a final answer")]
    TurnLimitExceeded(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
