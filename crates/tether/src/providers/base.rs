use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::stream::{MessageAssembler, StreamEvent};

/// Failures of the model inference call. Fatal to the current turn; the
/// agent loop surfaces them to the caller rather than feeding them to the
/// model.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed")]
    Auth,

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// A model inference provider: ordered messages and tool descriptors in,
/// incremental response events out.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Stream the next assistant turn.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderEventStream, ProviderError>;

    /// Collect a full assistant message. The default assembles the streamed
    /// events; providers with a cheaper non-streaming endpoint may override.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        let mut stream = self.stream(system, messages, tools).await?;
        let mut assembler = MessageAssembler::new();
        while let Some(event) = stream.next().await {
            assembler.push(&event?);
        }
        Ok((assembler.finish(), Usage::default()))
    }
}
