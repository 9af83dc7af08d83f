use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::base::{Provider, ProviderError, ProviderEventStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_context_length_error, messages_to_openai_spec, response_to_message,
    tools_to_openai_spec, usage_from_response, OpenAiStreamState,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Provider for OpenAI-compatible chat completions endpoints
/// (api.openai.com, api.deepseek.com, and friends).
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client, config })
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> Result<Value, ProviderError> {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
        });
        let body = payload.as_object_mut().unwrap();

        if !tools.is_empty() {
            body.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
        }
        if let Some(temperature) = self.config.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if stream {
            body.insert("stream".to_string(), json!(true));
        }

        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Auth),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                Err(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                })
            }
            _ => {
                if let Some(message) = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v.get("error").and_then(check_context_length_error))
                {
                    return Err(ProviderError::ContextLengthExceeded(message));
                }
                Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderEventStream, ProviderError> {
        let payload = self.build_payload(system, messages, tools, true)?;
        tracing::debug!(model = %self.config.model, "starting streaming completion");
        let response = self.post(&payload).await?;
        let mut bytes = response.bytes_stream();

        let events = async_stream::try_stream! {
            let mut state = OpenAiStreamState::new();
            let mut buffer = String::new();
            let mut done = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| ProviderError::Stream(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        done = true;
                        break;
                    }
                    let value: Value = serde_json::from_str(data)
                        .map_err(|e| ProviderError::Stream(e.to_string()))?;
                    for event in state.push_chunk(&value) {
                        yield event;
                    }
                }
                if done {
                    break;
                }
            }

            for event in state.finish() {
                yield event;
            }
        };

        Ok(Box::pin(events))
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        let payload = self.build_payload(system, messages, tools, false)?;
        tracing::debug!(model = %self.config.model, "requesting completion");
        let response = self.post(&payload).await?;
        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(error) = data.get("error") {
            if let Some(message) = check_context_length_error(error) {
                return Err(ProviderError::ContextLengthExceeded(message));
            }
            return Err(ProviderError::Api {
                status: StatusCode::OK.as_u16(),
                message: error.to_string(),
            });
        }

        let message = response_to_message(&data)?;
        let usage = usage_from_response(&data);
        Ok((message, usage))
    }
}
