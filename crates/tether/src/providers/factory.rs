use anyhow::{Context, Result};
use strum_macros::{Display, EnumString};

use super::base::Provider;
use super::configs::OpenAiProviderConfig;
use super::openai::OpenAiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    DeepSeek,
}

impl ProviderType {
    pub fn default_host(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "https://api.openai.com",
            ProviderType::DeepSeek => "https://api.deepseek.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "gpt-4o-mini",
            ProviderType::DeepSeek => "deepseek-chat",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "OPENAI_API_KEY",
            ProviderType::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

/// Build a config from the environment, loading `.env` first.
pub fn config_from_env(provider_type: ProviderType) -> Result<OpenAiProviderConfig> {
    dotenv::dotenv().ok();
    let api_key = std::env::var(provider_type.api_key_var())
        .with_context(|| format!("{} must be set", provider_type.api_key_var()))?;
    Ok(OpenAiProviderConfig::new(
        provider_type.default_host(),
        api_key,
        provider_type.default_model(),
    ))
}

/// Instantiate a provider. DeepSeek speaks the same chat-completions wire
/// format, so both variants construct the OpenAI-compatible client.
pub fn get_provider(
    provider_type: ProviderType,
    config: OpenAiProviderConfig,
) -> Result<Box<dyn Provider>> {
    match provider_type {
        ProviderType::OpenAi | ProviderType::DeepSeek => {
            Ok(Box::new(OpenAiProvider::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!(ProviderType::from_str("openai").unwrap(), ProviderType::OpenAi);
        assert_eq!(
            ProviderType::from_str("deepseek").unwrap(),
            ProviderType::DeepSeek
        );
        assert!(ProviderType::from_str("llamacpp").is_err());
    }

    #[test]
    fn test_deepseek_defaults_match_wire() {
        let provider_type = ProviderType::DeepSeek;
        assert_eq!(provider_type.default_host(), "https://api.deepseek.com");
        assert_eq!(provider_type.default_model(), "deepseek-chat");
    }
}
