//! Language-model abstraction used for summarization and answering.
//!
//! - **[`DisabledModel`]**: always fails; used when `llm.provider = "disabled"`.
//! - **[`OpenAIChatModel`]**: calls the chat completions API with retry and
//!   exponential backoff.
//!
//! The memory manager only needs [`LanguageModel::generate`]; the `ask`
//! command uses [`LanguageModel::chat`] for the final answer.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::ConversationTurn;
use crate::retry;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Complete a single prompt.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Answer an ordered message list.
    ///
    /// The default flattens the messages into one prompt, which is enough for
    /// completion-only backends.
    async fn chat(&self, messages: &[ConversationTurn], max_tokens: usize) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.generate(&prompt, max_tokens).await
    }
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI ============

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat model backed by `POST /v1/chat/completions`.
pub struct OpenAIChatModel {
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn complete(&self, messages: serde_json::Value, max_tokens: usize) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
        });

        let json = retry::post_json(
            &self.client,
            OPENAI_CHAT_URL,
            &self.api_key,
            &body,
            self.max_retries,
            "chat completion",
        )
        .await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let messages = serde_json::json!([{ "role": "user", "content": prompt }]);
        self.complete(messages, max_tokens).await
    }

    async fn chat(&self, messages: &[ConversationTurn], max_tokens: usize) -> Result<String> {
        self.complete(serde_json::to_value(messages)?, max_tokens)
            .await
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Build the configured model.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "openai" => Ok(Box::new(OpenAIChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi there" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "hi there");
        assert!(parse_chat_response(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[tokio::test]
    async fn test_default_chat_flattens_roles() {
        let out = Echo
            .chat(
                &[
                    ConversationTurn::system("rules"),
                    ConversationTurn::user("question"),
                ],
                10,
            )
            .await
            .unwrap();
        assert_eq!(out, "system: rules\n\nuser: question");
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        assert!(DisabledModel.generate("x", 5).await.is_err());
        assert_eq!(create_model(&LlmConfig::default()).unwrap().model_name(), "disabled");
    }
}
