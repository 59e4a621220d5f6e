//! `LLMClient` implementation for any OpenAI Chat-Completions-compatible endpoint.
//!
//! Covers OpenAI itself as well as the many gateways that mirror its wire
//! format (DeepSeek, local inference servers, etc.) — the base URL is the only
//! thing that changes, matching the original source's `platform_config.api_url`
//! indirection.
//!
//! # Example
//!
//! ```rust,no_run
//! use transflow::transflow::clients::openai_compatible::OpenAICompatibleClient;
//! use transflow::transflow::llm_client::{LLMClient, Message, PlatformConfig};
//!
//! # async {
//! let client = OpenAICompatibleClient::new("https://api.deepseek.com/v1");
//! let platform = PlatformConfig::new("deepseek-chat", "sk-...");
//! let reply = client
//!     .send(&[Message::user("Hello")], "Be concise.", &platform)
//!     .await
//!     .unwrap();
//! println!("{}", reply.content);
//! # };
//! ```

use crate::transflow::error::TransflowError;
use crate::transflow::llm_client::{LLMClient, LLMResponse, Message, PlatformConfig, Role};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// Thin `reqwest`-backed client targeting the Chat Completions wire format.
pub struct OpenAICompatibleClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAICompatibleClient {
    /// Build a client pointed at `base_url` (no trailing slash expected, e.g.
    /// `"https://api.openai.com/v1"`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn send(
        &self,
        messages: &[Message],
        system_prompt: &str,
        platform_config: &PlatformConfig,
    ) -> Result<LLMResponse, TransflowError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(json!({"role": "system", "content": system_prompt}));
        }
        for message in messages {
            wire_messages.push(json!({
                "role": Self::role_str(message.role),
                "content": message.content.as_ref(),
            }));
        }

        let body = json!({
            "model": platform_config.model_name,
            "messages": wire_messages,
            "temperature": platform_config.temperature,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&platform_config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransflowError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransflowError::Transient(format!(
                "non-2xx response: {}",
                response.status()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TransflowError::Transient(e.to_string()))?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(LLMResponse {
                skipped: true,
                ..Default::default()
            });
        };

        let content = choice.message.content.unwrap_or_default();
        let skipped = content.is_empty() || choice.finish_reason.as_deref() == Some("content_filter");

        Ok(LLMResponse {
            skipped,
            reasoning: choice.message.reasoning_content.unwrap_or_default(),
            content,
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        })
    }
}
