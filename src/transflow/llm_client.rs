//! The out-of-scope LLM transport contract.
//!
//! Everything that actually talks to a model provider is deliberately outside
//! this crate's responsibility — the orchestration engine only needs a single
//! narrow seam: "send these messages with this system prompt against this
//! platform config, get back text plus token counts." [`LLMClient`] is that
//! seam.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transflow::transflow::llm_client::{LLMClient, Message, PlatformConfig, Role};
//! use transflow::transflow::clients::openai_compatible::OpenAICompatibleClient;
//!
//! # async {
//! let client = OpenAICompatibleClient::new("https://api.openai.com/v1");
//! let platform = PlatformConfig::new("gpt-4.1-mini", "sk-...");
//! let response = client
//!     .send(
//!         &[Message { role: Role::User, content: Arc::from("Translate: hello") }],
//!         "You are a translator.",
//!         &platform,
//!     )
//!     .await
//!     .unwrap();
//! println!("{}", response.content);
//! # };
//! ```

use crate::transflow::error::TransflowError;
use async_trait::async_trait;
use std::sync::Arc;

/// The role a chat message was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Primes or constrains assistant behavior.
    System,
    /// A user-authored turn.
    User,
    /// An assistant-authored turn (prior model output, used for multi-turn
    /// TEaR prompts such as back-translation-with-context).
    Assistant,
}

/// A single chat message handed to [`LLMClient::send`].
#[derive(Debug, Clone)]
pub struct Message {
    /// Authoring role.
    pub role: Role,
    /// Message body, cheap to clone across chunk/retry boundaries.
    pub content: Arc<str>,
}

impl Message {
    /// Construct a user-role message.
    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Connection details for a single LLM-backed platform.
///
/// Mirrors the original source's per-step `platform_config` indirection: each
/// pipeline step (translation, back-translation, terminology, ...) can be
/// routed at a different model/provider by constructing a different
/// `PlatformConfig`, even though they all flow through the same [`LLMClient`].
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    pub api_url: String,
    /// Bearer credential. Empty string is valid for unauthenticated/local gateways.
    pub api_key: String,
    /// Model identifier as the provider expects it (e.g. `"gpt-4.1-mini"`, `"deepseek-chat"`).
    pub model_name: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl PlatformConfig {
    /// Build a platform config pointed at a model/key pair, default temperature `1.0`.
    pub fn new(model_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            temperature: 1.0,
        }
    }

    /// Override the base URL (e.g. to point at a DeepSeek-compatible gateway).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// The reply shape every [`LLMClient`] implementation must produce.
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// `true` when the provider declined to answer (safety filter, empty
    /// completion, etc.) — callers treat this identically to a transient
    /// failure, triggering the documented fallback for that call site.
    pub skipped: bool,
    /// Chain-of-thought / reasoning trace, when the provider exposes one.
    /// Never required for correctness — purely informational.
    pub reasoning: String,
    /// The model's answer.
    pub content: String,
    /// Prompt tokens billed for this call.
    pub prompt_tokens: u32,
    /// Completion tokens billed for this call.
    pub completion_tokens: u32,
}

/// Transport-level contract for talking to an LLM.
///
/// Implementations own retries, auth, and wire formatting; on a transport
/// error they should return `Err`, which the core treats as a failed call (no
/// partial state written) — never partially-populated `Ok` results.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send a chat request and await the full (non-streamed) reply.
    async fn send(
        &self,
        messages: &[Message],
        system_prompt: &str,
        platform_config: &PlatformConfig,
    ) -> Result<LLMResponse, TransflowError>;
}
