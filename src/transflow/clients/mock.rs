//! Scripted [`LLMClient`] used by this crate's own test suite (and available
//! to downstream integration tests) to drive the pipeline deterministically
//! without a network call.
//!
//! # Example
//!
//! ```rust
//! use transflow::transflow::clients::mock::ScriptedLLMClient;
//!
//! let client = ScriptedLLMClient::new(vec!["<textarea>\n1.Hola\n</textarea>"]);
//! assert_eq!(client.call_count(), 0);
//! ```

use crate::transflow::error::TransflowError;
use crate::transflow::llm_client::{LLMClient, LLMResponse, Message, PlatformConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A client that replays a fixed script of responses, one per call, and
/// repeats the last entry once exhausted. Every call is recorded so tests can
/// assert on prompts sent (e.g. to check terminology injection).
pub struct ScriptedLLMClient {
    responses: Vec<LLMResponse>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<CapturedCall>>,
}

/// A single recorded invocation of [`ScriptedLLMClient::send`].
#[derive(Debug, Clone)]
pub struct CapturedCall {
    /// Concatenated content of every message in the request, newline-joined.
    pub messages: String,
    /// The system prompt sent with the request.
    pub system_prompt: String,
}

impl ScriptedLLMClient {
    /// Build a client that answers with each string in order, as a
    /// successful non-skipped response with no token accounting.
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            responses: replies
                .into_iter()
                .map(|content| LLMResponse {
                    content: content.to_string(),
                    ..Default::default()
                })
                .collect(),
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Build a client from fully-formed [`LLMResponse`]s (to script skips,
    /// token counts, etc.).
    pub fn with_responses(responses: Vec<LLMResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of `send` calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Snapshot of every call made so far, in order.
    pub async fn captured_calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn send(
        &self,
        messages: &[Message],
        system_prompt: &str,
        _platform_config: &PlatformConfig,
    ) -> Result<LLMResponse, TransflowError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().await.push(CapturedCall {
            messages: messages
                .iter()
                .map(|m| m.content.as_ref())
                .collect::<Vec<_>>()
                .join("\n"),
            system_prompt: system_prompt.to_string(),
        });

        self.responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .ok_or_else(|| TransflowError::Transient("no scripted response available".into()))
    }
}
