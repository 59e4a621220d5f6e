//! Configuration for the translation pipeline.
//!
//! [`TranslationConfig`] collects every knob the orchestration engine reads.
//! As with most crates in this space, the struct is intentionally free of
//! file-format parsing — callers build it however they like (TOML,
//! environment, a settings UI) and hand it to
//! [`crate::transflow::workflow::WorkflowManager`].
//!
//! # Example
//!
//! ```rust
//! use transflow::TranslationConfig;
//!
//! let config = TranslationConfig::default();
//! assert_eq!(config.source_language, "auto");
//! assert!(config.tokens_limit_switch ^ config.lines_limit_switch);
//! ```

use serde::{Deserialize, Serialize};

/// How bilingual output should order the source and target text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BilingualTextOrder {
    /// Source line immediately followed by its translation.
    SourceFirst,
    /// Translation immediately followed by its source line.
    TranslationFirst,
}

impl Default for BilingualTextOrder {
    fn default() -> Self {
        BilingualTextOrder::SourceFirst
    }
}

/// Global configuration for a translation run.
///
/// Every field here corresponds to one entry in the configuration list
/// recognized by the orchestration engine; nothing is inferred implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Whether the multi-agent pipeline is active at all. When `false`,
    /// callers are expected to fall back to a simpler single-pass path
    /// outside this crate; `WorkflowManager` always assumes `true`.
    pub use_multi_agent_mode: bool,

    /// Cap batches by line count instead of token estimate. Exactly one of
    /// `lines_limit_switch` / `tokens_limit_switch` must be `true`.
    pub lines_limit_switch: bool,
    /// Cap batches by a token estimate instead of line count.
    pub tokens_limit_switch: bool,
    /// Line-count ceiling used when `lines_limit_switch` is set.
    pub lines_limit: u32,
    /// Token-count ceiling used when `tokens_limit_switch` is set.
    pub tokens_limit: u32,

    /// Worker thread/task count for the translation pool. `0` means "pick
    /// automatically from the planner's complexity tier" (see
    /// [`crate::transflow::planner::Planner`]).
    pub user_thread_counts: u32,

    /// Per-request timeout in seconds, enforced by [`crate::transflow::llm_client::LLMClient`]
    /// callers (the rate limiter applies its own, separate timeout).
    pub request_timeout_secs: u64,

    /// Maximum number of TEaR refine rounds per chunk before giving up and
    /// keeping the best-scoring version seen so far.
    pub round_limit: u32,

    /// Requests-per-minute ceiling for [`crate::transflow::rate_limiter::RateLimiter`]. `None` means unlimited.
    pub rpm_limit: Option<u32>,
    /// Tokens-per-minute ceiling for [`crate::transflow::rate_limiter::RateLimiter`]. `None` means unlimited.
    pub tpm_limit: Option<u32>,

    /// Number of preceding atoms included as context in each chunk's prompt.
    pub pre_line_counts: usize,

    /// BCP-47-ish source language tag, or `"auto"`.
    pub source_language: String,
    /// BCP-47-ish target language tag.
    pub target_language: String,

    /// Suffix appended to the output filename stem (e.g. `"_en"`).
    pub output_filename_suffix: String,
    /// Ordering of source/translation lines in bilingual output files.
    pub bilingual_text_order: BilingualTextOrder,

    /// Whether to pause translation for synchronous human review of
    /// low-scoring lines.
    pub enable_human_review: bool,
    /// Quality-score threshold (0.0..=1.0) below which a line is routed to
    /// human review. Expressed on a 0..1 scale and multiplied by 10
    /// internally to match the 0..10 scoring scale used by quality reports.
    pub review_threshold: f32,
}

impl TranslationConfig {
    /// Character budget for translation chunks.
    pub const TRANSLATION_CHAR_BUDGET: usize = 6000;
    /// Character budget for terminology-identification chunks.
    pub const TERMINOLOGY_CHAR_BUDGET: usize = 6000;
    /// Character budget for term-verification batches.
    pub const TERM_VERIFICATION_CHAR_BUDGET: usize = 3000;
    /// Default size of the preceding-context window.
    pub const DEFAULT_CONTEXT_WINDOW: usize = 3;
    /// Quality score below which a translated line is flagged for refinement.
    pub const REFINEMENT_SCORE_THRESHOLD: f32 = 7.0;
    /// Default quality score substituted when scoring fails.
    pub const DEFAULT_QUALITY_SCORE: f32 = 8.0;
    /// Hard per-call LLM timeout in seconds, absent an override.
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

    /// Resolve the review-score threshold on the 0..10 scale used by quality
    /// reports (the config field is expressed on a 0..1 scale).
    pub fn review_threshold_scaled(&self) -> f32 {
        self.review_threshold * 10.0
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            use_multi_agent_mode: true,
            lines_limit_switch: false,
            tokens_limit_switch: true,
            lines_limit: 20,
            tokens_limit: 2000,
            user_thread_counts: 0,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            round_limit: 3,
            rpm_limit: None,
            tpm_limit: None,
            pre_line_counts: Self::DEFAULT_CONTEXT_WINDOW,
            source_language: "auto".to_string(),
            target_language: "en".to_string(),
            output_filename_suffix: "_translated".to_string(),
            bilingual_text_order: BilingualTextOrder::default(),
            enable_human_review: false,
            review_threshold: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_exactly_one_batching_switch() {
        let config = TranslationConfig::default();
        assert!(config.lines_limit_switch ^ config.tokens_limit_switch);
    }

    #[test]
    fn review_threshold_scales_to_ten_point_scale() {
        let mut config = TranslationConfig::default();
        config.review_threshold = 0.7;
        assert!((config.review_threshold_scaled() - 7.0).abs() < f32::EPSILON);
    }
}
