//! Progress and human-review callback contracts.
//!
//! The pipeline only ever talks to the outside world through two narrow
//! interfaces: [`ProgressHandler`] (fire-and-forget progress snapshots) and
//! [`HumanInterventionHandler`] (a blocking request/response hand-off to
//! whatever owns the UI thread). Both have no-op/`None`-returning default
//! methods so a caller only implements what it needs.
//!
//! # Example
//!
//! ```rust,no_run
//! use transflow::transflow::event::{ProgressHandler, TaskUpdate};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl ProgressHandler for Logger {
//!     async fn on_update(&self, update: &TaskUpdate) {
//!         println!("{:?} {}/{}", update.current_stage, update.lines, update.total_lines);
//!     }
//! }
//! ```

pub use crate::transflow::stats::{AgentStage, TaskUpdate};
use async_trait::async_trait;
use serde_json::Value;

/// Receives a [`TaskUpdate`] snapshot every time the pipeline's progress
/// state changes (stage transitions, line completions, token accounting).
#[async_trait]
pub trait ProgressHandler: Send + Sync {
    /// Called with the latest snapshot. The default implementation is a
    /// no-op — callers that don't need progress reporting can ignore it.
    async fn on_update(&self, _update: &TaskUpdate) {}
}

/// A [`ProgressHandler`] that drops every update, used when no caller wants
/// progress reporting.
pub struct NoopProgressHandler;

#[async_trait]
impl ProgressHandler for NoopProgressHandler {}

/// The kind of human decision being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    TerminologyReview,
    TranslationReview,
    BatchTranslationReview,
    ErrorCorrection,
}

/// A single line offered up for review within a `batch_translation_review`
/// task.
#[derive(Debug, Clone)]
pub struct ReviewItem {
    pub global_index: usize,
    pub source_text: String,
    pub translated_text: String,
    pub back_translation: String,
    pub score: f32,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

/// Payload accompanying a [`TaskType::BatchTranslationReview`] request.
#[derive(Debug, Clone)]
pub struct TaskData {
    pub review_items: Vec<ReviewItem>,
    /// Free-form extra context (task-type specific), kept as JSON so this
    /// struct doesn't need a variant per task type.
    pub extra: Value,
}

/// What the reviewer decided for one [`ReviewItem`].
#[derive(Debug, Clone)]
pub enum ReviewAction {
    /// Keep the machine translation as-is.
    Accept,
    /// Replace with reviewer-supplied text.
    Custom(String),
    /// Ask the agent to retranslate this single line.
    Retranslate,
}

/// One reviewer decision, keyed back to the [`ReviewItem::global_index`] it
/// answers.
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub index: usize,
    pub action: ReviewAction,
}

/// The reviewer's full answer to a `batch_translation_review` request.
#[derive(Debug, Clone)]
pub struct HumanReviewResult {
    pub review_results: Vec<ReviewDecision>,
}

/// Contract for the synchronous UI hand-off: marshal a task to whatever
/// context owns the UI thread, block until a human answers, and return the
/// result. `None` means "no UI context available" or "the user cancelled" —
/// either way the caller falls back to machine decisions; it is not an
/// error.
#[async_trait]
pub trait HumanInterventionHandler: Send + Sync {
    /// Request a human decision for `task_type`/`task_data`. The default
    /// implementation always returns `None` (no UI wired up).
    async fn request(&self, _task_type: TaskType, _task_data: &TaskData) -> Option<HumanReviewResult> {
        None
    }
}

/// A [`HumanInterventionHandler`] that never has a UI to hand off to.
pub struct NoUiHandler;

#[async_trait]
impl HumanInterventionHandler for NoUiHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_progress_handler_accepts_any_update() {
        use crate::transflow::stats::StatsTracker;
        let tracker = StatsTracker::new(10);
        let handler = NoopProgressHandler;
        handler.on_update(&tracker.snapshot()).await;
    }

    #[tokio::test]
    async fn no_ui_handler_returns_none() {
        let handler = NoUiHandler;
        let data = TaskData {
            review_items: vec![],
            extra: Value::Null,
        };
        let result = handler.request(TaskType::BatchTranslationReview, &data).await;
        assert!(result.is_none());
    }
}
