//! Synchronous hand-off to a human reviewer.
//!
//! [`ReviewCoordinator`] is a thin wrapper around
//! [`crate::transflow::event::HumanInterventionHandler`] that also selects
//! which lines get offered for review: everything scoring below the
//! configured threshold, or — if nothing crosses that bar — the three
//! lowest-scored lines, so a quiet run still exercises the review path in
//! tests and demos.

use crate::transflow::event::{HumanInterventionHandler, ReviewItem, TaskData, TaskType};
use std::sync::Arc;

/// One chunk's scored line, carried forward from Step 2 of translation into
/// the cross-batch review selection.
#[derive(Debug, Clone)]
pub struct ScoredLine {
    pub global_index: usize,
    pub source_text: String,
    pub translated_text: String,
    pub back_translation: String,
    pub score: f32,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

const FALLBACK_REVIEW_COUNT: usize = 3;

/// Select which lines get offered for human review: every line scoring below
/// `threshold`, or, if none qualify, the `FALLBACK_REVIEW_COUNT` lowest-scored
/// lines (so a clean run still has something to show a reviewer in a demo or
/// test harness).
pub fn select_lines_for_review(lines: &[ScoredLine], threshold: f32) -> Vec<ScoredLine> {
    let below_threshold: Vec<ScoredLine> = lines.iter().filter(|l| l.score < threshold).cloned().collect();
    if !below_threshold.is_empty() {
        return below_threshold;
    }

    let mut sorted: Vec<ScoredLine> = lines.to_vec();
    sorted.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    sorted.into_iter().take(FALLBACK_REVIEW_COUNT).collect()
}

/// Wraps a [`HumanInterventionHandler`] with the batch-review selection logic
/// and request shaping used by the translation stage.
pub struct ReviewCoordinator {
    handler: Arc<dyn HumanInterventionHandler>,
}

impl ReviewCoordinator {
    pub fn new(handler: Arc<dyn HumanInterventionHandler>) -> Self {
        Self { handler }
    }

    /// Select the lines worth reviewing out of `lines` and, if any qualify,
    /// block on the handler for a decision. Returns `None` both when nothing
    /// qualifies for review and when the handler itself returns `None` (no UI
    /// / user cancelled) — callers treat both identically: keep the machine
    /// translations as-is.
    pub async fn review_batch(
        &self,
        lines: &[ScoredLine],
        threshold: f32,
    ) -> Option<crate::transflow::event::HumanReviewResult> {
        let selected = select_lines_for_review(lines, threshold);
        if selected.is_empty() {
            return None;
        }

        let review_items = selected
            .into_iter()
            .map(|l| ReviewItem {
                global_index: l.global_index,
                source_text: l.source_text,
                translated_text: l.translated_text,
                back_translation: l.back_translation,
                score: l.score,
                context_before: l.context_before,
                context_after: l.context_after,
            })
            .collect();

        let task_data = TaskData { review_items, extra: serde_json::Value::Null };
        self.handler.request(TaskType::BatchTranslationReview, &task_data).await
    }
}
