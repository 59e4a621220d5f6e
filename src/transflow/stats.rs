//! Single-mutex progress tracker that publishes immutable snapshots.
//!
//! The original source keeps a global `work_status` dict mutated from many
//! worker threads and read by the UI poller; here a single `Mutex<Counters>`
//! plays that role, and every read goes through [`StatsTracker::snapshot`],
//! which clones out an immutable [`TaskUpdate`] rather than handing out a
//! guard — callers can never observe a torn update.

use crate::transflow::config::TranslationConfig;
use std::sync::Mutex;
use std::time::Instant;

/// The pipeline stage currently executing, surfaced to callers polling
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    Planning,
    Preprocessing,
    Terminology,
    Translating,
    Backtranslation,
    EntityCheck,
    Saving,
    Completed,
}

impl AgentStage {
    /// Name used in logs and published snapshots.
    pub fn label(&self) -> &'static str {
        match self {
            AgentStage::Planning => "planning",
            AgentStage::Preprocessing => "preprocessing",
            AgentStage::Terminology => "terminology",
            AgentStage::Translating => "translating",
            AgentStage::Backtranslation => "backtranslation",
            AgentStage::EntityCheck => "entity_check",
            AgentStage::Saving => "saving",
            AgentStage::Completed => "completed",
        }
    }
}

/// Immutable snapshot of pipeline progress at the moment it was taken.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub total_lines: u64,
    pub lines: u64,
    pub tokens: u64,
    pub completion_tokens: u64,
    pub total_requests: u64,
    pub active_llm_calls: u64,
    pub current_stage: AgentStage,
    pub stage_progress_current: u64,
    pub stage_progress_total: u64,
    pub elapsed: std::time::Duration,
}

struct Counters {
    total_lines: u64,
    lines: u64,
    tokens: u64,
    completion_tokens: u64,
    total_requests: u64,
    active_llm_calls: u64,
    current_stage: AgentStage,
    stage_progress_current: u64,
    stage_progress_total: u64,
    start_time: Instant,
}

/// Thread-safe progress counters for a single translation run.
pub struct StatsTracker {
    inner: Mutex<Counters>,
}

impl StatsTracker {
    /// Start a fresh tracker with `total_lines` known up front (the planning
    /// stage discovers this before any other stage runs).
    pub fn new(total_lines: u64) -> Self {
        Self {
            inner: Mutex::new(Counters {
                total_lines,
                lines: 0,
                tokens: 0,
                completion_tokens: 0,
                total_requests: 0,
                active_llm_calls: 0,
                current_stage: AgentStage::Planning,
                stage_progress_current: 0,
                stage_progress_total: 0,
                start_time: Instant::now(),
            }),
        }
    }

    /// Move into a new stage, resetting its sub-progress counters.
    ///
    /// During `planning`, `preprocessing`, and `terminology`, `lines` is
    /// clamped to `0` regardless of what's recorded later (those
    /// stages don't advance the line-completion counter that end users see).
    pub fn enter_stage(&self, stage: AgentStage, stage_total: u64) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.current_stage = stage;
        counters.stage_progress_current = 0;
        counters.stage_progress_total = stage_total;
        if matches!(
            stage,
            AgentStage::Planning | AgentStage::Preprocessing | AgentStage::Terminology
        ) {
            counters.lines = 0;
        }
    }

    /// Record that one more unit of the current stage's work finished.
    pub fn advance_stage_progress(&self, by: u64) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.stage_progress_current += by;
    }

    /// Record a completed line of output (only meaningful outside the three
    /// clamped stages, but harmless to call anywhere — `enter_stage` resets
    /// it back to zero on the next clamped stage).
    pub fn record_lines(&self, count: u64) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.lines += count;
    }

    /// Record a finished LLM call's token accounting.
    pub fn record_call(&self, prompt_tokens: u64, completion_tokens: u64) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.tokens += prompt_tokens + completion_tokens;
        counters.completion_tokens += completion_tokens;
        counters.total_requests += 1;
    }

    /// Mark one more LLM call as in flight. Pair with [`Self::call_finished`].
    pub fn call_started(&self) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.active_llm_calls += 1;
    }

    /// Mark an in-flight LLM call as finished.
    pub fn call_finished(&self) {
        let mut counters = self.inner.lock().expect("stats mutex poisoned");
        counters.active_llm_calls = counters.active_llm_calls.saturating_sub(1);
    }

    /// Take an immutable snapshot of current progress.
    pub fn snapshot(&self) -> TaskUpdate {
        let counters = self.inner.lock().expect("stats mutex poisoned");
        TaskUpdate {
            total_lines: counters.total_lines,
            lines: counters.lines,
            tokens: counters.tokens,
            completion_tokens: counters.completion_tokens,
            total_requests: counters.total_requests,
            active_llm_calls: counters.active_llm_calls,
            current_stage: counters.current_stage,
            stage_progress_current: counters.stage_progress_current,
            stage_progress_total: counters.stage_progress_total,
            elapsed: counters.start_time.elapsed(),
        }
    }
}

/// Estimated LLM calls for a chunk plan under the TEaR loop: translate,
/// back-translate, and score/refine average out to three calls per chunk
/// (the resource-plan sizing rule), used by the planner to pre-populate
/// `total_requests` estimates shown to callers before any call is made.
pub fn estimated_calls_for_chunks(chunk_count: u64, config: &TranslationConfig) -> u64 {
    let _ = config;
    chunk_count.saturating_mul(3)
}
