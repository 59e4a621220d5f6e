//! Error taxonomy for the translation pipeline.
//!
//! Mirrors the failure categories in the design's error-handling section:
//! transient LLM failures are absorbed by the component that hit them and
//! turned into the documented fallback behavior, so by the time an error
//! reaches a caller it is either [`TransflowError::Persistence`] (logged and
//! swallowed) or [`TransflowError::Fatal`] (surfaced because an end-to-end
//! contract was violated). [`TransflowError::Cancelled`] is not a failure —
//! it is how a stage reports that the global stop flag was observed.
//!
//! # Example
//!
//! ```rust
//! use transflow::TransflowError;
//!
//! let err = TransflowError::ChunkMismatch { expected: 3, actual: 2 };
//! assert_eq!(err.to_string(), "chunk line count mismatch: expected 3, got 2");
//! ```

use std::fmt;

/// Errors surfaced by the orchestration and execution engine.
///
/// Only [`TransflowError::Fatal`] is meant to abort a run. Every other variant
/// is either recoverable by the caller (a transient LLM failure the agent
/// already worked around) or informational (cancellation).
#[derive(Debug, Clone)]
pub enum TransflowError {
    /// An LLM call failed, timed out, or returned something unparsable. The
    /// component that observed this already applied its documented fallback
    /// (per-line retry, default score, zero terms, etc.) — this variant exists
    /// so the fallback path itself can still report *why* it had to run.
    Transient(String),

    /// A chunk's `<textarea>` reply did not contain as many lines as items in
    /// the chunk; always triggers full per-line fallback translation.
    ChunkMismatch {
        /// Number of items sent in the batch.
        expected: usize,
        /// Number of lines extracted from the reply.
        actual: usize,
    },

    /// A `Store` call raised. The caller logs this and continues — in-flight
    /// state stays authoritative for the run even if it couldn't be durably
    /// recorded.
    Persistence(String),

    /// The global stop flag was observed; the caller should unwind to the
    /// nearest stage boundary without aborting an in-flight LLM call.
    Cancelled,

    /// An end-to-end contract was violated (e.g. the translation stage ran
    /// but produced zero results, or a required project reference was
    /// missing). Only [`crate::transflow::workflow::WorkflowManager`] returns this.
    Fatal(String),
}

impl fmt::Display for TransflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransflowError::Transient(msg) => write!(f, "transient failure: {}", msg),
            TransflowError::ChunkMismatch { expected, actual } => write!(
                f,
                "chunk line count mismatch: expected {}, got {}",
                expected, actual
            ),
            TransflowError::Persistence(msg) => write!(f, "persistence failure: {}", msg),
            TransflowError::Cancelled => write!(f, "run cancelled"),
            TransflowError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for TransflowError {}

impl From<sqlx::Error> for TransflowError {
    fn from(err: sqlx::Error) -> Self {
        TransflowError::Persistence(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransflowError>;
