//! Process-scoped handle replacing the original source's singleton database
//! manager and global `work_status` flag with an explicit dependency.
//!
//! Every component that needs the store or the cancellation flag receives a
//! `Runtime` (or a clone of it — cheap, it's two `Arc`s) at construction
//! rather than reaching for global state.

use crate::transflow::store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle onto the store and the run-wide cancellation flag.
#[derive(Clone)]
pub struct Runtime {
    store: Store,
    stopped: Arc<AtomicBool>,
}

impl Runtime {
    /// Build a runtime around an already-migrated [`Store`].
    pub fn new(store: Store) -> Self {
        Self {
            store,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Clone of the cancellation flag, for components (e.g.
    /// [`crate::transflow::rate_limiter::RateLimiter`]) that need to poll it
    /// independently.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Raise the stop flag. Never aborts an in-flight LLM call; in-flight
    /// work discards its result if this was raised while it was running.
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
