//! Sliding-window RPM/TPM throttle shared by every LLM-calling worker pool.
//!
//! Mirrors the original source's cooperative limiter: a call that would push
//! either window over its cap waits in 1-second ticks, checking the window
//! again each tick, rather than computing a single sleep duration up front —
//! this keeps the limiter responsive to a cancellation flag and to other
//! callers freeing up capacity mid-wait.

use crate::transflow::error::TransflowError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const WINDOW: Duration = Duration::from_secs(60);

/// Hard ceiling on how long a single [`RateLimiter::acquire`] call will wait
/// before giving up with [`TransflowError::Transient`].
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Default)]
struct Window {
    /// Timestamps (and, for the token window, token counts) of calls still
    /// inside the trailing 60-second window.
    entries: VecDeque<(Instant, u32)>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&(ts, _)) = self.entries.front() {
            if now.duration_since(ts) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(&self) -> u32 {
        self.entries.iter().map(|&(_, n)| n).sum()
    }
}

/// Throttles concurrent LLM calls to stay under a requests-per-minute and/or
/// tokens-per-minute budget.
///
/// Either limit is optional — RPM/TPM limiting is enabled only
/// when the corresponding config value is set; a `RateLimiter` with both
/// set to `None` never blocks.
pub struct RateLimiter {
    rpm_limit: Option<u32>,
    tpm_limit: Option<u32>,
    requests: Mutex<Window>,
    tokens: Mutex<Window>,
    stopped: Arc<AtomicBool>,
}

impl RateLimiter {
    /// Build a limiter from the optional per-minute caps.
    pub fn new(rpm_limit: Option<u32>, tpm_limit: Option<u32>, stopped: Arc<AtomicBool>) -> Self {
        Self {
            rpm_limit,
            tpm_limit,
            requests: Mutex::new(Window::default()),
            tokens: Mutex::new(Window::default()),
            stopped,
        }
    }

    /// Block (in 1-second ticks) until both windows have room for one more
    /// request carrying roughly `estimated_tokens` tokens, then record the
    /// admission. Returns early with [`TransflowError::Cancelled`] if the
    /// shared stop flag flips mid-wait, or [`TransflowError::Transient`] if
    /// [`ACQUIRE_TIMEOUT`] elapses first.
    pub async fn acquire(&self, estimated_tokens: u32) -> Result<(), TransflowError> {
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(TransflowError::Cancelled);
            }

            let now = Instant::now();
            let ready = {
                let mut requests = self.requests.lock().await;
                requests.prune(now);
                let requests_ok = self
                    .rpm_limit
                    .map(|limit| (requests.entries.len() as u32) < limit)
                    .unwrap_or(true);

                let mut tokens = self.tokens.lock().await;
                tokens.prune(now);
                let tokens_ok = self
                    .tpm_limit
                    .map(|limit| tokens.sum() + estimated_tokens <= limit)
                    .unwrap_or(true);

                if requests_ok && tokens_ok {
                    requests.entries.push_back((now, 1));
                    tokens.entries.push_back((now, estimated_tokens));
                    true
                } else {
                    false
                }
            };

            if ready {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(TransflowError::Transient(
                    "rate limiter wait exceeded timeout".to_string(),
                ));
            }

            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbounded_limiter_never_blocks() {
        let limiter = RateLimiter::new(None, None, Arc::new(AtomicBool::new(false)));
        for _ in 0..100 {
            limiter.acquire(10_000).await.unwrap();
        }
    }

    #[tokio::test]
    async fn rpm_limit_admits_up_to_cap_immediately() {
        let limiter = RateLimiter::new(Some(3), None, Arc::new(AtomicBool::new(false)));
        limiter.acquire(0).await.unwrap();
        limiter.acquire(0).await.unwrap();
        limiter.acquire(0).await.unwrap();
        assert_eq!(limiter.requests.lock().await.entries.len(), 3);
    }

    #[tokio::test]
    async fn stop_flag_cancels_a_blocked_acquire() {
        let stopped = Arc::new(AtomicBool::new(false));
        let limiter = RateLimiter::new(Some(1), None, stopped.clone());
        limiter.acquire(0).await.unwrap();
        stopped.store(true, Ordering::SeqCst);
        let result = limiter.acquire(0).await;
        assert!(matches!(result, Err(TransflowError::Cancelled)));
    }

    #[tokio::test]
    async fn tpm_window_tracks_cumulative_tokens() {
        let limiter = RateLimiter::new(None, Some(100), Arc::new(AtomicBool::new(false)));
        limiter.acquire(40).await.unwrap();
        limiter.acquire(40).await.unwrap();
        assert_eq!(limiter.tokens.lock().await.sum(), 80);
    }
}
