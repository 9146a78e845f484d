//! Bounded busy-retry with exponential backoff.
//!
//! `SQLite` resolves writer contention by returning `SQLITE_BUSY`; the pool
//! resolves exhaustion with a checkout timeout. Both surface as
//! [`StoreError::Conflict`]. Instead of bubbling the first one to the caller,
//! operations retry a bounded number of times with exponential backoff and
//! jitter, then surface the `Conflict` for the caller's own retry policy.
//!
//! Sleeps are blocking — this runs inside `spawn_blocking` tasks only.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::errors::{Result, StoreError};

/// Retry policy for busy storage.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default: 3).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Jitter factor in `[0, 1]`; the delay is scaled by `1 + rand(0..=jitter)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): exponential with jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1_u64 << (attempt - 1).min(16))
            .min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0.0..=self.jitter);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((exp as f64 * (1.0 + jitter)) as u64)
    }
}

/// Run `op`, retrying on [`StoreError::Conflict`] per the policy.
///
/// Non-conflict errors are returned immediately. The operation must be safe
/// to re-run from scratch — every caller re-acquires its connection and
/// restarts its transaction inside `op`.
pub fn with_busy_retry<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "storage busy, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
