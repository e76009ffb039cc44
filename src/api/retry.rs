//! Retry policy for HTTP calls and SSE reconnects.

use crate::error::ApiError;
use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Upper bound on total attempts, including the initial one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy for re-subscribing to the event stream.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Whether attempt `attempt` (0-based) failing with `err` earns another try.
    pub fn should_retry(&self, err: &ApiError, attempt: u32) -> bool {
        if attempt.saturating_add(1) >= self.max_attempts {
            return false;
        }
        is_transient(err)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let pow = 2u32.saturating_pow(attempt);
        let millis = self
            .initial_backoff
            .as_millis()
            .saturating_mul(pow as u128)
            .min(self.max_backoff.as_millis());
        Duration::from_millis(millis as u64)
    }
}

/// Timeouts, refused connections, 429 and 5xx are worth retrying.
pub fn is_transient(err: &ApiError) -> bool {
    match err {
        ApiError::Http(inner) => inner.is_timeout() || inner.is_connect() || inner.is_body(),
        ApiError::Status { code, .. } => *code == 429 || (500..=599).contains(code),
        ApiError::InvalidResponse(_) => false,
    }
}
