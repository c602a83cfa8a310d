use std::time::Duration;

use super::JobStatus;

/// Attempt budget and linear backoff for callback delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts for `ready` and `error` (including the first).
    pub critical_attempts: u32,
    /// Delay unit: attempt `n` is followed by `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            critical_attempts: 3,
            backoff_step: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Number of attempts allowed for `status`.
    ///
    /// Progress updates get one shot; the next poll supersedes them anyway.
    pub fn attempts_for(&self, status: JobStatus) -> u32 {
        if status.is_critical() {
            self.critical_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay after the failed `attempt` (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}
