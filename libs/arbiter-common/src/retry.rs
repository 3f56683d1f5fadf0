use std::time::Duration;

/// Retry policy shared by the batch orchestrator and any other retrying
/// caller: a ceiling on retries and an exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 2 means up to 3 attempts total.
    pub max_retries: u32,
    /// Backoff base; the delay before retry `n` is `base * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay to sleep before retry number `retry` (1-based; retry 0 is the
    /// initial attempt and has no delay).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        self.base_delay * 2u32.saturating_pow(retry)
    }
}
