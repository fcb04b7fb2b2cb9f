use model::execution::errors::HostError;
use std::time::Duration;
use tokio::time::sleep;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// How often a failed batch is re-attempted and how long to wait in between.
///
/// `max_retries` counts attempts beyond the first, so a policy with
/// `max_retries == 0` runs every batch exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u64,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u64, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    pub fn no_retries() -> Self {
        Self::default()
    }

    /// True when another attempt may follow `attempt` (0-based).
    pub fn allows_retry(&self, attempt: u64) -> bool {
        attempt < self.max_retries
    }

    /// Waits before the attempt that follows `attempt`.
    pub async fn pause(&self, attempt: u64) {
        let delay = self.backoff_delay(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub fn backoff_delay(&self, attempt: u64) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let factor = 1u128 << attempt.min(6);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

/// Infrastructure failures abort the run; everything else is a batch failure
/// that may be retried.
pub fn classify_host_error(err: &HostError) -> RetryDisposition {
    if err.is_fatal() {
        RetryDisposition::Stop
    } else {
        RetryDisposition::Retry
    }
}
