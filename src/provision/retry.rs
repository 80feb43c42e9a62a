//! Retry policy for transient backend unavailability

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between attempts when the backend reports no master available
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before each retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),

    /// `initial`, doubled on every retry, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (zero-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => initial
                .saturating_mul(2u32.saturating_pow(retry))
                .min(max),
        }
    }
}

/// Retry behaviour for create-table and create-index requests
///
/// The default waits one second between attempts and never gives up, so a
/// cluster that stays unavailable stalls provisioning instead of failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: Backoff,

    /// `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Unbounded retries with a fixed delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_retries: None,
        }
    }

    /// Unbounded retries with capped exponential backoff
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential { initial, max },
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another retry is allowed after `retries` retries so far
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unbounded_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(50), Duration::from_secs(1));
        assert!(policy.allows_retry(u32::MAX - 1));
    }

    #[test]
    fn test_bounded() {
        let policy = RetryPolicy::default().with_max_retries(Some(2));
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));

        let never = RetryPolicy::default().with_max_retries(Some(0));
        assert!(!never.allows_retry(0));
    }

    #[test]
    fn test_exponential_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }
}
