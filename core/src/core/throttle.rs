//! Retry policies for HTTP 429 responses.
//!
//! The harness asks the policy for a delay before each retry; `None` means
//! retries are exhausted and the response is surfaced as rate limited.
//!
//! Exponential backoff: initial * 2^(attempt-1), exponent capped at 6, delay capped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const MAX_EXPONENT: u32 = 6;
const MAX_DELAY_MS: u64 = 30_000;

pub trait RetryPolicy: Send + Sync {
    /// Delay before retry number `attempt` (1-based), or `None` once retries are exhausted.
    fn delay_for(&self, attempt: u32) -> Option<Duration>;
}

pub type RetryPolicyRef = Arc<dyn RetryPolicy>;

/// Never retries.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn delay_for(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries a fixed number of times after a constant delay.
pub struct FixedDelay {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self { retries: 1, delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy for FixedDelay {
    fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.retries {
            return None;
        }
        Some(self.delay)
    }
}

pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub initial: Duration,
    pub cap: Duration,
}

impl RetryPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u32 << (attempt - 1).min(MAX_EXPONENT);
        Some(self.initial.saturating_mul(factor).min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_retries: 1,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicyRef {
        let delay = Duration::from_millis(self.delay_ms);
        match self.strategy {
            RetryStrategy::None => Arc::new(NoRetry),
            RetryStrategy::Fixed => Arc::new(FixedDelay { retries: self.max_retries, delay }),
            RetryStrategy::Exponential => Arc::new(ExponentialBackoff {
                max_retries: self.max_retries,
                initial: delay,
                cap: Duration::from_millis(MAX_DELAY_MS),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_retries_once_by_default() {
        let policy = FixedDelay::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(2), None);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = ExponentialBackoff {
            max_retries: 10,
            initial: Duration::from_millis(100),
            cap: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(11), None);
    }

    #[test]
    fn config_builds_requested_policy() {
        let none = RetryConfig { strategy: RetryStrategy::None, ..RetryConfig::default() };
        assert_eq!(none.policy().delay_for(1), None);

        let fixed = RetryConfig { delay_ms: 5, max_retries: 2, ..RetryConfig::default() };
        let policy = fixed.policy();
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_for(3), None);
    }
}
