// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backoff policy applied by the driver when a step reports RETRY.

use std::time::Duration;

/// Upper bound for a single backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// How the delay between two retries of a step grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Exponential backoff: delay * 2^(attempt-1)
    #[default]
    ExponentialBackoff,
    /// Same delay before every retry.
    Fixed,
}

/// Retry budget for one action instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = the first RETRY is final).
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub delay_ms: u64,
    /// Strategy used to derive the delay of each retry.
    pub strategy: RetryStrategy,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32, delay_ms: u64, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            delay_ms,
            strategy,
        }
    }

    /// Delay before the given retry (1-indexed), capped at [`MAX_RETRY_DELAY`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::ExponentialBackoff => 2u64.saturating_pow(attempt.saturating_sub(1)),
            RetryStrategy::Fixed => 1,
        };
        Duration::from_millis(self.delay_ms.saturating_mul(multiplier)).min(MAX_RETRY_DELAY)
    }

    /// Whether `attempt` retries have used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 1000,
            strategy: RetryStrategy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.delay_ms, 1000);
        assert_eq!(config.strategy, RetryStrategy::ExponentialBackoff);
    }

    #[test]
    fn test_exponential_delay_doubles() {
        let config = RetryConfig::new(3, 100, RetryStrategy::ExponentialBackoff);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let config = RetryConfig::new(3, 250, RetryStrategy::Fixed);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::new(100, 1000, RetryStrategy::ExponentialBackoff);
        assert_eq!(config.delay_for_attempt(64), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_budget_exhaustion() {
        let config = RetryConfig::new(2, 10, RetryStrategy::Fixed);
        assert!(!config.is_exhausted(1));
        assert!(!config.is_exhausted(2));
        assert!(config.is_exhausted(3));

        assert!(RetryConfig::default().is_exhausted(1));
    }
}
