// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::retry::{RetryConfig, RetryStrategy};

/// Deployflow engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite connection URL or path for the durable variable store
    pub database_url: Option<String>,
    /// Delay between two invocations of a polling step
    pub poll_interval: Duration,
    /// Retry policy applied when a step returns RETRY
    pub retry: RetryConfig,
    /// Timeout for actions that do not declare their own
    pub default_timeout: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DEPLOYFLOW_DATABASE_URL`: SQLite URL or file path (default: none, in-memory store)
    /// - `DEPLOYFLOW_POLL_INTERVAL_MS`: Poll interval in milliseconds (default: 5000)
    /// - `DEPLOYFLOW_MAX_RETRIES`: Retries before a RETRY phase becomes fatal (default: 3)
    /// - `DEPLOYFLOW_RETRY_DELAY_MS`: Base retry backoff in milliseconds (default: 1000)
    /// - `DEPLOYFLOW_DEFAULT_TIMEOUT_SECS`: Default action timeout in seconds (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DEPLOYFLOW_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let poll_interval_ms: u64 = std::env::var("DEPLOYFLOW_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DEPLOYFLOW_POLL_INTERVAL_MS", "must be a positive integer")
            })?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "DEPLOYFLOW_POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }

        let max_retries: u32 = std::env::var("DEPLOYFLOW_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DEPLOYFLOW_MAX_RETRIES", "must be a non-negative integer")
            })?;

        let retry_delay_ms: u64 = std::env::var("DEPLOYFLOW_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DEPLOYFLOW_RETRY_DELAY_MS", "must be a non-negative integer")
            })?;

        let default_timeout_secs: u64 = std::env::var("DEPLOYFLOW_DEFAULT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "DEPLOYFLOW_DEFAULT_TIMEOUT_SECS",
                    "must be a positive integer",
                )
            })?;
        if default_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "DEPLOYFLOW_DEFAULT_TIMEOUT_SECS",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            database_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            retry: RetryConfig {
                max_retries,
                delay_ms: retry_delay_ms,
                strategy: RetryStrategy::ExponentialBackoff,
            },
            default_timeout: Duration::from_secs(default_timeout_secs),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            poll_interval: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 3,
                ..RetryConfig::default()
            },
            default_timeout: Duration::from_secs(3600),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
