// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for deployflow-core.
//!
//! Every error that reaches the driver is fatal for the action instance;
//! recoverable conditions are expressed as the RETRY phase instead.

use std::time::Duration;

use crate::persistence::StoreError;
use crate::platform::PlatformError;
use crate::variables::VariableError;

/// Result type using StepError
pub type Result<T> = std::result::Result<T, StepError>;

/// Errors raised by steps and the driver.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StepError {
    /// The action failed and the deployment must stop.
    #[error("{step}: {message}")]
    Fatal {
        /// Action name.
        step: String,
        /// Action error message, cause and optional description.
        message: String,
    },

    /// An asynchronous operation exceeded its time budget.
    #[error(
        "{step}: operation on '{resource}' exceeded its time budget of {}s (running for {}s)",
        .timeout.as_secs(),
        .elapsed.as_secs()
    )]
    Timeout {
        /// Action name.
        step: String,
        /// Application, service or task the action waits for.
        resource: String,
        /// Declared timeout.
        timeout: Duration,
        /// Time elapsed since the action entered EXECUTE.
        elapsed: Duration,
    },

    /// A context variable could not be read or written.
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// A platform call failed outside any error policy.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The variable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The driver stopped re-invoking the action.
    #[error("execution of '{step}' was cancelled")]
    Cancelled {
        /// Action name.
        step: String,
    },

    /// The action kept returning RETRY.
    #[error(
        "A step of the process has failed. Retrying it may solve the issue. ({step} failed after {attempts} attempts)"
    )]
    RetriesExhausted {
        /// Action name.
        step: String,
        /// Number of attempts made.
        attempts: u32,
    },
}

impl StepError {
    /// Fatal error for `step` with a fully formatted message.
    pub fn fatal(step: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Fatal {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Fatal { .. } => "STEP_FAILED",
            Self::Timeout { .. } => "STEP_TIMEOUT",
            Self::Variable(_) => "VARIABLE_ERROR",
            Self::Platform(_) => "PLATFORM_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
        }
    }

    /// Whether the error was produced by the timeout guard.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
