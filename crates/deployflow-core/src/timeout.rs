// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Elapsed-time guard for asynchronous actions.
//!
//! The start time is persisted when the action enters EXECUTE; every
//! invocation that would return POLL compares it against the clock again.
//! The guard itself holds nothing but the declared timeout.

use std::time::Duration;

use tracing::debug;

use crate::context::ProcessContext;
use crate::error::{Result, StepError};
use crate::vars;

/// Converts "still running" into a timeout once the budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    timeout: Duration,
}

impl TimeoutGuard {
    /// Guard with the given budget.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Declared budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Persist the current time as the start of the action.
    pub fn record_start(ctx: &mut ProcessContext) -> Result<()> {
        let now = ctx.now().timestamp_millis();
        ctx.set(&vars::START_TIME, now)?;
        Ok(())
    }

    /// Time since the recorded start, if any.
    pub fn elapsed(ctx: &ProcessContext) -> Result<Option<Duration>> {
        let Some(start) = ctx.get(&vars::START_TIME)? else {
            return Ok(None);
        };
        let elapsed_ms = ctx.now().timestamp_millis().saturating_sub(start).max(0);
        Ok(Some(Duration::from_millis(elapsed_ms as u64)))
    }

    /// Fail with [`StepError::Timeout`] if the budget is spent.
    ///
    /// Without a recorded start time the measurement starts now.
    pub fn check(&self, ctx: &mut ProcessContext, step: &str, resource: &str) -> Result<()> {
        let Some(elapsed) = Self::elapsed(ctx)? else {
            debug!(step, "no start time recorded, starting timeout measurement");
            return Self::record_start(ctx);
        };
        if elapsed >= self.timeout {
            return Err(StepError::Timeout {
                step: step.to_string(),
                resource: resource.to_string(),
                timeout: self.timeout,
                elapsed,
            });
        }
        Ok(())
    }
}
