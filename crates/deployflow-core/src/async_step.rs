// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Asynchronous actions: kick off, then poll a sequence of executions.
//!
//! ```text
//! EXECUTE ──► index = 0, startTime = now, start() ──► POLL | DONE
//!
//! POLL ──► executions[index].execute()
//!            RUNNING  ──► POLL               (timeout checked)
//!            FINISHED ──► index += 1
//!                           index == len ──► DONE
//!                           otherwise    ──► POLL (timeout checked)
//!            ERROR    ──► RETRY
//!            transient failure ──► RETRY, persisted phase stays POLL
//! ```
//!
//! Each invocation polls exactly one execution. The index only grows while
//! the action stays in POLL and is reset by the next EXECUTE.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ProcessContext;
use crate::error::Result;
use crate::hooks::Capabilities;
use crate::phase::{AsyncExecutionState, StepPhase};
use crate::recovery::{self, ErrorPolicy, Recovery};
use crate::step::{Action, Step};
use crate::timeout::TimeoutGuard;
use crate::vars;

/// One pollable unit of remote work.
#[async_trait]
pub trait AsyncExecution: Send + Sync {
    /// Poll the remote operation once.
    async fn execute(&self, ctx: &mut ProcessContext) -> Result<AsyncExecutionState>;

    /// Message prefixed to errors raised while polling.
    fn polling_error_message(&self, ctx: &ProcessContext) -> String;

    /// How polling failures may be downgraded.
    fn error_policy(&self, _ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::STRICT
    }
}

/// Action that starts remote work and polls it to completion.
#[async_trait]
pub trait AsyncStep: Action {
    /// Kick off the remote work. Returns POLL to start polling or DONE when
    /// nothing needs to be waited for.
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase>;

    /// Executions to poll, in order. May depend on context values.
    fn async_executions(&self, ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>>;

    /// Time budget of the action, measured from the last EXECUTE.
    fn timeout(&self, _ctx: &ProcessContext) -> Option<Duration> {
        None
    }

    /// Application, service or task reported in timeout errors.
    fn resource_name(&self, _ctx: &ProcessContext) -> String {
        self.name().to_string()
    }
}

/// Adapter making an [`AsyncStep`] invocable.
#[derive(Debug, Clone)]
pub struct AsyncAction<S>(pub S);

impl<S> AsyncAction<S> {
    /// Wrap an action.
    pub fn new(step: S) -> Self {
        Self(step)
    }

    /// The wrapped action.
    pub fn inner(&self) -> &S {
        &self.0
    }
}

impl<S: AsyncStep> AsyncAction<S> {
    async fn poll(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let executions = self.0.async_executions(ctx)?;
        let index = ctx.require(&vars::ASYNC_STEP_EXECUTION_INDEX)? as usize;
        let Some(execution) = executions.get(index) else {
            return Ok(StepPhase::Done);
        };

        let state = match execution.execute(ctx).await {
            Ok(state) => state,
            Err(error) => {
                let policy = execution.error_policy(ctx);
                let message = execution.polling_error_message(ctx);
                match recovery::handle_error(ctx, error, policy, StepPhase::Poll, &message, None)? {
                    Recovery::Absent | Recovery::Optional => AsyncExecutionState::Finished,
                    Recovery::Transient => return Ok(StepPhase::Retry),
                }
            }
        };
        debug!(step = self.0.name(), index, state = ?state, "polled async execution");

        Ok(match state {
            AsyncExecutionState::Running => StepPhase::Poll,
            AsyncExecutionState::Error => StepPhase::Retry,
            AsyncExecutionState::Finished => {
                let next = index + 1;
                ctx.set(&vars::ASYNC_STEP_EXECUTION_INDEX, next as u32)?;
                if next >= executions.len() {
                    StepPhase::Done
                } else {
                    StepPhase::Poll
                }
            }
        })
    }

    async fn begin(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        ctx.set(&vars::ASYNC_STEP_EXECUTION_INDEX, 0)?;
        TimeoutGuard::record_start(ctx)?;

        match self.0.start(ctx).await {
            Ok(phase) => Ok(phase),
            Err(error) => {
                let policy = self.0.error_policy(ctx);
                let message = self.0.error_message(ctx);
                recovery::handle_error(ctx, error, policy, StepPhase::Execute, &message, None)?;
                Ok(StepPhase::Done)
            }
        }
    }
}

impl<S: AsyncStep> Action for AsyncAction<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        self.0.error_message(ctx)
    }

    fn error_policy(&self, ctx: &ProcessContext) -> ErrorPolicy {
        self.0.error_policy(ctx)
    }

    fn capabilities(&self) -> Capabilities<'_> {
        self.0.capabilities()
    }
}

#[async_trait]
impl<S: AsyncStep> Step for AsyncAction<S> {
    fn initial_phase(&self, persisted: StepPhase) -> StepPhase {
        StepPhase::initial(persisted)
    }

    async fn execute_step(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        if ctx.require(&vars::STEP_PHASE)? != StepPhase::Poll {
            return self.begin(ctx).await;
        }

        let next = self.poll(ctx).await?;
        if next == StepPhase::Poll
            && let Some(timeout) = self.0.timeout(ctx)
        {
            let resource = self.0.resource_name(ctx);
            TimeoutGuard::new(timeout).check(ctx, self.0.name(), &resource)?;
        }
        Ok(next)
    }
}
