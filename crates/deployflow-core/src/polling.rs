// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic polling of a remote asynchronous job.
//!
//! Every "wait for a platform job" execution (service binding, service key
//! creation and deletion, ...) is a [`PollJobExecution`] over a small
//! [`AsyncJobPoller`] that says which job to fetch, whether the resource is
//! optional, and what to do on each outcome.
//!
//! | Remote state | Callback | Result |
//! |--------------|----------|--------|
//! | PROCESSING, POLLING | `on_in_progress` | RUNNING |
//! | COMPLETE | `on_success` | FINISHED |
//! | FAILED, mandatory | `on_error` | ERROR |
//! | FAILED, optional | `on_optional_error` | FINISHED |

use async_trait::async_trait;

use crate::async_step::AsyncExecution;
use crate::context::ProcessContext;
use crate::error::Result;
use crate::phase::AsyncExecutionState;
use crate::platform::{AsyncJob, JobState};
use crate::recovery::ErrorPolicy;

/// Classified remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    /// Still being processed.
    InProgress,
    /// Completed successfully.
    Succeeded,
    /// Failed.
    Failed,
}

impl From<JobState> for JobProgress {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Processing | JobState::Polling => JobProgress::InProgress,
            JobState::Complete => JobProgress::Succeeded,
            JobState::Failed => JobProgress::Failed,
        }
    }
}

/// Resource-specific part of a job poll.
pub trait AsyncJobPoller: Send + Sync {
    /// Id of the job to poll, usually stored by the kick-off call.
    fn job_id(&self, ctx: &ProcessContext) -> Result<String>;

    /// Message prefixed to polling errors.
    fn polling_error_message(&self, ctx: &ProcessContext) -> String;

    /// Whether a job failure must not fail the deployment.
    fn is_optional(&self, _ctx: &ProcessContext) -> bool {
        false
    }

    /// How failures of the job lookup itself may be downgraded.
    fn error_policy(&self, ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::STRICT.with_optional(self.is_optional(ctx))
    }

    /// Called on every poll that finds the job still running.
    fn on_in_progress(&self, ctx: &mut ProcessContext, job: &AsyncJob) -> Result<()> {
        ctx.logger()
            .debug(format!("Job {} ({}) is still in progress", job.id, job.operation));
        Ok(())
    }

    /// Called once the job completed.
    fn on_success(&self, ctx: &mut ProcessContext, job: &AsyncJob) -> Result<()>;

    /// Called when the job failed on a mandatory resource.
    fn on_error(&self, ctx: &mut ProcessContext, job: &AsyncJob) -> Result<()> {
        let message = self.polling_error_message(ctx);
        ctx.logger().error(format!("{message}: {}", job.error_summary()));
        Ok(())
    }

    /// Called when the job failed on an optional resource.
    fn on_optional_error(&self, ctx: &mut ProcessContext, job: &AsyncJob) -> Result<()> {
        let message = self.polling_error_message(ctx);
        ctx.logger().warn(format!(
            "{message}: {}; the resource is optional, continuing",
            job.error_summary()
        ));
        Ok(())
    }
}

/// [`AsyncExecution`] that polls one platform job.
#[derive(Debug, Clone)]
pub struct PollJobExecution<P>(pub P);

impl<P> PollJobExecution<P> {
    /// Poll execution for `poller`.
    pub fn new(poller: P) -> Self {
        Self(poller)
    }
}

#[async_trait]
impl<P: AsyncJobPoller> AsyncExecution for PollJobExecution<P> {
    async fn execute(&self, ctx: &mut ProcessContext) -> Result<AsyncExecutionState> {
        let job_id = self.0.job_id(ctx)?;
        let job = ctx.client()?.get_job(&job_id).await?;

        let progress = JobProgress::from(job.state);
        if progress != JobProgress::InProgress {
            for warning in &job.warnings {
                ctx.logger().warn(format!("Job {}: {}", job.id, warning));
            }
        }

        match progress {
            JobProgress::InProgress => {
                self.0.on_in_progress(ctx, &job)?;
                Ok(AsyncExecutionState::Running)
            }
            JobProgress::Succeeded => {
                self.0.on_success(ctx, &job)?;
                Ok(AsyncExecutionState::Finished)
            }
            JobProgress::Failed if self.0.is_optional(ctx) => {
                self.0.on_optional_error(ctx, &job)?;
                Ok(AsyncExecutionState::Finished)
            }
            JobProgress::Failed => {
                self.0.on_error(ctx, &job)?;
                Ok(AsyncExecutionState::Error)
            }
        }
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        self.0.polling_error_message(ctx)
    }

    fn error_policy(&self, ctx: &ProcessContext) -> ErrorPolicy {
        self.0.error_policy(ctx)
    }
}
