// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step contracts and the invocation entry point.
//!
//! An action is written against one of two traits:
//!
//! - [`SyncStep`]: a single remote call (or none); wrapped in [`SyncAction`]
//!   it always completes with DONE or fails.
//! - [`AsyncStep`](crate::async_step::AsyncStep): a kick-off call followed by
//!   polling; wrapped in [`AsyncAction`](crate::async_step::AsyncAction).
//!
//! Both wrappers implement [`Step`], which is what the driver invokes through
//! [`execute`].

use async_trait::async_trait;
use tracing::debug;

use crate::context::ProcessContext;
use crate::error::Result;
use crate::hooks::{self, Capabilities};
use crate::phase::StepPhase;
use crate::recovery::{self, ErrorPolicy};
use crate::vars;

/// Identity and error behaviour shared by every action.
pub trait Action: Send + Sync {
    /// Stable action name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Message prefixed to fatal errors, e.g. "Error deleting route".
    fn error_message(&self, ctx: &ProcessContext) -> String;

    /// How failures of the action's own remote calls may be downgraded.
    fn error_policy(&self, _ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::STRICT
    }

    /// Optional hook capabilities of the action.
    fn capabilities(&self) -> Capabilities<'_> {
        Capabilities::none()
    }
}

/// Anything the driver can invoke.
#[async_trait]
pub trait Step: Action {
    /// Phase the invocation starts from, given the persisted one.
    fn initial_phase(&self, persisted: StepPhase) -> StepPhase;

    /// Run the action body for the current phase and report the next one.
    async fn execute_step(&self, ctx: &mut ProcessContext) -> Result<StepPhase>;
}

/// Action performed by a single call that either succeeds or fails.
#[async_trait]
pub trait SyncStep: Action {
    /// Perform the action.
    async fn run(&self, ctx: &mut ProcessContext) -> Result<()>;
}

/// Adapter making a [`SyncStep`] invocable.
///
/// Its body only ever reports DONE; failures are either downgraded by the
/// action's error policy or fatal.
#[derive(Debug, Clone)]
pub struct SyncAction<S>(pub S);

impl<S> SyncAction<S> {
    /// Wrap an action.
    pub fn new(step: S) -> Self {
        Self(step)
    }

    /// The wrapped action.
    pub fn inner(&self) -> &S {
        &self.0
    }
}

impl<S: SyncStep> Action for SyncAction<S> {
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
impl<S: SyncStep> Step for SyncAction<S> {
    fn initial_phase(&self, _persisted: StepPhase) -> StepPhase {
        StepPhase::Execute
    }

    async fn execute_step(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        if let Err(error) = self.0.run(ctx).await {
            let policy = self.0.error_policy(ctx);
            let message = self.0.error_message(ctx);
            recovery::handle_error(ctx, error, policy, StepPhase::Execute, &message, None)?;
        }
        Ok(StepPhase::Done)
    }
}

/// Invoke `step` once.
///
/// Normalizes and persists the starting phase, runs the body behind the hook
/// mechanism and persists the resulting phase. A failed invocation discards
/// its variable changes and leaves the phase at RETRY. An invocation that
/// asked to keep the persisted phase reports its result without storing it.
pub async fn execute(step: &dyn Step, ctx: &mut ProcessContext) -> Result<StepPhase> {
    let persisted = ctx.get(&vars::STEP_PHASE)?.unwrap_or_default();
    let phase = step.initial_phase(persisted);
    ctx.set(&vars::STEP_PHASE, phase)?;
    debug!(
        instance_id = %ctx.instance_id(),
        step = step.name(),
        persisted = %persisted,
        phase = %phase,
        "invoking step"
    );

    let outcome = hooks::execute_with_hooks(step, ctx).await;
    let keep_phase = ctx.take_keep_persisted_phase();
    match outcome {
        Ok(next) => {
            if !keep_phase {
                ctx.set(&vars::STEP_PHASE, next)?;
            }
            Ok(next)
        }
        Err(error) => {
            ctx.variables_mut().rollback();
            ctx.set(&vars::STEP_PHASE, StepPhase::Retry)?;
            ctx.logger().error(error.to_string());
            Err(error)
        }
    }
}
