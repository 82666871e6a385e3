// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reference driver: invokes a step until it is done.
//!
//! Every invocation loads the instance's variables, runs the step once
//! against a fresh [`ProcessContext`] and commits the changes. Between
//! invocations the driver:
//!
//! | Outcome | Driver action |
//! |---------|---------------|
//! | hooks listed in `hooksForExecution` | runs each through the hook executor step, on a separate instance |
//! | DONE | returns a [`StepReport`] |
//! | POLL | sleeps for the poll interval |
//! | RETRY | backs off per [`RetryConfig`] until the budget is spent |
//! | error | returns it |
//!
//! Waiting is cancellable through a [`CancellationToken`]; cancelling only
//! stops re-invoking, nothing is compensated.
//!
//! An instance restarted with hooks left over from a DONE invocation only
//! runs those hooks; the action itself is not invoked again.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::{ProcessContext, ProgressMessage};
use crate::descriptor::Hook;
use crate::error::{Result, StepError};
use crate::persistence::VariableStore;
use crate::phase::StepPhase;
use crate::platform::ClientProvider;
use crate::retry::RetryConfig;
use crate::step::{self, Step};
use crate::variables::{VariableChange, VariableError, VariableScope};
use crate::vars;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Delay before re-invoking a step that returned POLL.
    pub poll_interval: Duration,
    /// Backoff for steps that returned RETRY.
    pub retry: RetryConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DriverConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            retry: config.retry.clone(),
        }
    }
}

/// Summary of a completed action.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepReport {
    /// Action name.
    pub step: String,
    /// Invocations of the action itself.
    pub invocations: u32,
    /// RETRY outcomes that were retried.
    pub retries: u32,
    /// Hooks run before or after the action, in order.
    pub hooks_executed: Vec<String>,
    /// Progress messages of the action and its hooks.
    pub messages: Vec<ProgressMessage>,
}

/// Invokes steps until they complete.
pub struct StepDriver {
    store: Arc<dyn VariableStore>,
    clients: Arc<dyn ClientProvider>,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
    hook_executor: Option<Arc<dyn Step>>,
    cancel: CancellationToken,
}

impl StepDriver {
    /// Driver over `store` using clients from `clients`.
    pub fn new(
        store: Arc<dyn VariableStore>,
        clients: Arc<dyn ClientProvider>,
        config: DriverConfig,
    ) -> Self {
        Self {
            store,
            clients,
            clock: Arc::new(SystemClock),
            config,
            hook_executor: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `clock` for contexts built by this driver.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Step that runs one hook, read from `hookForExecution`.
    pub fn with_hook_executor(mut self, executor: Arc<dyn Step>) -> Self {
        self.hook_executor = Some(executor);
        self
    }

    /// Stop waiting when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token cancelling this driver.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive `step` on `instance_id` until DONE or a fatal error.
    pub async fn run(&self, instance_id: &str, step: &dyn Step) -> Result<StepReport> {
        let mut report = StepReport {
            step: step.name().to_string(),
            ..StepReport::default()
        };
        let mut retries = 0u32;
        info!(instance_id, step = step.name(), "starting step");

        // Hooks scheduled before a restart still have to run.
        let pending = self.pending_hooks(instance_id).await?;
        if !pending.is_empty() {
            self.run_hooks(instance_id, pending, &mut report).await?;
            if self.persisted_phase(instance_id).await? == StepPhase::Done {
                info!(
                    instance_id,
                    step = step.name(),
                    hooks = report.hooks_executed.len(),
                    "step had completed before restart, ran its remaining hooks"
                );
                return Ok(report);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled {
                    step: step.name().to_string(),
                });
            }

            let (phase, hooks) = self.invoke(instance_id, step, &mut report).await?;
            report.invocations += 1;

            let ran_hooks = !hooks.is_empty();
            self.run_hooks(instance_id, hooks, &mut report).await?;

            if phase == StepPhase::Execute && !ran_hooks {
                return Err(StepError::fatal(
                    step.name(),
                    "returned EXECUTE without scheduling hooks",
                ));
            }
            if self.settle(step.name(), phase, &mut retries).await? {
                report.retries = retries;
                info!(
                    instance_id,
                    step = step.name(),
                    invocations = report.invocations,
                    retries,
                    "step completed"
                );
                return Ok(report);
            }
        }
    }

    /// Invoke `step` once and commit its changes.
    ///
    /// Returns the phase and the hooks the step scheduled.
    async fn invoke(
        &self,
        instance_id: &str,
        step: &dyn Step,
        report: &mut StepReport,
    ) -> Result<(StepPhase, Vec<Hook>)> {
        let scope = VariableScope::from_snapshot(self.store.load(instance_id).await?);
        let mut ctx = ProcessContext::new(
            instance_id,
            step.name(),
            scope,
            self.clients.clone(),
            self.clock.clone(),
        );
        if ctx.get(&vars::CORRELATION_ID)?.is_none() {
            ctx.set(&vars::CORRELATION_ID, uuid::Uuid::new_v4().to_string())?;
        }

        let outcome = step::execute(step, &mut ctx).await;
        report.messages.extend(ctx.logger().messages());

        let hooks = ctx.get(&vars::HOOKS_FOR_EXECUTION)?.unwrap_or_default();
        let mut scope = ctx.into_variables();
        self.store.commit(instance_id, &scope.take_changes()).await?;

        let phase = outcome?;
        debug!(instance_id, step = step.name(), phase = %phase, "invocation finished");
        Ok((phase, hooks))
    }

    /// Hooks left in `hooksForExecution`.
    async fn pending_hooks(&self, instance_id: &str) -> Result<Vec<Hook>> {
        let scope = VariableScope::from_snapshot(self.store.load(instance_id).await?);
        Ok(scope.get(&vars::HOOKS_FOR_EXECUTION)?.unwrap_or_default())
    }

    /// Phase stored for `instance_id`.
    async fn persisted_phase(&self, instance_id: &str) -> Result<StepPhase> {
        let scope = VariableScope::from_snapshot(self.store.load(instance_id).await?);
        Ok(scope.get(&vars::STEP_PHASE)?.unwrap_or_default())
    }

    /// Run `hooks` one after the other, shrinking the persisted list as each completes.
    ///
    /// Each hook runs on its own instance, seeded with a copy of the
    /// parent's variables, so the executor's phase and cursor never touch
    /// the parent's. `hookForExecution` stays set on the parent while a hook
    /// is in flight; a resumed driver continues that hook instead of
    /// reseeding it.
    async fn run_hooks(
        &self,
        instance_id: &str,
        hooks: Vec<Hook>,
        report: &mut StepReport,
    ) -> Result<()> {
        if hooks.is_empty() {
            return Ok(());
        }
        let Some(executor) = self.hook_executor.clone() else {
            return Err(StepError::fatal(
                &report.step,
                "No hook executor configured to run its hooks",
            ));
        };
        let hook_instance = hook_instance_id(instance_id);

        for (position, hook) in hooks.iter().enumerate() {
            let parent = VariableScope::from_snapshot(self.store.load(instance_id).await?);
            let in_flight = parent
                .get(&vars::HOOK_FOR_EXECUTION)?
                .is_some_and(|current| current.name == hook.name);

            if in_flight {
                info!(instance_id, hook = %hook.name, step = %report.step, "resuming hook");
            } else {
                info!(instance_id, hook = %hook.name, step = %report.step, "running hook");
                self.seed_hook_instance(&hook_instance, parent, hook).await?;
                self.update(instance_id, |scope| {
                    scope.set(&vars::HOOK_FOR_EXECUTION, hook.clone())
                })
                .await?;
            }

            let mut retries = 0u32;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(StepError::Cancelled {
                        step: executor.name().to_string(),
                    });
                }
                let (phase, _) = self.invoke(&hook_instance, executor.as_ref(), report).await?;
                if self.settle(executor.name(), phase, &mut retries).await? {
                    break;
                }
            }

            self.store.delete_instance(&hook_instance).await?;
            let remaining = hooks[position + 1..].to_vec();
            self.update(instance_id, |scope| {
                scope.remove(&vars::HOOK_FOR_EXECUTION);
                scope.set(&vars::HOOKS_FOR_EXECUTION, remaining)
            })
            .await?;
            report.hooks_executed.push(hook.name.clone());
        }
        Ok(())
    }

    /// Replace the hook instance with the parent's variables and `hook`.
    async fn seed_hook_instance(
        &self,
        hook_instance: &str,
        mut parent: VariableScope,
        hook: &Hook,
    ) -> Result<()> {
        self.store.delete_instance(hook_instance).await?;
        parent.remove(&vars::STEP_PHASE);
        parent.remove(&vars::HOOKS_FOR_EXECUTION);
        parent.set(&vars::HOOK_FOR_EXECUTION, hook.clone())?;
        let seed: Vec<VariableChange> = parent
            .snapshot()
            .into_iter()
            .map(|(name, value)| VariableChange {
                name,
                value: Some(value),
            })
            .collect();
        self.store.commit(hook_instance, &seed).await?;
        Ok(())
    }

    /// Wait as required by `phase`. Returns `true` once the step is done.
    async fn settle(&self, step: &str, phase: StepPhase, retries: &mut u32) -> Result<bool> {
        match phase {
            StepPhase::Done => Ok(true),
            StepPhase::Execute => Ok(false),
            StepPhase::Poll => {
                self.pause(step, self.config.poll_interval).await?;
                Ok(false)
            }
            StepPhase::Retry => {
                *retries += 1;
                if self.config.retry.is_exhausted(*retries) {
                    return Err(StepError::RetriesExhausted {
                        step: step.to_string(),
                        attempts: *retries,
                    });
                }
                let delay = self.config.retry.delay_for_attempt(*retries);
                warn!(step, attempt = *retries, delay_ms = delay.as_millis() as u64, "retrying step");
                self.pause(step, delay).await?;
                Ok(false)
            }
        }
    }

    async fn pause(&self, step: &str, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled {
                step: step.to_string(),
            }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Apply `change` to the stored variables of `instance_id`.
    async fn update(
        &self,
        instance_id: &str,
        change: impl FnOnce(&mut VariableScope) -> std::result::Result<(), VariableError>,
    ) -> Result<()> {
        let mut scope = VariableScope::from_snapshot(self.store.load(instance_id).await?);
        change(&mut scope)?;
        self.store.commit(instance_id, &scope.take_changes()).await?;
        Ok(())
    }
}

/// Instance holding the variables of the hook currently run for `instance_id`.
pub fn hook_instance_id(instance_id: &str) -> String {
    format!("{instance_id}:hook")
}
