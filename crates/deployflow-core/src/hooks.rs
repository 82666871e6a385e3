// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Before/after hook extension mechanism.
//!
//! An action opts into hooks by returning [`Capabilities`] that reference a
//! [`BeforeHookProvider`] and/or an [`AfterHookProvider`]. On every invocation
//! of such an action:
//!
//! 1. The module being processed is resolved from the context.
//! 2. In a pre-execute phase (EXECUTE, RETRY) the module's hooks for the
//!    before-phases that have not run yet are written to
//!    `hooksForExecution`. If there are any, the invocation ends with the
//!    phase unchanged and the action body does not run.
//! 3. Otherwise the body runs. If it reports DONE, the pending after-hooks
//!    are written to `hooksForExecution` the same way.
//!
//! The driver runs the listed hooks as separate steps between invocations,
//! so a hook and the action body never share an invocation.
//!
//! Which hooks already ran is tracked per module in `executedHooksFor<module>`
//! (hook name to phase tags); a hook is marked as run when it is scheduled.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context::ProcessContext;
use crate::descriptor::{Hook, HookPhase, Module};
use crate::error::Result;
use crate::phase::StepPhase;
use crate::step::Step;
use crate::vars;

/// Action that declares hooks to run before its body.
pub trait BeforeHookProvider: Send + Sync {
    /// Hook phases that precede the action in the current deployment.
    fn before_hook_phases(&self, ctx: &ProcessContext) -> Vec<HookPhase>;
}

/// Action that declares hooks to run after its body.
pub trait AfterHookProvider: Send + Sync {
    /// Hook phases that follow the action in the current deployment.
    fn after_hook_phases(&self, ctx: &ProcessContext) -> Vec<HookPhase>;
}

/// Optional capabilities an action supports.
#[derive(Clone, Copy, Default)]
pub struct Capabilities<'a> {
    before: Option<&'a dyn BeforeHookProvider>,
    after: Option<&'a dyn AfterHookProvider>,
}

impl<'a> Capabilities<'a> {
    /// No capabilities.
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds the before-hook capability.
    pub fn with_before(mut self, provider: &'a dyn BeforeHookProvider) -> Self {
        self.before = Some(provider);
        self
    }

    /// Adds the after-hook capability.
    pub fn with_after(mut self, provider: &'a dyn AfterHookProvider) -> Self {
        self.after = Some(provider);
        self
    }

    /// Whether no capability is declared.
    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }

    /// Hook phases relevant for `step_phase`.
    pub fn hook_phases(&self, ctx: &ProcessContext, step_phase: StepPhase) -> Vec<HookPhase> {
        if step_phase.is_pre_execute() {
            self.before
                .map(|p| p.before_hook_phases(ctx))
                .unwrap_or_default()
        } else if step_phase.is_post_execute() {
            self.after
                .map(|p| p.after_hook_phases(ctx))
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}

/// Module the current action works on, if any.
///
/// `moduleToDeploy` wins; otherwise the descriptor module named by the
/// application being processed.
pub fn resolve_module(ctx: &ProcessContext) -> Result<Option<Module>> {
    if let Some(module) = ctx.get(&vars::MODULE_TO_DEPLOY)? {
        return Ok(Some(module));
    }
    let Some(descriptor) = ctx.get(&vars::COMPLETE_DEPLOYMENT_DESCRIPTOR)? else {
        return Ok(None);
    };
    let Some(app) = ctx.get(&vars::APP_TO_PROCESS)? else {
        return Ok(None);
    };
    Ok(app
        .module_name
        .as_deref()
        .and_then(|name| descriptor.resolve_module(name)))
}

/// Hooks of `module` for `phases` that have not run yet, given the
/// executed-hooks bookkeeping. Declaration order, no duplicates.
pub fn pending_hooks(
    module: &Module,
    phases: &[HookPhase],
    executed: &BTreeMap<String, Vec<String>>,
) -> Vec<(Hook, HookPhase)> {
    let mut pending: Vec<(Hook, HookPhase)> = Vec::new();
    for &phase in phases {
        for hook in module.hooks_for(phase) {
            let already_run = executed.get(&hook.name).is_some_and(|tags| {
                tags.iter()
                    .any(|tag| tag.parse::<HookPhase>().ok() == Some(phase))
            });
            if already_run || pending.iter().any(|(h, _)| h.name == hook.name) {
                continue;
            }
            pending.push((hook.clone(), phase));
        }
    }
    pending
}

/// Compute the pending hooks for `phases`, mark them as run and publish
/// them in `hooksForExecution`. The list is written even when empty.
pub fn schedule_hooks(
    ctx: &mut ProcessContext,
    module: &Module,
    phases: &[HookPhase],
) -> Result<Vec<Hook>> {
    let executed_var = vars::executed_hooks_for(&module.name);
    let mut executed = ctx.get(&executed_var)?.unwrap_or_default();

    let pending = pending_hooks(module, phases, &executed);
    for (hook, phase) in &pending {
        let tags = executed.entry(hook.name.clone()).or_default();
        for declared in &hook.phases {
            if declared.parse::<HookPhase>().ok() == Some(*phase) && !tags.contains(declared) {
                tags.push(declared.clone());
            }
        }
    }
    if !pending.is_empty() {
        ctx.set(&executed_var, executed)?;
    }

    let hooks: Vec<Hook> = pending.into_iter().map(|(hook, _)| hook).collect();
    ctx.set(&vars::HOOKS_FOR_EXECUTION, hooks.clone())?;
    Ok(hooks)
}

/// Run the body of `step` behind its hook capabilities.
pub(crate) async fn execute_with_hooks(step: &dyn Step, ctx: &mut ProcessContext) -> Result<StepPhase> {
    let capabilities = step.capabilities();
    if capabilities.is_empty() {
        return step.execute_step(ctx).await;
    }
    let Some(module) = resolve_module(ctx)? else {
        return step.execute_step(ctx).await;
    };

    let current = ctx.require(&vars::STEP_PHASE)?;
    let phases = capabilities.hook_phases(ctx, current);
    let before = schedule_hooks(ctx, &module, &phases)?;
    if !before.is_empty() {
        ctx.logger().info(format!(
            "Executing hooks {} of module {} before {}",
            hook_names(&before),
            module.name,
            step.name()
        ));
        return Ok(current);
    }

    let result = step.execute_step(ctx).await?;
    if result.is_post_execute() {
        let phases = capabilities.hook_phases(ctx, result);
        let after = schedule_hooks(ctx, &module, &phases)?;
        if !after.is_empty() {
            ctx.logger().info(format!(
                "Executing hooks {} of module {} after {}",
                hook_names(&after),
                module.name,
                step.name()
            ));
        }
    } else {
        debug!(step = step.name(), phase = %result, "no after-hooks in this phase");
    }
    Ok(result)
}

fn hook_names(hooks: &[Hook]) -> String {
    hooks
        .iter()
        .map(|hook| hook.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
