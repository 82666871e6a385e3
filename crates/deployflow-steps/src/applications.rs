// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application lifecycle actions: stopping and incremental scale-up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployflow_core::descriptor::HookPhase;
use deployflow_core::hooks::{AfterHookProvider, BeforeHookProvider, Capabilities};
use deployflow_core::platform::{Application, PlatformError, ResourceKind};
use deployflow_core::{
    Action, AsyncExecution, AsyncExecutionState, AsyncStep, ProcessContext, Result, StepPhase,
    SyncStep, vars as core_vars,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vars;

/// Which application of a deployment the current action works on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPhase {
    /// Regular deployment.
    #[default]
    Standard,
    /// Blue-green deployment, the new (idle) application.
    BlueGreenIdle,
    /// Blue-green deployment, the currently live application.
    BlueGreenLive,
}

deployflow_core::impl_variable_value!(DeploymentPhase => "deployment-phase");

fn app_to_process(ctx: &ProcessContext) -> Result<Application> {
    Ok(ctx.require(&core_vars::APP_TO_PROCESS)?)
}

fn app_name(ctx: &ProcessContext) -> String {
    ctx.get(&core_vars::APP_TO_PROCESS)
        .ok()
        .flatten()
        .map(|app| app.name)
        .unwrap_or_default()
}

async fn fetch_application(ctx: &ProcessContext, name: &str) -> Result<Application> {
    ctx.client()?
        .get_application(name)
        .await?
        .ok_or_else(|| {
            PlatformError::NotFound {
                kind: ResourceKind::Application,
                name: name.to_string(),
            }
            .into()
        })
}

/// Stops `appToProcess` if it is running.
///
/// Runs the module's before-stop hooks first and its after-stop hooks once
/// the application is stopped. Blue-green deployments use the idle or live
/// variants of both, depending on `deploymentPhase`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopApplicationStep;

impl Action for StopApplicationStep {
    fn name(&self) -> &str {
        "stop-application"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error stopping application \"{}\"", app_name(ctx))
    }

    fn capabilities(&self) -> Capabilities<'_> {
        Capabilities::none().with_before(self).with_after(self)
    }
}

impl BeforeHookProvider for StopApplicationStep {
    fn before_hook_phases(&self, ctx: &ProcessContext) -> Vec<HookPhase> {
        let phase = match ctx.get(&vars::DEPLOYMENT_PHASE).ok().flatten().unwrap_or_default() {
            DeploymentPhase::Standard => HookPhase::DeployApplicationBeforeStop,
            DeploymentPhase::BlueGreenIdle => HookPhase::BlueGreenApplicationBeforeStopIdle,
            DeploymentPhase::BlueGreenLive => HookPhase::BlueGreenApplicationBeforeStopLive,
        };
        vec![phase]
    }
}

impl AfterHookProvider for StopApplicationStep {
    fn after_hook_phases(&self, ctx: &ProcessContext) -> Vec<HookPhase> {
        let phase = match ctx.get(&vars::DEPLOYMENT_PHASE).ok().flatten().unwrap_or_default() {
            DeploymentPhase::Standard => HookPhase::DeployApplicationAfterStop,
            DeploymentPhase::BlueGreenIdle => HookPhase::BlueGreenApplicationAfterStopIdle,
            DeploymentPhase::BlueGreenLive => HookPhase::BlueGreenApplicationAfterStopLive,
        };
        vec![phase]
    }
}

#[async_trait]
impl SyncStep for StopApplicationStep {
    async fn run(&self, ctx: &mut ProcessContext) -> Result<()> {
        let app = app_to_process(ctx)?;
        let client = ctx.client()?;
        match client.get_application(&app.name).await? {
            Some(existing) if existing.started => {
                ctx.logger().info(format!("Stopping application \"{}\"...", app.name));
                client.stop_application(&app.name).await?;
                ctx.logger().debug(format!("Application \"{}\" stopped", app.name));
            }
            Some(_) => {
                ctx.logger()
                    .debug(format!("Application \"{}\" is already stopped", app.name));
            }
            None => {
                ctx.logger()
                    .debug(format!("Application \"{}\" does not exist, nothing to stop", app.name));
            }
        }
        Ok(())
    }
}

/// Decides whether an application reached the instance count it was scaled to.
pub trait InstancesReadyPolicy: Send + Sync {
    /// Whether `app` is ready at `target` instances.
    fn is_ready(&self, target: u32, app: &Application) -> bool;
}

/// Ready once exactly `target` instances are running.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMatchesDesired;

impl InstancesReadyPolicy for RunningMatchesDesired {
    fn is_ready(&self, target: u32, app: &Application) -> bool {
        app.running_instances == target
    }
}

/// Scales `appToProcess` up to its desired instance count one instance at a
/// time, waiting for each new instance before adding the next.
///
/// If the application stops while being scaled, it is scaled back to the
/// count it had before the update and the action is retried.
#[derive(Clone)]
pub struct IncrementalInstancesUpdateStep {
    policy: Arc<dyn InstancesReadyPolicy>,
    default_timeout: Duration,
}

impl IncrementalInstancesUpdateStep {
    /// Update using [`RunningMatchesDesired`], bounded by `default_timeout`
    /// unless `startTimeout` is set.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            policy: Arc::new(RunningMatchesDesired),
            default_timeout,
        }
    }

    /// Replace the readiness policy.
    pub fn with_policy(mut self, policy: Arc<dyn InstancesReadyPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

impl Action for IncrementalInstancesUpdateStep {
    fn name(&self) -> &str {
        "incremental-instances-update"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        let module = ctx
            .get(&core_vars::APP_TO_PROCESS)
            .ok()
            .flatten()
            .map(|app| app.module_name.unwrap_or(app.name))
            .unwrap_or_default();
        format!("Error during incremental instance update of module \"{module}\"")
    }
}

#[async_trait]
impl AsyncStep for IncrementalInstancesUpdateStep {
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let app = app_to_process(ctx)?;
        let current = fetch_application(ctx, &app.name).await?;

        ctx.set(&vars::PREVIOUS_INSTANCE_COUNT, current.instances)?;
        if current.instances >= app.instances {
            ctx.logger().info(format!(
                "Application \"{}\" already scaled to the desired {} instances",
                app.name, app.instances
            ));
            return Ok(StepPhase::Done);
        }

        let target = current.instances + 1;
        ctx.logger().info(format!(
            "Starting incremental instance update of \"{}\" from {} to {} instances",
            app.name, current.instances, app.instances
        ));
        ctx.client()?.scale_application(&app.name, target).await?;
        ctx.set(&vars::INSTANCE_UPDATE_TARGET, target)?;
        Ok(StepPhase::Poll)
    }

    fn async_executions(&self, _ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>> {
        Ok(vec![Box::new(PollInstancesUpdate {
            policy: self.policy.clone(),
        })])
    }

    fn timeout(&self, ctx: &ProcessContext) -> Option<Duration> {
        let configured = ctx.get(&vars::START_TIMEOUT).ok().flatten();
        Some(configured.map_or(self.default_timeout, Duration::from_secs))
    }

    fn resource_name(&self, ctx: &ProcessContext) -> String {
        app_name(ctx)
    }
}

struct PollInstancesUpdate {
    policy: Arc<dyn InstancesReadyPolicy>,
}

impl PollInstancesUpdate {
    async fn scale_back(&self, ctx: &mut ProcessContext, app: &Application) -> Result<()> {
        let previous = ctx.require(&vars::PREVIOUS_INSTANCE_COUNT)?;
        ctx.logger().error(format!(
            "Application \"{}\" stopped during the instance update, scaling back to {previous} instances",
            app.name
        ));
        ctx.client()?.scale_application(&app.name, previous).await?;
        Ok(())
    }
}

#[async_trait]
impl AsyncExecution for PollInstancesUpdate {
    async fn execute(&self, ctx: &mut ProcessContext) -> Result<AsyncExecutionState> {
        let app = app_to_process(ctx)?;
        let target = ctx.require(&vars::INSTANCE_UPDATE_TARGET)?;
        let current = fetch_application(ctx, &app.name).await?;

        if !current.started {
            self.scale_back(ctx, &app).await?;
            return Ok(AsyncExecutionState::Error);
        }
        if !self.policy.is_ready(target, &current) {
            debug!(
                app = %app.name,
                running = current.running_instances,
                target,
                "waiting for instances"
            );
            return Ok(AsyncExecutionState::Running);
        }
        if target >= app.instances {
            ctx.logger().info(format!(
                "Application \"{}\" scaled to {} instances",
                app.name, target
            ));
            return Ok(AsyncExecutionState::Finished);
        }

        let next = target + 1;
        ctx.client()?.scale_application(&app.name, next).await?;
        ctx.set(&vars::INSTANCE_UPDATE_TARGET, next)?;
        ctx.logger()
            .debug(format!("Scaled application \"{}\" to {next} instances", app.name));
        Ok(AsyncExecutionState::Running)
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error polling instances of application \"{}\"", app_name(ctx))
    }
}
