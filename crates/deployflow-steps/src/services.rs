// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service binding and service key actions.
//!
//! Both kick off a platform job and poll it with
//! [`PollJobExecution`](deployflow_core::polling::PollJobExecution).

use async_trait::async_trait;
use deployflow_core::platform::{AsyncJob, ServiceInstance, ServiceKey};
use deployflow_core::polling::{AsyncJobPoller, PollJobExecution};
use deployflow_core::recovery::ErrorPolicy;
use deployflow_core::{
    Action, AsyncExecution, AsyncStep, ProcessContext, Result, StepPhase, vars as core_vars,
};

use crate::vars;

fn service(ctx: &ProcessContext) -> Option<ServiceInstance> {
    ctx.get(&vars::SERVICE_TO_BIND).ok().flatten()
}

fn service_is_optional(ctx: &ProcessContext) -> bool {
    service(ctx).is_some_and(|service| service.optional)
}

fn binding_label(ctx: &ProcessContext) -> String {
    let service = service(ctx).map(|s| s.name).unwrap_or_default();
    let app = ctx
        .get(&core_vars::APP_TO_PROCESS)
        .ok()
        .flatten()
        .map(|app| app.name)
        .unwrap_or_default();
    format!("service \"{service}\" to application \"{app}\"")
}

/// Binds `serviceToBind` to `appToProcess`.
///
/// Bindings to optional services never fail the deployment; the failure is
/// reported as a warning instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindServiceStep;

impl Action for BindServiceStep {
    fn name(&self) -> &str {
        "bind-service"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error binding {}", binding_label(ctx))
    }

    fn error_policy(&self, ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::STRICT.with_optional(service_is_optional(ctx))
    }
}

#[async_trait]
impl AsyncStep for BindServiceStep {
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let app = ctx.require(&core_vars::APP_TO_PROCESS)?;
        let service = ctx.require(&vars::SERVICE_TO_BIND)?;
        ctx.logger().info(format!("Binding {}...", binding_label(ctx)));

        let job = ctx.client()?.bind_service(&app.name, &service.name).await?;
        match job {
            Some(job_id) => {
                ctx.set(&vars::SERVICE_BINDING_JOB_ID, job_id)?;
                Ok(StepPhase::Poll)
            }
            None => {
                ctx.logger().debug(format!("Bound {}", binding_label(ctx)));
                Ok(StepPhase::Done)
            }
        }
    }

    fn async_executions(&self, _ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>> {
        Ok(vec![Box::new(PollJobExecution::new(BindingPoller))])
    }

    fn resource_name(&self, ctx: &ProcessContext) -> String {
        service(ctx).map(|s| s.name).unwrap_or_default()
    }
}

struct BindingPoller;

impl AsyncJobPoller for BindingPoller {
    fn job_id(&self, ctx: &ProcessContext) -> Result<String> {
        Ok(ctx.require(&vars::SERVICE_BINDING_JOB_ID)?)
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error waiting for binding of {}", binding_label(ctx))
    }

    fn is_optional(&self, ctx: &ProcessContext) -> bool {
        service_is_optional(ctx)
    }

    fn on_success(&self, ctx: &mut ProcessContext, _job: &AsyncJob) -> Result<()> {
        ctx.logger().info(format!("Bound {}", binding_label(ctx)));
        Ok(())
    }
}

fn key_label(ctx: &ProcessContext) -> String {
    match ctx.get(&vars::SERVICE_KEY_TO_DELETE).ok().flatten() {
        Some(key) => format!("service key \"{}\" of service \"{}\"", key.name, key.service_name),
        None => "service key".to_string(),
    }
}

/// Deletes `serviceKeyToDelete`. A key that is already gone, at kick-off or
/// while the deletion job is polled, counts as deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteServiceKeyStep;

impl Action for DeleteServiceKeyStep {
    fn name(&self) -> &str {
        "delete-service-key"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error deleting {}", key_label(ctx))
    }

    fn error_policy(&self, _ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::delete_style()
    }
}

#[async_trait]
impl AsyncStep for DeleteServiceKeyStep {
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let key: ServiceKey = ctx.require(&vars::SERVICE_KEY_TO_DELETE)?;
        ctx.logger().info(format!("Deleting {}...", key_label(ctx)));

        match ctx.client()?.delete_service_key(&key).await? {
            Some(job_id) => {
                ctx.set(&vars::SERVICE_KEY_JOB_ID, job_id)?;
                Ok(StepPhase::Poll)
            }
            None => {
                ctx.logger().debug(format!("Deleted {}", key_label(ctx)));
                Ok(StepPhase::Done)
            }
        }
    }

    fn async_executions(&self, _ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>> {
        Ok(vec![Box::new(PollJobExecution::new(KeyDeletionPoller))])
    }

    fn resource_name(&self, ctx: &ProcessContext) -> String {
        ctx.get(&vars::SERVICE_KEY_TO_DELETE)
            .ok()
            .flatten()
            .map(|key| key.name)
            .unwrap_or_default()
    }
}

struct KeyDeletionPoller;

impl AsyncJobPoller for KeyDeletionPoller {
    fn job_id(&self, ctx: &ProcessContext) -> Result<String> {
        Ok(ctx.require(&vars::SERVICE_KEY_JOB_ID)?)
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error waiting for deletion of {}", key_label(ctx))
    }

    fn error_policy(&self, _ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::delete_style()
    }

    fn on_success(&self, ctx: &mut ProcessContext, _job: &AsyncJob) -> Result<()> {
        ctx.logger().info(format!("Deleted {}", key_label(ctx)));
        Ok(())
    }
}
