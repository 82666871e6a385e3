// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task execution and the hook executor.
//!
//! A task is polled in two steps: first its state until it terminates, then
//! the application's recent logs until the task's exit line shows up, so
//! that everything the task printed can be forwarded to the step logger.

use std::time::Duration;

use async_trait::async_trait;
use deployflow_core::descriptor::Hook;
use deployflow_core::platform::{Task, TaskSpec, TaskState};
use deployflow_core::{
    Action, AsyncExecution, AsyncExecutionState, AsyncStep, ProcessContext, Result, StepError,
    StepPhase, vars as core_vars,
};
use serde_json::Value;

use crate::vars;

/// Minimum time between two "still running" messages of a task.
pub const STALLED_TASK_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Hook type executed as a task.
pub const TASK_HOOK_KIND: &str = "task";

fn log_source(task_name: &str) -> String {
    format!("APP/TASK/{task_name}")
}

fn task_name(ctx: &ProcessContext) -> String {
    ctx.get(&vars::TASK_TO_EXECUTE)
        .ok()
        .flatten()
        .map(|task| task.name)
        .unwrap_or_default()
}

/// Runs `taskToExecute` on `appToProcess` and waits for it to terminate.
///
/// The time budget is `taskExecutionTimeout` seconds, or the configured
/// default.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteTaskStep {
    default_timeout: Duration,
}

impl ExecuteTaskStep {
    /// Step falling back to `default_timeout`.
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Action for ExecuteTaskStep {
    fn name(&self) -> &str {
        "execute-task"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error executing task \"{}\"", task_name(ctx))
    }
}

#[async_trait]
impl AsyncStep for ExecuteTaskStep {
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let app = ctx.require(&core_vars::APP_TO_PROCESS)?;
        let spec = ctx.require(&vars::TASK_TO_EXECUTE)?;
        ctx.logger().info(format!(
            "Executing task \"{}\" on application \"{}\"...",
            spec.name, app.name
        ));

        let task = ctx.client()?.run_task(&app.name, &spec).await?;
        ctx.set(&vars::STARTED_TASK, task)?;
        ctx.remove(&vars::LAST_TASK_POLL_LOG_TIMESTAMP);
        Ok(StepPhase::Poll)
    }

    fn async_executions(&self, _ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>> {
        Ok(vec![Box::new(PollTaskStatus), Box::new(PollTaskLogs)])
    }

    fn timeout(&self, ctx: &ProcessContext) -> Option<Duration> {
        let configured = ctx.get(&vars::TASK_EXECUTION_TIMEOUT).ok().flatten();
        Some(configured.map_or(self.default_timeout, Duration::from_secs))
    }

    fn resource_name(&self, ctx: &ProcessContext) -> String {
        task_name(ctx)
    }
}

struct PollTaskStatus;

impl PollTaskStatus {
    /// Report a long-running task at most once per interval.
    fn report_running(&self, ctx: &mut ProcessContext, task: &Task) -> Result<()> {
        let now = ctx.now().timestamp_millis();
        let Some(last) = ctx.get(&vars::LAST_TASK_POLL_LOG_TIMESTAMP)? else {
            ctx.set(&vars::LAST_TASK_POLL_LOG_TIMESTAMP, now)?;
            return Ok(());
        };
        if now.saturating_sub(last) >= STALLED_TASK_LOG_INTERVAL.as_millis() as i64 {
            ctx.logger()
                .info(format!("Task \"{}\" is still running...", task.name));
            ctx.set(&vars::LAST_TASK_POLL_LOG_TIMESTAMP, now)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncExecution for PollTaskStatus {
    async fn execute(&self, ctx: &mut ProcessContext) -> Result<AsyncExecutionState> {
        let started = ctx.require(&vars::STARTED_TASK)?;
        let task = ctx.client()?.get_task(&started.guid).await?;

        match task.state {
            TaskState::Succeeded => {
                ctx.logger()
                    .info(format!("Task \"{}\" executed successfully", task.name));
                Ok(AsyncExecutionState::Finished)
            }
            TaskState::Failed => {
                let reason = task.failure_reason.as_deref().unwrap_or("unknown reason");
                ctx.logger()
                    .error(format!("Task \"{}\" failed: {reason}", task.name));
                ctx.remove(&vars::LAST_TASK_POLL_LOG_TIMESTAMP);
                Ok(AsyncExecutionState::Error)
            }
            TaskState::Pending | TaskState::Running | TaskState::Canceling => {
                self.report_running(ctx, &task)?;
                Ok(AsyncExecutionState::Running)
            }
        }
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error polling status of task \"{}\"", task_name(ctx))
    }
}

struct PollTaskLogs;

#[async_trait]
impl AsyncExecution for PollTaskLogs {
    async fn execute(&self, ctx: &mut ProcessContext) -> Result<AsyncExecutionState> {
        let app = ctx.require(&core_vars::APP_TO_PROCESS)?;
        let started = ctx.require(&vars::STARTED_TASK)?;
        let source = log_source(&started.name);

        let logs = ctx.client()?.recent_logs(&app.name).await?;
        let task_logs: Vec<_> = logs.iter().filter(|log| log.source == source).collect();
        if !task_logs
            .iter()
            .any(|log| log.message.starts_with("Exited with status"))
        {
            return Ok(AsyncExecutionState::Running);
        }

        for log in task_logs {
            ctx.logger().info(format!("[{}] {}", log.source, log.message));
        }
        Ok(AsyncExecutionState::Finished)
    }

    fn polling_error_message(&self, ctx: &ProcessContext) -> String {
        format!("Error retrieving logs of task \"{}\"", task_name(ctx))
    }
}

/// Hook executor: runs `hookForExecution` as a task on `appToProcess`.
///
/// Hook parameters `name`, `command` and `memory` describe the task; the
/// task is named after the hook when `name` is missing. Hooks of other
/// types are skipped.
#[derive(Debug, Clone, Copy)]
pub struct RunHookStep {
    task: ExecuteTaskStep,
}

impl RunHookStep {
    /// Hook executor falling back to `default_timeout` per hook.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            task: ExecuteTaskStep::new(default_timeout),
        }
    }

    fn task_spec(&self, hook: &Hook) -> Result<TaskSpec> {
        let command = hook.parameter("command").ok_or_else(|| {
            StepError::fatal(
                self.name(),
                format!("Hook \"{}\" does not define a command", hook.name),
            )
        })?;
        Ok(TaskSpec {
            name: hook.parameter("name").unwrap_or(&hook.name).to_string(),
            command: command.to_string(),
            memory_mb: hook.parameters.get("memory").and_then(parse_memory_mb),
        })
    }
}

/// Memory in megabytes from a number or a size such as `512M` or `1G`.
fn parse_memory_mb(value: &Value) -> Option<u32> {
    if let Some(mb) = value.as_u64() {
        return u32::try_from(mb).ok();
    }
    let text = value.as_str()?.trim().to_ascii_uppercase();
    let text = text.strip_suffix('B').unwrap_or(&text);
    let (digits, factor) = match text.chars().last()? {
        'G' => (&text[..text.len() - 1], 1024),
        'M' => (&text[..text.len() - 1], 1),
        _ => (text, 1),
    };
    digits.trim().parse::<u32>().ok()?.checked_mul(factor)
}

impl Action for RunHookStep {
    fn name(&self) -> &str {
        "run-hook"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        let hook = ctx
            .get(&core_vars::HOOK_FOR_EXECUTION)
            .ok()
            .flatten()
            .map(|hook| hook.name)
            .unwrap_or_default();
        format!("Error executing hook \"{hook}\"")
    }
}

#[async_trait]
impl AsyncStep for RunHookStep {
    async fn start(&self, ctx: &mut ProcessContext) -> Result<StepPhase> {
        let hook = ctx.require(&core_vars::HOOK_FOR_EXECUTION)?;
        if hook.kind != TASK_HOOK_KIND {
            ctx.logger().warn(format!(
                "Hook \"{}\" has unsupported type \"{}\", skipping",
                hook.name, hook.kind
            ));
            return Ok(StepPhase::Done);
        }

        let spec = self.task_spec(&hook)?;
        ctx.set(&vars::TASK_TO_EXECUTE, spec)?;
        self.task.start(ctx).await
    }

    fn async_executions(&self, ctx: &ProcessContext) -> Result<Vec<Box<dyn AsyncExecution>>> {
        self.task.async_executions(ctx)
    }

    fn timeout(&self, ctx: &ProcessContext) -> Option<Duration> {
        self.task.timeout(ctx)
    }

    fn resource_name(&self, ctx: &ProcessContext) -> String {
        self.task.resource_name(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployflow_core::clock::ManualClock;
    use deployflow_core::context::MessageKind;
    use deployflow_core::platform::{Application, MockPlatform, PlatformError};
    use deployflow_core::variables::VariableScope;
    use deployflow_core::{AsyncAction, step};
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        platform: MockPlatform,
        clock: ManualClock,
        scope: VariableScope,
    }

    impl Harness {
        async fn new() -> Self {
            let platform = MockPlatform::new();
            platform.add_application(Application::named("web")).await;
            let mut scope = VariableScope::new();
            scope
                .set(&core_vars::APP_TO_PROCESS, Application::named("web"))
                .unwrap();
            scope.set(&core_vars::ORG, "acme".to_string()).unwrap();
            scope.set(&core_vars::SPACE, "prod".to_string()).unwrap();
            Self {
                platform,
                clock: ManualClock::at_epoch(),
                scope,
            }
        }

        async fn invoke<S: AsyncStep>(
            &mut self,
            action: &AsyncAction<S>,
        ) -> (Result<StepPhase>, Vec<deployflow_core::context::ProgressMessage>) {
            let mut ctx = ProcessContext::new(
                "instance-1",
                action.name(),
                self.scope.clone(),
                Arc::new(self.platform.clone()),
                Arc::new(self.clock.clone()),
            );
            let outcome = step::execute(action, &mut ctx).await;
            let messages = ctx.logger().messages();
            self.scope = ctx.into_variables();
            self.scope.take_changes();
            (outcome, messages)
        }
    }

    fn migrate() -> TaskSpec {
        TaskSpec {
            name: "migrate".to_string(),
            command: "bin/migrate".to_string(),
            memory_mb: None,
        }
    }

    #[tokio::test]
    async fn test_task_then_logs() {
        let mut h = Harness::new().await;
        h.scope.set(&vars::TASK_TO_EXECUTE, migrate()).unwrap();
        let action = AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(600)));

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        // RUNNING
        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        // SUCCEEDED
        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        assert_eq!(h.scope.require(&core_vars::ASYNC_STEP_EXECUTION_INDEX).unwrap(), 1);

        let (outcome, messages) = h.invoke(&action).await;
        assert_eq!(outcome.unwrap(), StepPhase::Done);
        assert!(
            messages
                .iter()
                .any(|m| m.text == "[APP/TASK/migrate] Exited with status 0")
        );
    }

    #[tokio::test]
    async fn test_transient_status_failure_keeps_polling_the_started_task() {
        let mut h = Harness::new().await;
        h.scope.set(&vars::TASK_TO_EXECUTE, migrate()).unwrap();
        let action = AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(600)));

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        let started = h.scope.require(&core_vars::START_TIME).unwrap();
        h.platform
            .fail_next("get_task", PlatformError::Transient("connection reset".to_string()))
            .await;
        h.clock.advance(chrono::Duration::seconds(30));

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Retry);
        assert_eq!(h.scope.require(&core_vars::STEP_PHASE).unwrap(), StepPhase::Poll);

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        assert_eq!(h.platform.call_count("run_task").await, 1);
        assert_eq!(h.scope.require(&core_vars::START_TIME).unwrap(), started);
    }

    #[tokio::test]
    async fn test_failed_task_retries() {
        let mut h = Harness::new().await;
        h.platform.script_task("migrate", [TaskState::Failed]).await;
        h.scope.set(&vars::TASK_TO_EXECUTE, migrate()).unwrap();
        let action = AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(600)));

        h.invoke(&action).await.0.unwrap();
        let (outcome, messages) = h.invoke(&action).await;

        assert_eq!(outcome.unwrap(), StepPhase::Retry);
        assert_eq!(messages[0].kind, MessageKind::Error);
        assert_eq!(messages[0].text, "Task \"migrate\" failed: Exited with status 1");
    }

    #[tokio::test]
    async fn test_task_timeout_from_variable() {
        let mut h = Harness::new().await;
        h.platform.script_task("migrate", [TaskState::Running]).await;
        h.scope.set(&vars::TASK_TO_EXECUTE, migrate()).unwrap();
        h.scope.set(&vars::TASK_EXECUTION_TIMEOUT, 5).unwrap();
        let action = AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(600)));

        h.invoke(&action).await.0.unwrap();
        h.clock.advance(chrono::Duration::seconds(4));
        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        h.clock.advance(chrono::Duration::seconds(2));

        let err = h.invoke(&action).await.0.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("'migrate'"));
    }

    #[tokio::test]
    async fn test_stalled_task_is_reported_once_per_interval() {
        let mut h = Harness::new().await;
        h.platform.script_task("migrate", [TaskState::Running]).await;
        h.scope.set(&vars::TASK_TO_EXECUTE, migrate()).unwrap();
        let action = AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(3600)));

        h.invoke(&action).await.0.unwrap();
        let (_, first) = h.invoke(&action).await;
        assert!(first.is_empty());

        h.clock.advance(chrono::Duration::minutes(6));
        let (_, second) = h.invoke(&action).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].text, "Task \"migrate\" is still running...");

        h.clock.advance(chrono::Duration::minutes(1));
        let (_, third) = h.invoke(&action).await;
        assert!(third.is_empty());
    }

    fn hook(parameters: serde_json::Value) -> Hook {
        serde_json::from_value(json!({
            "name": "seed-data",
            "phases": ["deploy.application.after-stop"],
            "parameters": parameters,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_hook_runs_as_task() {
        let mut h = Harness::new().await;
        h.scope
            .set(
                &core_vars::HOOK_FOR_EXECUTION,
                hook(json!({ "command": "bin/seed", "memory": "1G" })),
            )
            .unwrap();
        let action = AsyncAction::new(RunHookStep::new(Duration::from_secs(600)));

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Poll);
        let spec = h.scope.require(&vars::TASK_TO_EXECUTE).unwrap();
        assert_eq!(spec.name, "seed-data");
        assert_eq!(spec.memory_mb, Some(1024));
        assert_eq!(h.platform.calls().await.last().unwrap(), "run_task web seed-data");

        while h.invoke(&action).await.0.unwrap() != StepPhase::Done {}
    }

    #[tokio::test]
    async fn test_hook_without_command_is_fatal() {
        let mut h = Harness::new().await;
        h.scope
            .set(&core_vars::HOOK_FOR_EXECUTION, hook(json!({ "name": "x" })))
            .unwrap();
        let action = AsyncAction::new(RunHookStep::new(Duration::from_secs(600)));

        let err = h.invoke(&action).await.0.unwrap_err();
        assert!(matches!(err, StepError::Fatal { .. }));
        assert_eq!(h.platform.call_count("run_task").await, 0);
    }

    #[tokio::test]
    async fn test_non_task_hook_is_skipped() {
        let mut h = Harness::new().await;
        let mut other = hook(json!({ "command": "x" }));
        other.kind = "webhook".to_string();
        h.scope.set(&core_vars::HOOK_FOR_EXECUTION, other).unwrap();
        let action = AsyncAction::new(RunHookStep::new(Duration::from_secs(600)));

        assert_eq!(h.invoke(&action).await.0.unwrap(), StepPhase::Done);
    }

    #[test]
    fn test_memory_parsing() {
        assert_eq!(parse_memory_mb(&json!(256)), Some(256));
        assert_eq!(parse_memory_mb(&json!("512M")), Some(512));
        assert_eq!(parse_memory_mb(&json!("2g")), Some(2048));
        assert_eq!(parse_memory_mb(&json!("1GB")), Some(1024));
        assert_eq!(parse_memory_mb(&json!("lots")), None);
    }
}
