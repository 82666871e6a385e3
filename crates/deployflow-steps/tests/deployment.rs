// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment actions driven end to end against the mock platform.

use std::sync::Arc;
use std::time::Duration;

use deployflow_core::descriptor::DeploymentDescriptor;
use deployflow_core::persistence::{InMemoryVariableStore, VariableStore};
use deployflow_core::platform::{Application, JobState, MockPlatform, ServiceInstance, TaskState};
use deployflow_core::retry::{RetryConfig, RetryStrategy};
use deployflow_core::variables::VariableScope;
use deployflow_core::{AsyncAction, DriverConfig, StepDriver, StepError, SyncAction, vars};
use deployflow_steps::{
    BindServiceStep, DeleteRouteStep, DeploymentPhase, ExecuteTaskStep, RunHookStep,
    StopApplicationStep, vars as step_vars,
};
use serde_json::json;

const INSTANCE: &str = "deploy-1";

fn driver(store: &Arc<InMemoryVariableStore>, platform: &MockPlatform) -> StepDriver {
    StepDriver::new(
        store.clone(),
        Arc::new(platform.clone()),
        DriverConfig {
            poll_interval: Duration::from_secs(5),
            retry: RetryConfig::new(2, 1000, RetryStrategy::ExponentialBackoff),
        },
    )
    .with_hook_executor(Arc::new(AsyncAction::new(RunHookStep::new(
        Duration::from_secs(600),
    ))))
}

async fn seed(store: &InMemoryVariableStore, fill: impl FnOnce(&mut VariableScope)) {
    let mut scope = VariableScope::new();
    scope.set(&vars::ORG, "acme".to_string()).unwrap();
    scope.set(&vars::SPACE, "prod".to_string()).unwrap();
    fill(&mut scope);
    store.seed(INSTANCE, scope.snapshot()).await;
}

async fn stored(store: &InMemoryVariableStore) -> VariableScope {
    VariableScope::from_snapshot(store.load(INSTANCE).await.unwrap())
}

#[tokio::test(start_paused = true)]
async fn deleting_an_absent_route_completes() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    seed(&store, |scope| {
        scope
            .set(&step_vars::ROUTE_TO_DELETE, "old.example.com".to_string())
            .unwrap();
    })
    .await;

    let report = driver(&store, &platform)
        .run(INSTANCE, &SyncAction::new(DeleteRouteStep))
        .await
        .unwrap();

    assert_eq!(report.invocations, 1);
    assert_eq!(platform.call_count("delete_route").await, 1);
}

fn descriptor() -> DeploymentDescriptor {
    serde_json::from_value(json!({
        "schema_version": "3.1.0",
        "id": "shop",
        "modules": [{
            "name": "web",
            "hooks": [
                {
                    "name": "drain",
                    "phases": ["deploy.application.before-stop"],
                    "parameters": { "command": "bin/drain" }
                },
                {
                    "name": "notify",
                    "phases": ["application.after-stop"],
                    "parameters": { "command": "bin/notify", "name": "notify-task" }
                },
                {
                    "name": "idle-only",
                    "phases": ["blue-green.application.before-stop.idle"],
                    "parameters": { "command": "bin/idle" }
                }
            ]
        }]
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn stop_runs_before_and_after_hooks_around_the_body() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    let app = Application {
        started: true,
        running_instances: 1,
        ..Application::named("web-blue").with_module("web")
    };
    platform.add_application(app.clone()).await;
    seed(&store, |scope| {
        scope
            .set(&vars::COMPLETE_DEPLOYMENT_DESCRIPTOR, descriptor())
            .unwrap();
        scope.set(&vars::APP_TO_PROCESS, app).unwrap();
    })
    .await;

    let report = driver(&store, &platform)
        .run(INSTANCE, &SyncAction::new(StopApplicationStep))
        .await
        .unwrap();

    assert_eq!(report.hooks_executed, vec!["drain", "notify"]);
    assert_eq!(report.invocations, 2);

    let calls = platform.calls().await;
    let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
    assert!(position("run_task web-blue drain") < position("stop_application web-blue"));
    assert!(position("stop_application web-blue") < position("run_task web-blue notify-task"));
    assert!(!platform.application("web-blue").await.unwrap().started);

    let values = stored(&store).await;
    assert!(values.require(&vars::HOOKS_FOR_EXECUTION).unwrap().is_empty());
    let executed = values.require(&vars::executed_hooks_for("web")).unwrap();
    assert_eq!(executed["notify"], vec!["application.after-stop".to_string()]);
    assert!(!executed.contains_key("idle-only"));
}

#[tokio::test(start_paused = true)]
async fn blue_green_idle_phase_picks_idle_hooks() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    let app = Application::named("web-green").with_module("web");
    platform.add_application(app.clone()).await;
    seed(&store, |scope| {
        scope
            .set(&vars::COMPLETE_DEPLOYMENT_DESCRIPTOR, descriptor())
            .unwrap();
        scope.set(&vars::APP_TO_PROCESS, app).unwrap();
        scope
            .set(&step_vars::DEPLOYMENT_PHASE, DeploymentPhase::BlueGreenIdle)
            .unwrap();
    })
    .await;

    let report = driver(&store, &platform)
        .run(INSTANCE, &SyncAction::new(StopApplicationStep))
        .await
        .unwrap();

    assert_eq!(report.hooks_executed, vec!["idle-only"]);
}

#[tokio::test(start_paused = true)]
async fn failing_hook_task_exhausts_retries() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    let app = Application::named("web-blue").with_module("web");
    platform.add_application(app.clone()).await;
    platform.script_task("drain", [TaskState::Failed]).await;
    seed(&store, |scope| {
        scope
            .set(&vars::COMPLETE_DEPLOYMENT_DESCRIPTOR, descriptor())
            .unwrap();
        scope.set(&vars::APP_TO_PROCESS, app).unwrap();
    })
    .await;

    let err = driver(&store, &platform)
        .run(INSTANCE, &SyncAction::new(StopApplicationStep))
        .await
        .unwrap_err();

    assert!(matches!(err, StepError::RetriesExhausted { ref step, .. } if step == "run-hook"));
    assert_eq!(platform.call_count("stop_application").await, 0);
}

#[tokio::test(start_paused = true)]
async fn optional_service_binding_failure_does_not_fail_deployment() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    platform.add_service("cache").await;
    platform
        .script_job("bind_service", [JobState::Processing, JobState::Failed])
        .await;
    seed(&store, |scope| {
        scope
            .set(&vars::APP_TO_PROCESS, Application::named("web"))
            .unwrap();
        scope
            .set(
                &step_vars::SERVICE_TO_BIND,
                ServiceInstance {
                    name: "cache".to_string(),
                    optional: true,
                },
            )
            .unwrap();
    })
    .await;

    let report = driver(&store, &platform)
        .run(INSTANCE, &AsyncAction::new(BindServiceStep))
        .await
        .unwrap();

    assert_eq!(report.invocations, 3);
    assert_eq!(report.retries, 0);
    assert!(report.messages.iter().any(|m| m.text.contains("optional")));
}

#[tokio::test(start_paused = true)]
async fn task_timeout_surfaces_as_timeout_error() {
    let store = Arc::new(InMemoryVariableStore::new());
    let platform = MockPlatform::new();
    platform.add_application(Application::named("web")).await;
    platform.script_task("migrate", [TaskState::Running]).await;
    seed(&store, |scope| {
        scope
            .set(&vars::APP_TO_PROCESS, Application::named("web"))
            .unwrap();
        scope
            .set(
                &step_vars::TASK_TO_EXECUTE,
                deployflow_core::platform::TaskSpec {
                    name: "migrate".to_string(),
                    command: "bin/migrate".to_string(),
                    memory_mb: Some(256),
                },
            )
            .unwrap();
        scope.set(&step_vars::TASK_EXECUTION_TIMEOUT, 30).unwrap();
    })
    .await;

    // The driver's clock follows tokio's paused time through the poll interval.
    let clock = deployflow_core::clock::ManualClock::at_epoch();
    let ticking = clock.clone();
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ticking.advance(chrono::Duration::seconds(1));
        }
    });

    let err = driver(&store, &platform)
        .with_clock(Arc::new(clock))
        .run(INSTANCE, &AsyncAction::new(ExecuteTaskStep::new(Duration::from_secs(600))))
        .await
        .unwrap_err();
    ticker.abort();

    assert!(err.is_timeout());
    assert_eq!(err.error_code(), "STEP_TIMEOUT");
    assert_eq!(stored(&store).await.require(&vars::STEP_PHASE).unwrap(), deployflow_core::StepPhase::Retry);
}
