// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock platform for testing.
//!
//! An in-memory platform that keeps applications, routes, service keys, jobs
//! and tasks, lets tests script the sequence of states a job or task goes
//! through, and records every call it receives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::*;

#[derive(Default)]
struct MockState {
    applications: HashMap<String, Application>,
    routes: HashSet<String>,
    services: HashSet<String>,
    service_keys: HashSet<(String, String)>,
    jobs: HashMap<String, (String, VecDeque<JobState>)>,
    job_scripts: HashMap<String, VecDeque<JobState>>,
    tasks: HashMap<String, (String, Task, VecDeque<TaskState>)>,
    task_scripts: HashMap<String, VecDeque<TaskState>>,
    running_scripts: HashMap<String, VecDeque<u32>>,
    logs: HashMap<String, Vec<ApplicationLog>>,
    failures: HashMap<String, VecDeque<PlatformError>>,
    calls: Vec<String>,
    next_id: u64,
}

impl MockState {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn take_failure(&mut self, operation: &str) -> PlatformResult<()> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn create_job(&mut self, operation: &str) -> String {
        let id = self.next_id("job");
        let states = self
            .job_scripts
            .remove(operation)
            .unwrap_or_else(|| VecDeque::from([JobState::Complete]));
        self.jobs.insert(id.clone(), (operation.to_string(), states));
        id
    }
}

/// Pops the front of a script, keeping the last entry sticky.
fn advance<T: Copy>(script: &mut VecDeque<T>) -> Option<T> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().copied()
    }
}

/// In-memory platform for tests.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    clients_issued: Arc<AtomicUsize>,
}

impl MockPlatform {
    /// Create an empty mock platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application.
    pub async fn add_application(&self, app: Application) {
        let mut state = self.state.lock().await;
        state.applications.insert(app.name.clone(), app);
    }

    /// Register a route.
    pub async fn add_route(&self, route: &str) {
        self.state.lock().await.routes.insert(route.to_string());
    }

    /// Register a service instance.
    pub async fn add_service(&self, name: &str) {
        self.state.lock().await.services.insert(name.to_string());
    }

    /// Register a service key.
    pub async fn add_service_key(&self, key: &ServiceKey) {
        self.state
            .lock()
            .await
            .service_keys
            .insert((key.service_name.clone(), key.name.clone()));
    }

    /// States reported by the next job created by `operation`, one per `get_job` call.
    ///
    /// The last state repeats. Unscripted jobs complete immediately.
    pub async fn script_job(&self, operation: &str, states: impl IntoIterator<Item = JobState>) {
        self.state
            .lock()
            .await
            .job_scripts
            .insert(operation.to_string(), states.into_iter().collect());
    }

    /// States reported by every run of the task named `task`, one per `get_task` call.
    ///
    /// Unscripted tasks run once and then succeed.
    pub async fn script_task(&self, task: &str, states: impl IntoIterator<Item = TaskState>) {
        self.state
            .lock()
            .await
            .task_scripts
            .insert(task.to_string(), states.into_iter().collect());
    }

    /// Running instance counts reported by successive `get_application` calls.
    pub async fn script_running_instances(&self, app: &str, counts: impl IntoIterator<Item = u32>) {
        self.state
            .lock()
            .await
            .running_scripts
            .insert(app.to_string(), counts.into_iter().collect());
    }

    /// Make the next call of `operation` fail with `error`.
    pub async fn fail_next(&self, operation: &str, error: PlatformError) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Calls received so far, formatted as `operation argument`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls whose operation is `operation`.
    pub async fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    /// Current state of an application.
    pub async fn application(&self, name: &str) -> Option<Application> {
        self.state.lock().await.applications.get(name).cloned()
    }

    /// Whether a route exists.
    pub async fn has_route(&self, route: &str) -> bool {
        self.state.lock().await.routes.contains(route)
    }

    /// Whether a service key exists.
    pub async fn has_service_key(&self, key: &ServiceKey) -> bool {
        self.state
            .lock()
            .await
            .service_keys
            .contains(&(key.service_name.clone(), key.name.clone()))
    }

    /// Number of clients handed out through [`ClientProvider`].
    pub fn clients_issued(&self) -> usize {
        self.clients_issued.load(Ordering::SeqCst)
    }
}

impl ClientProvider for MockPlatform {
    fn client(
        &self,
        _target: &SpaceTarget,
        _correlation_id: &str,
    ) -> PlatformResult<Arc<dyn PlatformClient>> {
        self.clients_issued.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn get_application(&self, name: &str) -> PlatformResult<Option<Application>> {
        let mut state = self.state.lock().await;
        state.record(format!("get_application {name}"));
        state.take_failure("get_application")?;

        let running = state.running_scripts.get_mut(name).and_then(advance);
        Ok(state.applications.get_mut(name).map(|app| {
            if let Some(running) = running {
                app.running_instances = running;
            }
            app.clone()
        }))
    }

    async fn start_application(&self, name: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.record(format!("start_application {name}"));
        state.take_failure("start_application")?;

        let app = state
            .applications
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::Application,
                name: name.to_string(),
            })?;
        app.started = true;
        app.running_instances = app.instances;
        Ok(())
    }

    async fn stop_application(&self, name: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.record(format!("stop_application {name}"));
        state.take_failure("stop_application")?;

        let app = state
            .applications
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::Application,
                name: name.to_string(),
            })?;
        app.started = false;
        app.running_instances = 0;
        Ok(())
    }

    async fn scale_application(&self, name: &str, instances: u32) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.record(format!("scale_application {name} {instances}"));
        state.take_failure("scale_application")?;

        let app = state
            .applications
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::Application,
                name: name.to_string(),
            })?;
        app.instances = instances;
        if app.started {
            app.running_instances = instances;
        }
        Ok(())
    }

    async fn delete_route(&self, route: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.record(format!("delete_route {route}"));
        state.take_failure("delete_route")?;

        if state.routes.remove(route) {
            Ok(())
        } else {
            Err(PlatformError::NotFound {
                kind: ResourceKind::Route,
                name: route.to_string(),
            })
        }
    }

    async fn bind_service(&self, app: &str, service: &str) -> PlatformResult<Option<String>> {
        let mut state = self.state.lock().await;
        state.record(format!("bind_service {app} {service}"));
        state.take_failure("bind_service")?;

        if !state.services.contains(service) {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::ServiceInstance,
                name: service.to_string(),
            });
        }
        Ok(Some(state.create_job("bind_service")))
    }

    async fn create_service_key(&self, key: &ServiceKey) -> PlatformResult<Option<String>> {
        let mut state = self.state.lock().await;
        state.record(format!("create_service_key {}/{}", key.service_name, key.name));
        state.take_failure("create_service_key")?;

        state
            .service_keys
            .insert((key.service_name.clone(), key.name.clone()));
        Ok(Some(state.create_job("create_service_key")))
    }

    async fn delete_service_key(&self, key: &ServiceKey) -> PlatformResult<Option<String>> {
        let mut state = self.state.lock().await;
        state.record(format!("delete_service_key {}/{}", key.service_name, key.name));
        state.take_failure("delete_service_key")?;

        if !state
            .service_keys
            .remove(&(key.service_name.clone(), key.name.clone()))
        {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::ServiceKey,
                name: key.name.clone(),
            });
        }
        Ok(Some(state.create_job("delete_service_key")))
    }

    async fn run_task(&self, app: &str, spec: &TaskSpec) -> PlatformResult<Task> {
        let mut state = self.state.lock().await;
        state.record(format!("run_task {app} {}", spec.name));
        state.take_failure("run_task")?;

        if !state.applications.contains_key(app) {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::Application,
                name: app.to_string(),
            });
        }
        let guid = state.next_id("task");
        let script = state
            .task_scripts
            .get(&spec.name)
            .cloned()
            .unwrap_or_else(|| VecDeque::from([TaskState::Running, TaskState::Succeeded]));
        let task = Task {
            guid: guid.clone(),
            name: spec.name.clone(),
            state: TaskState::Pending,
            failure_reason: None,
        };
        state
            .tasks
            .insert(guid, (app.to_string(), task.clone(), script));
        Ok(task)
    }

    async fn get_task(&self, guid: &str) -> PlatformResult<Task> {
        let mut state = self.state.lock().await;
        state.record(format!("get_task {guid}"));
        state.take_failure("get_task")?;

        let (app, task, script) = state.tasks.get_mut(guid).ok_or_else(|| PlatformError::NotFound {
            kind: ResourceKind::Task,
            name: guid.to_string(),
        })?;
        let previous = task.state;
        if let Some(next) = advance(script) {
            task.state = next;
        }
        if task.state == TaskState::Failed {
            task.failure_reason = Some("Exited with status 1".to_string());
        }
        let app = app.clone();
        let task = task.clone();

        let exit_status = match task.state {
            TaskState::Succeeded => Some(0),
            TaskState::Failed => Some(1),
            _ => None,
        };
        if let Some(status) = exit_status
            && previous != task.state
        {
            state.logs.entry(app).or_default().push(ApplicationLog {
                source: format!("APP/TASK/{}", task.name),
                message: format!("Exited with status {status}"),
                timestamp: Utc::now(),
            });
        }
        Ok(task)
    }

    async fn recent_logs(&self, app: &str) -> PlatformResult<Vec<ApplicationLog>> {
        let mut state = self.state.lock().await;
        state.record(format!("recent_logs {app}"));
        state.take_failure("recent_logs")?;

        Ok(state.logs.get(app).cloned().unwrap_or_default())
    }

    async fn get_job(&self, id: &str) -> PlatformResult<AsyncJob> {
        let mut state = self.state.lock().await;
        state.record(format!("get_job {id}"));
        state.take_failure("get_job")?;

        let (operation, script) = state.jobs.get_mut(id).ok_or_else(|| PlatformError::NotFound {
            kind: ResourceKind::Job,
            name: id.to_string(),
        })?;
        let job_state = advance(script).unwrap_or(JobState::Complete);
        let errors = if job_state == JobState::Failed {
            vec![JobErrorDetail {
                code: 10009,
                title: "CF-UnprocessableEntity".to_string(),
                detail: format!("{operation} failed"),
            }]
        } else {
            Vec::new()
        };
        Ok(AsyncJob {
            id: id.to_string(),
            operation: operation.clone(),
            state: job_state,
            warnings: Vec::new(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_job_states_stick_on_last() {
        let platform = MockPlatform::new();
        platform.add_service("db").await;
        platform
            .script_job("bind_service", [JobState::Processing, JobState::Complete])
            .await;

        let job_id = platform.bind_service("web", "db").await.unwrap().unwrap();

        assert_eq!(platform.get_job(&job_id).await.unwrap().state, JobState::Processing);
        assert_eq!(platform.get_job(&job_id).await.unwrap().state, JobState::Complete);
        assert_eq!(platform.get_job(&job_id).await.unwrap().state, JobState::Complete);
    }

    #[tokio::test]
    async fn test_failed_job_carries_errors() {
        let platform = MockPlatform::new();
        platform.add_service("db").await;
        platform.script_job("bind_service", [JobState::Failed]).await;

        let job_id = platform.bind_service("web", "db").await.unwrap().unwrap();
        let job = platform.get_job(&job_id).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_route_is_not_found() {
        let platform = MockPlatform::new();
        platform.add_route("www.example.com").await;

        platform.delete_route("www.example.com").await.unwrap();
        let err = platform.delete_route("www.example.com").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(platform.call_count("delete_route").await, 2);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let platform = MockPlatform::new();
        platform.add_route("a.example.com").await;
        platform
            .fail_next("delete_route", PlatformError::Transient("reset".to_string()))
            .await;

        assert!(platform.delete_route("a.example.com").await.unwrap_err().is_transient());
        platform.delete_route("a.example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_task_exit_writes_log_line() {
        let platform = MockPlatform::new();
        platform.add_application(Application::named("web")).await;
        let spec = TaskSpec {
            name: "migrate".to_string(),
            command: "rake db:migrate".to_string(),
            memory_mb: None,
        };

        let task = platform.run_task("web", &spec).await.unwrap();
        assert_eq!(platform.get_task(&task.guid).await.unwrap().state, TaskState::Running);
        assert!(platform.recent_logs("web").await.unwrap().is_empty());

        assert_eq!(platform.get_task(&task.guid).await.unwrap().state, TaskState::Succeeded);
        let logs = platform.recent_logs("web").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source, "APP/TASK/migrate");
    }

    #[tokio::test]
    async fn test_running_instance_script() {
        let platform = MockPlatform::new();
        platform.add_application(Application::named("web")).await;
        platform.script_running_instances("web", [1, 3]).await;

        let first = platform.get_application("web").await.unwrap().unwrap();
        let second = platform.get_application("web").await.unwrap().unwrap();
        assert_eq!(first.running_instances, 1);
        assert_eq!(second.running_instances, 3);
    }

    #[test]
    fn test_client_provider_counts_clients() {
        let platform = MockPlatform::new();
        let target = SpaceTarget::new("org", "dev");
        platform.client(&target, "c-1").unwrap();
        platform.client(&target, "c-2").unwrap();
        assert_eq!(platform.clients_issued(), 2);
    }
}
