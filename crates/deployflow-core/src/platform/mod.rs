// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote platform client interface.
//!
//! Steps never talk to the platform directly; they ask the
//! [`ProcessContext`](crate::context::ProcessContext) for a client, which is
//! obtained from a [`ClientProvider`] for the space being deployed to. A
//! client may carry per-request authentication and is never kept past the
//! invocation that acquired it.

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use mock::MockPlatform;

/// Kind of a remote resource, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An application.
    Application,
    /// A route.
    Route,
    /// A service instance.
    ServiceInstance,
    /// A service binding.
    ServiceBinding,
    /// A service key.
    ServiceKey,
    /// A task run on an application.
    Task,
    /// An asynchronous platform job.
    Job,
}

impl ResourceKind {
    /// Returns the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Application => "application",
            ResourceKind::Route => "route",
            ResourceKind::ServiceInstance => "service instance",
            ResourceKind::ServiceBinding => "service binding",
            ResourceKind::ServiceKey => "service key",
            ResourceKind::Task => "task",
            ResourceKind::Job => "job",
        }
    }
}

/// Errors returned by the platform.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    /// The addressed resource does not exist.
    #[error("{} '{name}' not found", kind.as_str())]
    NotFound {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name or id.
        name: String,
    },

    /// Communication with the platform failed; the request may succeed later.
    #[error("communication with the platform failed: {0}")]
    Transient(String),

    /// A service broker rejected the operation.
    #[error("service broker error for '{service}': {message}")]
    Broker {
        /// Service instance name.
        service: String,
        /// Broker message.
        message: String,
    },

    /// The platform API returned an error status.
    #[error("platform responded with {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    /// Whether the error reports an absent resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. } | PlatformError::Api { status: 404, .. })
    }

    /// Whether the error is a communication failure worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Transient(_) => true,
            PlatformError::Api { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// Result type for platform calls.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Organization and space a client is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpaceTarget {
    /// Organization name.
    pub org: String,
    /// Space name.
    pub space: String,
}

impl SpaceTarget {
    /// Creates a new target.
    pub fn new(org: impl Into<String>, space: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            space: space.into(),
        }
    }
}

/// Application as seen by the deployer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Application name.
    pub name: String,
    /// Descriptor module the application was built from, if known.
    #[serde(default)]
    pub module_name: Option<String>,
    /// Desired number of instances.
    #[serde(default)]
    pub instances: u32,
    /// Instances currently running.
    #[serde(default)]
    pub running_instances: u32,
    /// Whether the application is started.
    #[serde(default)]
    pub started: bool,
}

impl Application {
    /// Application with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_name: None,
            instances: 1,
            running_instances: 0,
            started: false,
        }
    }

    /// Sets the module name.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module_name = Some(module.into());
        self
    }
}

/// Service instance to bind or inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Service instance name.
    pub name: String,
    /// Optional services never fail a deployment.
    #[serde(default)]
    pub optional: bool,
}

/// Service key of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Key name.
    pub name: String,
    /// Owning service instance.
    pub service_name: String,
}

/// Definition of a task to run on an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task name.
    pub name: String,
    /// Command to run.
    pub command: String,
    /// Memory limit in megabytes.
    #[serde(default)]
    pub memory_mb: Option<u32>,
}

/// State of a task on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted, not yet running.
    Pending,
    /// Running.
    Running,
    /// Being cancelled.
    Canceling,
    /// Exited successfully.
    Succeeded,
    /// Exited with an error or was cancelled.
    Failed,
}

/// Task started on an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Platform identifier.
    pub guid: String,
    /// Task name.
    pub name: String,
    /// Current state.
    pub state: TaskState,
    /// Failure reason for failed tasks.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Log line emitted by an application or one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationLog {
    /// Source of the line, e.g. `APP/TASK/migrate`.
    pub source: String,
    /// Log message.
    pub message: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

/// Remote state of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted and being processed by the platform.
    Processing,
    /// Waiting for a downstream system (e.g. a service broker).
    Polling,
    /// Completed successfully.
    Complete,
    /// Failed.
    Failed,
}

/// Error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorDetail {
    /// Platform error code.
    pub code: u32,
    /// Short title.
    pub title: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Snapshot of an asynchronous platform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncJob {
    /// Job identifier.
    pub id: String,
    /// Operation the job performs, e.g. `service_bindings.create`.
    pub operation: String,
    /// Current state.
    pub state: JobState,
    /// Warnings reported so far.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Errors reported by a failed job.
    #[serde(default)]
    pub errors: Vec<JobErrorDetail>,
}

impl AsyncJob {
    /// Errors joined into one line.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{} ({}): {}", e.title, e.code, e.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

crate::impl_variable_value!(
    Application => "application",
    ServiceInstance => "service-instance",
    ServiceKey => "service-key",
    TaskSpec => "task-spec",
    Task => "task",
);

/// Client facade for the remote platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch an application; `None` if it does not exist.
    async fn get_application(&self, name: &str) -> PlatformResult<Option<Application>>;

    /// Start an application.
    async fn start_application(&self, name: &str) -> PlatformResult<()>;

    /// Stop an application.
    async fn stop_application(&self, name: &str) -> PlatformResult<()>;

    /// Change the desired instance count of an application.
    async fn scale_application(&self, name: &str, instances: u32) -> PlatformResult<()>;

    /// Delete a route given as `host.domain/path`.
    async fn delete_route(&self, route: &str) -> PlatformResult<()>;

    /// Bind a service instance to an application.
    ///
    /// Returns the job id when the broker binds asynchronously.
    async fn bind_service(&self, app: &str, service: &str) -> PlatformResult<Option<String>>;

    /// Create a service key. Returns the job id for asynchronous creation.
    async fn create_service_key(&self, key: &ServiceKey) -> PlatformResult<Option<String>>;

    /// Delete a service key. Returns the job id for asynchronous deletion.
    async fn delete_service_key(&self, key: &ServiceKey) -> PlatformResult<Option<String>>;

    /// Run a task on an application.
    async fn run_task(&self, app: &str, task: &TaskSpec) -> PlatformResult<Task>;

    /// Fetch a task by guid.
    async fn get_task(&self, guid: &str) -> PlatformResult<Task>;

    /// Recent log lines of an application, oldest first.
    async fn recent_logs(&self, app: &str) -> PlatformResult<Vec<ApplicationLog>>;

    /// Fetch an asynchronous job by id.
    async fn get_job(&self, id: &str) -> PlatformResult<AsyncJob>;
}

/// Hands out clients scoped to a space.
pub trait ClientProvider: Send + Sync {
    /// Acquire a client for `target`, tagging its requests with `correlation_id`.
    fn client(
        &self,
        target: &SpaceTarget,
        correlation_id: &str,
    ) -> PlatformResult<Arc<dyn PlatformClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = PlatformError::NotFound {
            kind: ResourceKind::Route,
            name: "www.example.com".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());
        assert_eq!(not_found.to_string(), "route 'www.example.com' not found");

        assert!(
            PlatformError::Api {
                status: 404,
                message: "gone".to_string()
            }
            .is_not_found()
        );
        assert!(PlatformError::Transient("reset".to_string()).is_transient());
        assert!(
            PlatformError::Api {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !PlatformError::Api {
                status: 500,
                message: "boom".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_job_error_summary() {
        let job = AsyncJob {
            id: "job-1".to_string(),
            operation: "service_bindings.create".to_string(),
            state: JobState::Failed,
            warnings: vec![],
            errors: vec![
                JobErrorDetail {
                    code: 10001,
                    title: "CF-ServiceBrokerError".to_string(),
                    detail: "quota exceeded".to_string(),
                },
                JobErrorDetail {
                    code: 10002,
                    title: "CF-Timeout".to_string(),
                    detail: "broker timed out".to_string(),
                },
            ],
        };
        assert_eq!(
            job.error_summary(),
            "CF-ServiceBrokerError (10001): quota exceeded; CF-Timeout (10002): broker timed out"
        );
    }

    #[test]
    fn test_job_state_wire_format() {
        let state: JobState = serde_json::from_str("\"POLLING\"").unwrap();
        assert_eq!(state, JobState::Polling);
    }
}
