// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Context variables read and written by the deployment actions.

use deployflow_core::platform::{ServiceInstance, ServiceKey, Task, TaskSpec};
use deployflow_core::variables::Variable;

use crate::applications::DeploymentPhase;

/// Route removed by [`DeleteRouteStep`](crate::DeleteRouteStep).
pub static ROUTE_TO_DELETE: Variable<String> = Variable::new("routeToDelete");

/// Which half of a blue-green deployment is running.
pub static DEPLOYMENT_PHASE: Variable<DeploymentPhase> =
    Variable::with_default("deploymentPhase", DeploymentPhase::default);

/// Service instance bound to `appToProcess`.
pub static SERVICE_TO_BIND: Variable<ServiceInstance> = Variable::new("serviceToBind");

/// Job id of the pending service binding.
pub static SERVICE_BINDING_JOB_ID: Variable<String> = Variable::new("serviceBindingJobId");

/// Service key removed by [`DeleteServiceKeyStep`](crate::DeleteServiceKeyStep).
pub static SERVICE_KEY_TO_DELETE: Variable<ServiceKey> = Variable::new("serviceKeyToDelete");

/// Job id of the pending service key deletion.
pub static SERVICE_KEY_JOB_ID: Variable<String> = Variable::new("serviceKeyJobId");

/// Task run on `appToProcess`.
pub static TASK_TO_EXECUTE: Variable<TaskSpec> = Variable::new("taskToExecute");

/// Task as returned when it was started.
pub static STARTED_TASK: Variable<Task> = Variable::new("startedTask");

/// Budget of a task execution, in seconds.
pub static TASK_EXECUTION_TIMEOUT: Variable<u64> = Variable::new("taskExecutionTimeout");

/// Epoch milliseconds of the last "task still running" message.
pub static LAST_TASK_POLL_LOG_TIMESTAMP: Variable<i64> = Variable::new("lastTaskPollLogTimestamp");

/// Budget of an application start or scale-up, in seconds.
pub static START_TIMEOUT: Variable<u64> = Variable::new("startTimeout");

/// Instance count of the application before the incremental update.
pub static PREVIOUS_INSTANCE_COUNT: Variable<u32> = Variable::new("previousInstanceCount");

/// Instance count the incremental update is currently waiting for.
pub static INSTANCE_UPDATE_TARGET: Variable<u32> = Variable::new("instanceUpdateTarget");
