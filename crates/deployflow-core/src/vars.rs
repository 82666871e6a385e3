// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Context variables known to the engine.
//!
//! Actions declare their own handles the same way, next to the action.

use std::collections::BTreeMap;

use crate::descriptor::{DeploymentDescriptor, Hook, Module};
use crate::phase::StepPhase;
use crate::platform::Application;
use crate::variables::Variable;

/// Persisted phase of the current action.
pub static STEP_PHASE: Variable<StepPhase> = Variable::with_default("stepPhase", StepPhase::default);

/// Position in the action's sequence of async executions.
pub static ASYNC_STEP_EXECUTION_INDEX: Variable<u32> =
    Variable::with_default("asyncStepExecutionIndex", || 0);

/// Epoch milliseconds at which the action last entered EXECUTE.
pub static START_TIME: Variable<i64> = Variable::new("startTime");

/// Name of the index variable advanced by the iteration cursor.
pub static INDEX_VARIABLE_NAME: Variable<String> = Variable::new("indexVariableName");

/// Correlation id attached to platform requests and log events.
pub static CORRELATION_ID: Variable<String> = Variable::new("correlationId");

/// Organization being deployed to.
pub static ORG: Variable<String> = Variable::new("org");

/// Space being deployed to.
pub static SPACE: Variable<String> = Variable::new("space");

/// Module currently being deployed.
pub static MODULE_TO_DEPLOY: Variable<Module> = Variable::new("moduleToDeploy");

/// Descriptor of the whole deployment.
pub static COMPLETE_DEPLOYMENT_DESCRIPTOR: Variable<DeploymentDescriptor> =
    Variable::new("completeDeploymentDescriptor");

/// Application the current action operates on.
pub static APP_TO_PROCESS: Variable<Application> = Variable::new("appToProcess");

/// Hooks the driver must run before re-invoking (or after finishing) the action.
pub static HOOKS_FOR_EXECUTION: Variable<Vec<Hook>> =
    Variable::with_default("hooksForExecution", Vec::new);

/// Hook being run by the hook executor step.
pub static HOOK_FOR_EXECUTION: Variable<Hook> = Variable::new("hookForExecution");

/// Prefix of the per-module executed-hooks bookkeeping variable.
pub const EXECUTED_HOOKS_FOR_PREFIX: &str = "executedHooksFor";

/// Hooks already run for `module`: hook name to phase tags.
pub fn executed_hooks_for(module: &str) -> Variable<BTreeMap<String, Vec<String>>> {
    Variable::dynamic(format!("{EXECUTED_HOOKS_FOR_PREFIX}{module}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{VariableError, VariableScope};

    #[test]
    fn test_defaults() {
        let scope = VariableScope::new();
        assert_eq!(scope.require(&STEP_PHASE).unwrap(), StepPhase::Execute);
        assert_eq!(scope.require(&ASYNC_STEP_EXECUTION_INDEX).unwrap(), 0);
        assert!(scope.require(&HOOKS_FOR_EXECUTION).unwrap().is_empty());
        assert_eq!(scope.get(&START_TIME).unwrap(), None);
    }

    #[test]
    fn test_target_space_has_no_default() {
        let scope = VariableScope::new();
        assert!(matches!(scope.require(&ORG), Err(VariableError::Missing { .. })));
        assert!(matches!(scope.require(&SPACE), Err(VariableError::Missing { .. })));
    }

    #[test]
    fn test_executed_hooks_name() {
        assert_eq!(executed_hooks_for("web").name(), "executedHooksForweb");
    }
}
