// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Phase of a step between invocations and outcome of a single poll.

use serde::{Deserialize, Serialize};

/// Persisted phase of one action instance.
///
/// ```text
///            ┌──────────────┐
///   start ──►│   EXECUTE    │──────────────┐
///            └──────┬───────┘              │
///                   │ kick-off             │ synchronous
///                   ▼                      ▼
///            ┌──────────────┐       ┌──────────────┐
///       ┌───►│     POLL     │──────►│     DONE     │
///       │    └──────┬───────┘       └──────────────┘
///       └───────────┤ running
///                   │ error
///                   ▼
///            ┌──────────────┐
///            │    RETRY     │──► re-invoked as EXECUTE
///            └──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepPhase {
    /// Nominal entry state.
    #[default]
    Execute,
    /// An asynchronous sub-operation is outstanding.
    Poll,
    /// The previous attempt failed recoverably.
    Retry,
    /// Terminal success.
    Done,
}

impl StepPhase {
    /// Phase a fresh invocation starts from.
    ///
    /// A finished or failed attempt always restarts from `Execute`; an
    /// in-flight `Poll` is resumed.
    pub fn initial(persisted: StepPhase) -> StepPhase {
        match persisted {
            StepPhase::Done | StepPhase::Retry => StepPhase::Execute,
            other => other,
        }
    }

    /// Phases in which before-hooks are considered.
    pub fn is_pre_execute(self) -> bool {
        matches!(self, StepPhase::Execute | StepPhase::Retry)
    }

    /// Phases in which after-hooks are considered.
    pub fn is_post_execute(self) -> bool {
        self == StepPhase::Done
    }

    /// Returns the string representation of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Execute => "EXECUTE",
            StepPhase::Poll => "POLL",
            StepPhase::Retry => "RETRY",
            StepPhase::Done => "DONE",
        }
    }
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

crate::impl_variable_value!(StepPhase => "step-phase");

/// Result of one poll against one sub-operation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncExecutionState {
    /// Still running remotely.
    Running,
    /// Completed, or failed on an optional resource.
    Finished,
    /// Failed on a mandatory resource.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_phase_mapping() {
        assert_eq!(StepPhase::initial(StepPhase::Done), StepPhase::Execute);
        assert_eq!(StepPhase::initial(StepPhase::Retry), StepPhase::Execute);
        assert_eq!(StepPhase::initial(StepPhase::Execute), StepPhase::Execute);
        assert_eq!(StepPhase::initial(StepPhase::Poll), StepPhase::Poll);
    }

    #[test]
    fn test_hook_phase_classification() {
        assert!(StepPhase::Execute.is_pre_execute());
        assert!(StepPhase::Retry.is_pre_execute());
        assert!(!StepPhase::Poll.is_pre_execute());
        assert!(!StepPhase::Poll.is_post_execute());
        assert!(StepPhase::Done.is_post_execute());
    }

    #[test]
    fn test_serialized_form() {
        assert_eq!(serde_json::to_string(&StepPhase::Poll).unwrap(), "\"POLL\"");
        let phase: StepPhase = serde_json::from_str("\"RETRY\"").unwrap();
        assert_eq!(phase, StepPhase::Retry);
        assert_eq!(StepPhase::Done.to_string(), "DONE");
    }
}
