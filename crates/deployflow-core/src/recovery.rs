// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error classification shared by step bodies and async executions.
//!
//! A failure is checked against, in order:
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | platform "not found" on a delete-style operation | [`Recovery::Absent`], treated as success |
//! | platform failure on an optional resource | [`Recovery::Optional`], logged as warning |
//! | communication failure while polling | [`Recovery::Transient`], step returns RETRY and stays in POLL |
//! | anything else | fatal [`StepError::Fatal`] |
//!
//! Timeouts, cancellations and other engine errors are never downgraded.

use crate::context::ProcessContext;
use crate::error::{Result, StepError};
use crate::phase::StepPhase;

/// How failures of an operation may be downgraded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// "Not found" means the work is already done (delete/detach operations).
    pub absent_is_success: bool,
    /// The affected resource must not fail the deployment.
    pub optional: bool,
}

impl ErrorPolicy {
    /// Every failure is fatal.
    pub const STRICT: ErrorPolicy = ErrorPolicy {
        absent_is_success: false,
        optional: false,
    };

    /// Policy for delete-style operations.
    pub const fn delete_style() -> Self {
        ErrorPolicy {
            absent_is_success: true,
            optional: false,
        }
    }

    /// Sets the optional flag.
    pub const fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// Non-fatal outcome of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The resource is already gone.
    Absent,
    /// The resource is optional; the failure was logged as a warning.
    Optional,
    /// Communication failed while polling; try again later.
    Transient,
}

/// Classify `error` without side effects. `None` means fatal.
pub fn classify(error: &StepError, policy: ErrorPolicy, phase: StepPhase) -> Option<Recovery> {
    let StepError::Platform(platform) = error else {
        return None;
    };
    if policy.absent_is_success && platform.is_not_found() {
        return Some(Recovery::Absent);
    }
    if policy.optional {
        return Some(Recovery::Optional);
    }
    if phase == StepPhase::Poll && platform.is_transient() {
        return Some(Recovery::Transient);
    }
    None
}

/// Log and classify a failure.
///
/// `message` is the action-specific error message, `description` an optional
/// tail appended to fatal messages. Transient failures roll back the
/// invocation's variable changes and keep the persisted phase, so the
/// context is left as it was loaded and the next invocation polls again.
pub fn handle_error(
    ctx: &mut ProcessContext,
    error: StepError,
    policy: ErrorPolicy,
    phase: StepPhase,
    message: &str,
    description: Option<&str>,
) -> Result<Recovery> {
    let Some(recovery) = classify(&error, policy, phase) else {
        return Err(match error {
            StepError::Platform(_) | StepError::Variable(_) => {
                let mut text = format!("{message}: {error}");
                if let Some(description) = description {
                    text.push(' ');
                    text.push_str(description);
                }
                StepError::fatal(ctx.step_name(), text)
            }
            other => other,
        });
    };

    match recovery {
        Recovery::Absent => {
            ctx.logger().info(format!("{message}: {error}; nothing left to do"));
        }
        Recovery::Optional => {
            ctx.logger()
                .warn(format!("{message}: {error}; the resource is optional, continuing"));
        }
        Recovery::Transient => {
            ctx.variables_mut().rollback();
            ctx.keep_persisted_phase();
            ctx.logger().warn(format!("{message}: {error}; will retry"));
        }
    }
    Ok(recovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::platform::{MockPlatform, PlatformError, ResourceKind};
    use crate::variables::{Variable, VariableScope};
    use std::sync::Arc;
    use std::time::Duration;

    fn not_found() -> StepError {
        PlatformError::NotFound {
            kind: ResourceKind::ServiceKey,
            name: "key".to_string(),
        }
        .into()
    }

    fn transient() -> StepError {
        PlatformError::Transient("connection reset".to_string()).into()
    }

    fn context() -> ProcessContext {
        ProcessContext::new(
            "instance-1",
            "delete-service-key",
            VariableScope::new(),
            Arc::new(MockPlatform::new()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_classification_order() {
        let delete = ErrorPolicy::delete_style();
        assert_eq!(classify(&not_found(), delete, StepPhase::Execute), Some(Recovery::Absent));
        assert_eq!(classify(&not_found(), ErrorPolicy::STRICT, StepPhase::Execute), None);

        let optional = ErrorPolicy::STRICT.with_optional(true);
        assert_eq!(classify(&not_found(), optional, StepPhase::Poll), Some(Recovery::Optional));
        assert_eq!(classify(&transient(), optional, StepPhase::Poll), Some(Recovery::Optional));

        assert_eq!(classify(&transient(), ErrorPolicy::STRICT, StepPhase::Poll), Some(Recovery::Transient));
        assert_eq!(classify(&transient(), ErrorPolicy::STRICT, StepPhase::Execute), None);
    }

    #[test]
    fn test_engine_errors_are_never_downgraded() {
        let timeout = StepError::Timeout {
            step: "s".to_string(),
            resource: "r".to_string(),
            timeout: Duration::from_secs(1),
            elapsed: Duration::from_secs(2),
        };
        let lenient = ErrorPolicy::delete_style().with_optional(true);
        assert_eq!(classify(&timeout, lenient, StepPhase::Poll), None);
    }

    #[test]
    fn test_fatal_message_format() {
        let mut ctx = context();
        let err = handle_error(
            &mut ctx,
            PlatformError::Other("quota exceeded".to_string()).into(),
            ErrorPolicy::STRICT,
            StepPhase::Execute,
            "Error deleting service key",
            Some("Check the service broker."),
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "delete-service-key: Error deleting service key: quota exceeded Check the service broker."
        );
        assert!(matches!(err, StepError::Fatal { ref step, .. } if step == "delete-service-key"));
    }

    #[test]
    fn test_timeout_passes_through_unchanged() {
        let mut ctx = context();
        let err = handle_error(
            &mut ctx,
            StepError::Timeout {
                step: "s".to_string(),
                resource: "r".to_string(),
                timeout: Duration::from_secs(1),
                elapsed: Duration::from_secs(2),
            },
            ErrorPolicy::STRICT,
            StepPhase::Poll,
            "Error",
            None,
        )
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_transient_rolls_back_changes() {
        let mut ctx = context();
        let marker: Variable<String> = Variable::dynamic("marker");
        ctx.set(&marker, "written".to_string()).unwrap();

        let recovery = handle_error(
            &mut ctx,
            transient(),
            ErrorPolicy::STRICT,
            StepPhase::Poll,
            "Error polling job",
            None,
        )
        .unwrap();

        assert_eq!(recovery, Recovery::Transient);
        assert_eq!(ctx.get(&marker).unwrap(), None);
        assert!(ctx.keeps_persisted_phase());
    }

    #[test]
    fn test_optional_failure_logs_warning() {
        let mut ctx = context();
        let recovery = handle_error(
            &mut ctx,
            not_found(),
            ErrorPolicy::STRICT.with_optional(true),
            StepPhase::Poll,
            "Error binding service",
            None,
        )
        .unwrap();

        assert_eq!(recovery, Recovery::Optional);
        let messages = ctx.logger().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, crate::context::MessageKind::Warning);
    }
}
