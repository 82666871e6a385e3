// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-invocation process context.
//!
//! A [`ProcessContext`] is built by the driver for exactly one invocation of
//! one step. It owns the variable scope of the action instance, knows how to
//! acquire a platform client for the target space, and carries the step
//! logger. Nothing obtained from it may outlive the invocation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::platform::{ClientProvider, PlatformClient, SpaceTarget};
use crate::variables::{Variable, VariableError, VariableScope, VariableValue};
use crate::vars;

/// Severity of a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Informational progress.
    Info,
    /// Something failed without stopping the deployment.
    Warning,
    /// The step failed.
    Error,
}

/// User-visible progress message recorded by a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressMessage {
    /// Severity.
    pub kind: MessageKind,
    /// Step that produced the message.
    pub step: String,
    /// Message text.
    pub text: String,
    /// Time the message was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Logger handed to steps.
///
/// Every message is emitted as a tracing event and, except for debug output,
/// recorded as a [`ProgressMessage`], stamped with the context's clock.
#[derive(Clone)]
pub struct StepLogger {
    instance_id: String,
    step: String,
    clock: Arc<dyn Clock>,
    messages: Arc<Mutex<Vec<ProgressMessage>>>,
}

impl std::fmt::Debug for StepLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLogger")
            .field("instance_id", &self.instance_id)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl StepLogger {
    fn new(instance_id: &str, step: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            step: step.to_string(),
            clock,
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, kind: MessageKind, text: String) {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.push(ProgressMessage {
            kind,
            step: self.step.clone(),
            text,
            timestamp: self.clock.now(),
        });
    }

    /// Diagnostic output, not shown to users.
    pub fn debug(&self, text: impl AsRef<str>) {
        debug!(instance_id = %self.instance_id, step = %self.step, "{}", text.as_ref());
    }

    /// Progress information.
    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!(instance_id = %self.instance_id, step = %self.step, "{}", text);
        self.record(MessageKind::Info, text);
    }

    /// A failure that does not stop the deployment.
    pub fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(instance_id = %self.instance_id, step = %self.step, "{}", text);
        self.record(MessageKind::Warning, text);
    }

    /// A failure of the step.
    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        error!(instance_id = %self.instance_id, step = %self.step, "{}", text);
        self.record(MessageKind::Error, text);
    }

    /// Messages recorded so far.
    pub fn messages(&self) -> Vec<ProgressMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// State passed through one step invocation.
pub struct ProcessContext {
    instance_id: String,
    step_name: String,
    variables: VariableScope,
    clients: Arc<dyn ClientProvider>,
    clock: Arc<dyn Clock>,
    logger: StepLogger,
    keep_phase: bool,
}

impl ProcessContext {
    /// Context for one invocation of `step_name` on `instance_id`.
    pub fn new(
        instance_id: impl Into<String>,
        step_name: impl Into<String>,
        variables: VariableScope,
        clients: Arc<dyn ClientProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let instance_id = instance_id.into();
        let step_name = step_name.into();
        let logger = StepLogger::new(&instance_id, &step_name, clock.clone());
        Self {
            instance_id,
            step_name,
            variables,
            clients,
            clock,
            logger,
            keep_phase: false,
        }
    }

    /// Action instance this context belongs to.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Name of the step being invoked.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Read a variable, falling back to its default.
    pub fn get<T: VariableValue>(&self, var: &Variable<T>) -> std::result::Result<Option<T>, VariableError> {
        self.variables.get(var)
    }

    /// Read a variable that must be set.
    pub fn require<T: VariableValue>(&self, var: &Variable<T>) -> std::result::Result<T, VariableError> {
        self.variables.require(var)
    }

    /// Write a variable.
    pub fn set<T: VariableValue>(&mut self, var: &Variable<T>, value: T) -> std::result::Result<(), VariableError> {
        self.variables.set(var, value)
    }

    /// Remove a variable.
    pub fn remove<T: VariableValue>(&mut self, var: &Variable<T>) {
        self.variables.remove(var)
    }

    /// Variable scope of the invocation.
    pub fn variables(&self) -> &VariableScope {
        &self.variables
    }

    /// Mutable variable scope of the invocation.
    pub fn variables_mut(&mut self) -> &mut VariableScope {
        &mut self.variables
    }

    /// Leave the persisted phase as it was loaded, whatever the invocation reports.
    pub fn keep_persisted_phase(&mut self) {
        self.keep_phase = true;
    }

    /// Whether [`keep_persisted_phase`](Self::keep_persisted_phase) was requested.
    pub fn keeps_persisted_phase(&self) -> bool {
        self.keep_phase
    }

    pub(crate) fn take_keep_persisted_phase(&mut self) -> bool {
        std::mem::take(&mut self.keep_phase)
    }

    /// Give the scope back to the driver.
    pub fn into_variables(self) -> VariableScope {
        self.variables
    }

    /// Acquire a platform client for the target space.
    ///
    /// A new client is requested on every call; callers keep it only for the
    /// duration of the current invocation.
    pub fn client(&self) -> Result<Arc<dyn PlatformClient>> {
        let target = SpaceTarget::new(
            self.variables.require(&vars::ORG)?,
            self.variables.require(&vars::SPACE)?,
        );
        let correlation_id = self
            .variables
            .get(&vars::CORRELATION_ID)?
            .unwrap_or_else(|| self.instance_id.clone());
        Ok(self.clients.client(&target, &correlation_id)?)
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Step logger.
    pub fn logger(&self) -> &StepLogger {
        &self.logger
    }
}
