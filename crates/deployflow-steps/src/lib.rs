// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment actions built on `deployflow-core`.
//!
//! Each action only says *what* to call on the platform; phases, polling,
//! timeouts, retries and hooks come from the engine.
//!
//! | Action | Kind | Notes |
//! |--------|------|-------|
//! | [`DeleteRouteStep`] | sync | absent route counts as deleted |
//! | [`StopApplicationStep`] | sync | before/after-stop hooks |
//! | [`BindServiceStep`] | async | polls the binding job; optional services may fail |
//! | [`DeleteServiceKeyStep`] | async | absent key counts as deleted |
//! | [`ExecuteTaskStep`] | async | waits for the task, then for its logs |
//! | [`RunHookStep`] | async | hook executor for the driver |
//! | [`IncrementalInstancesUpdateStep`] | async | scales one instance at a time |
//! | [`IncrementIndexStep`] | sync | advances the active iteration index |
//!
//! Wrap sync actions in [`SyncAction`](deployflow_core::SyncAction) and
//! async ones in [`AsyncAction`](deployflow_core::AsyncAction) to invoke them.

pub mod applications;
pub mod routes;
pub mod services;
pub mod tasks;
pub mod vars;

pub use applications::{
    DeploymentPhase, IncrementalInstancesUpdateStep, InstancesReadyPolicy, RunningMatchesDesired,
    StopApplicationStep,
};
pub use deployflow_core::cursor::IncrementIndexStep;
pub use routes::DeleteRouteStep;
pub use services::{BindServiceStep, DeleteServiceKeyStep};
pub use tasks::{ExecuteTaskStep, RunHookStep};
