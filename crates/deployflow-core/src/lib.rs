// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployflow Core - Step-Execution Engine
//!
//! This crate executes the individual actions of a cloud deployment (bind a
//! service, stop an application, run a task, ...) so that each one can take
//! an unbounded amount of time on the remote platform, survive restarts of
//! the deployer, and resume safely from wherever it stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            StepDriver                                 │
//! │        load variables ─► invoke step ─► commit ─► wait / retry         │
//! └──────────────────────────────────────────────────────────────────────┘
//!                 │                                         │
//!                 ▼                                         ▼
//! ┌───────────────────────────────┐        ┌─────────────────────────────┐
//! │  Hook mechanism               │        │  VariableStore              │
//! │  before/after hooks per phase │        │  in-memory │ SQLite          │
//! └───────────────────────────────┘        └─────────────────────────────┘
//!                 │
//!                 ▼
//! ┌───────────────────────────────┐        ┌─────────────────────────────┐
//! │  SyncAction │ AsyncAction     │───────►│  AsyncExecution sequence    │
//! │  phase state machine          │        │  PollJobExecution, ...      │
//! │  timeout guard                │        └─────────────────────────────┘
//! └───────────────────────────────┘                       │
//!                                                          ▼
//!                                          ┌─────────────────────────────┐
//!                                          │  PlatformClient             │
//!                                          └─────────────────────────────┘
//! ```
//!
//! # Phases
//!
//! | Phase | Meaning |
//! |-------|---------|
//! | `EXECUTE` | Nominal entry; the action kicks off its remote work |
//! | `POLL` | An asynchronous sub-operation is outstanding, invoke again later |
//! | `RETRY` | The attempt failed recoverably; the next invocation starts over |
//! | `DONE` | Terminal success; the action is never invoked again |
//!
//! Each invocation of an asynchronous action polls exactly one
//! [`AsyncExecution`](async_step::AsyncExecution). The position in the
//! sequence and the start time used by the timeout guard are persisted as
//! context variables, so a new process can pick up an action mid-poll.
//!
//! # Error Handling
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | "not found" on a delete-style operation | success |
//! | failure of an optional resource | warning, execution finished |
//! | communication failure while polling | `RETRY`, the stored phase stays `POLL` |
//! | time budget exceeded | fatal [`StepError::Timeout`](error::StepError::Timeout) |
//! | anything else | fatal [`StepError::Fatal`](error::StepError::Fatal) |
//!
//! # Configuration
//!
//! [`EngineConfig::from_env`](config::EngineConfig::from_env) reads the
//! `DEPLOYFLOW_*` environment variables (poll interval, retry budget,
//! default timeout and database URL).

#![deny(missing_docs)]

/// Async actions and the poll dispatch.
pub mod async_step;
/// Wall-clock abstraction.
pub mod clock;
/// Configuration loading.
pub mod config;
/// Per-invocation process context and step logger.
pub mod context;
/// Iteration cursor and the index advancing step.
pub mod cursor;
/// Deployment descriptor model.
pub mod descriptor;
/// Reference driver.
pub mod driver;
/// Error types.
pub mod error;
/// Before/after hook mechanism.
pub mod hooks;
/// Step phases.
pub mod phase;
/// Variable stores.
pub mod persistence;
/// Remote platform client interface and mock.
pub mod platform;
/// Generic async job polling.
pub mod polling;
/// Error classification.
pub mod recovery;
/// Retry backoff.
pub mod retry;
/// Step contracts and the invocation entry point.
pub mod step;
/// Timeout guard.
pub mod timeout;
/// Typed context variables.
pub mod variables;
/// Well-known context variables.
pub mod vars;

pub use async_step::{AsyncAction, AsyncExecution, AsyncStep};
pub use context::ProcessContext;
pub use driver::{DriverConfig, StepDriver, StepReport};
pub use error::{Result, StepError};
pub use phase::{AsyncExecutionState, StepPhase};
pub use step::{Action, Step, SyncAction, SyncStep};
