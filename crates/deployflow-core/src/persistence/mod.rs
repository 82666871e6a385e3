// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable storage of context variables between invocations.
//!
//! The driver loads the variables of an action instance before each
//! invocation and commits the changes of the invocation afterwards.
//! Implementations must return exactly what was committed, without coercion.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::variables::{StoredValue, VariableChange};

pub use memory::InMemoryVariableStore;
pub use sqlite::SqliteVariableStore;

/// Persisted variable row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VariableRecord {
    /// Variable name.
    pub name: String,
    /// Type tag of the value.
    pub type_tag: String,
    /// JSON-encoded value.
    pub value: String,
}

impl VariableRecord {
    /// Decode the JSON payload.
    pub fn into_stored(self) -> Result<(String, StoredValue), StoreError> {
        let value = serde_json::from_str(&self.value).map_err(|e| StoreError::Corrupted {
            name: self.name.clone(),
            details: e.to_string(),
        })?;
        Ok((
            self.name,
            StoredValue {
                type_tag: self.type_tag,
                value,
            },
        ))
    }
}

/// Variable store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database operation '{operation}' failed: {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A stored value could not be decoded.
    #[error("stored value of '{name}' is corrupted: {details}")]
    Corrupted {
        /// Variable name.
        name: String,
        /// Decoder message.
        details: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

/// Storage for the variables of action instances.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// All variables of an instance; empty for unknown instances.
    async fn load(&self, instance_id: &str) -> Result<HashMap<String, StoredValue>, StoreError>;

    /// Apply the changes of one invocation atomically.
    async fn commit(&self, instance_id: &str, changes: &[VariableChange]) -> Result<(), StoreError>;

    /// Forget every variable of an instance.
    async fn delete_instance(&self, instance_id: &str) -> Result<(), StoreError>;
}
