// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory variable store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StoreError, VariableStore};
use crate::variables::{StoredValue, VariableChange};

/// Variable store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVariableStore {
    instances: RwLock<HashMap<String, HashMap<String, StoredValue>>>,
}

impl InMemoryVariableStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed variables of an instance.
    pub async fn seed(&self, instance_id: &str, values: HashMap<String, StoredValue>) {
        self.instances
            .write()
            .await
            .entry(instance_id.to_string())
            .or_default()
            .extend(values);
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn load(&self, instance_id: &str) -> Result<HashMap<String, StoredValue>, StoreError> {
        Ok(self
            .instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, instance_id: &str, changes: &[VariableChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut instances = self.instances.write().await;
        let values = instances.entry(instance_id.to_string()).or_default();
        for change in changes {
            match &change.value {
                Some(value) => {
                    values.insert(change.name.clone(), value.clone());
                }
                None => {
                    values.remove(&change.name);
                }
            }
        }
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), StoreError> {
        self.instances.write().await.remove(instance_id);
        Ok(())
    }
}
