// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed variable store.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{StoreError, VariableRecord, VariableStore};
use crate::variables::{StoredValue, VariableChange};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed variable store.
#[derive(Clone)]
pub struct SqliteVariableStore {
    pool: SqlitePool,
}

impl SqliteVariableStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database file and run the migrations.
    ///
    /// ```ignore
    /// let store = SqliteVariableStore::from_path(".data/deployflow.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to a `sqlite:` URL and run the migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }

    /// Instance ids that have at least one variable.
    pub async fn list_instances(&self) -> Result<Vec<String>, StoreError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT instance_id
            FROM process_variables
            ORDER BY instance_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl VariableStore for SqliteVariableStore {
    async fn load(&self, instance_id: &str) -> Result<HashMap<String, StoredValue>, StoreError> {
        let records = sqlx::query_as::<_, VariableRecord>(
            r#"
            SELECT name, type_tag, value
            FROM process_variables
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(VariableRecord::into_stored).collect()
    }

    async fn commit(&self, instance_id: &str, changes: &[VariableChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in changes {
            match &change.value {
                Some(stored) => {
                    sqlx::query(
                        r#"
                        INSERT INTO process_variables (instance_id, name, type_tag, value, updated_at)
                        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
                        ON CONFLICT (instance_id, name) DO UPDATE SET
                            type_tag = excluded.type_tag,
                            value = excluded.value,
                            updated_at = CURRENT_TIMESTAMP
                        "#,
                    )
                    .bind(instance_id)
                    .bind(&change.name)
                    .bind(&stored.type_tag)
                    .bind(stored.value.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        DELETE FROM process_variables
                        WHERE instance_id = ? AND name = ?
                        "#,
                    )
                    .bind(instance_id)
                    .bind(&change.name)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;

        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM process_variables
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
