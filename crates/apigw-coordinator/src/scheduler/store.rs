// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage of periodic task definitions.
//!
//! The scheduler only reads definitions ([`PeriodicTaskStore::find_all`]);
//! `save` and `delete` serve the management layer and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool, SqlitePool};

use crate::error::{Error, Result};

/// A persisted periodic task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PeriodicTaskDefinition {
    /// Task identifier
    pub id: i64,
    /// Registered task name to dispatch
    pub name: String,
    /// Cron expression
    pub cron: String,
    /// Positional arguments as a JSON array
    pub args: String,
    /// Whether the task should be scheduled
    pub enabled: bool,
}

impl PeriodicTaskDefinition {
    /// Build an enabled definition with JSON-encoded `args`.
    pub fn new(id: i64, name: &str, cron: &str, args: &[Value]) -> Self {
        Self {
            id,
            name: name.to_string(),
            cron: cron.to_string(),
            args: Value::Array(args.to_vec()).to_string(),
            enabled: true,
        }
    }

    /// Decode the stored argument list.
    pub fn decode_args(&self) -> std::result::Result<Vec<Value>, serde_json::Error> {
        serde_json::from_str(&self.args)
    }
}

/// Source of periodic task definitions.
#[async_trait]
pub trait PeriodicTaskStore: Send + Sync {
    /// All definitions, enabled or not, ordered by id.
    async fn find_all(&self) -> Result<Vec<PeriodicTaskDefinition>>;

    /// Insert or replace a definition.
    async fn save(&self, task: &PeriodicTaskDefinition) -> Result<()>;

    /// Delete a definition. Returns false if it did not exist.
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeriodicTaskStore for PostgresTaskStore {
    async fn find_all(&self) -> Result<Vec<PeriodicTaskDefinition>> {
        let rows = sqlx::query_as::<_, PeriodicTaskDefinition>(
            r#"
            SELECT id, name, cron, args, enabled
            FROM periodic_tasks
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn save(&self, task: &PeriodicTaskDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO periodic_tasks (id, name, cron, args, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                cron = EXCLUDED.cron,
                args = EXCLUDED.args,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.cron)
        .bind(&task.args)
        .bind(task.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM periodic_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeriodicTaskStore for SqliteTaskStore {
    async fn find_all(&self) -> Result<Vec<PeriodicTaskDefinition>> {
        let rows = sqlx::query_as::<_, PeriodicTaskDefinition>(
            r#"
            SELECT id, name, cron, args, enabled
            FROM periodic_tasks
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn save(&self, task: &PeriodicTaskDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO periodic_tasks (id, name, cron, args, enabled)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE
            SET name = excluded.name,
                cron = excluded.cron,
                args = excluded.args,
                enabled = excluded.enabled,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.cron)
        .bind(&task.args)
        .bind(task.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM periodic_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Process-local store for tests and single-node setups.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<BTreeMap<i64, PeriodicTaskDefinition>>,
    failing_reads: AtomicUsize,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `find_all` fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeriodicTaskStore for InMemoryTaskStore {
    async fn find_all(&self) -> Result<Vec<PeriodicTaskDefinition>> {
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Other("injected storage failure".to_string()));
        }

        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.values().cloned().collect())
    }

    async fn save(&self, task: &PeriodicTaskDefinition) -> Result<()> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn sqlite_store() -> SqliteTaskStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrations::run_sqlite(&pool).await.unwrap();
        SqliteTaskStore::new(pool)
    }

    #[test]
    fn test_definition_args_encoding() {
        let task = PeriodicTaskDefinition::new(1, "CalcFib", "* * * * *", &[json!(10)]);
        assert_eq!(task.args, "[10]");
        assert_eq!(task.decode_args().unwrap(), vec![json!(10)]);
    }

    #[tokio::test]
    async fn test_sqlite_save_find_delete() {
        let store = sqlite_store().await;
        let mut task = PeriodicTaskDefinition::new(1, "CalcFib", "* * * * *", &[json!(10)]);
        store.save(&task).await.unwrap();

        task.enabled = false;
        task.cron = "*/10 * * * *".to_string();
        store.save(&task).await.unwrap();
        store
            .save(&PeriodicTaskDefinition::new(2, "Other", "0 * * * *", &[]))
            .await
            .unwrap();

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], task);
        assert_eq!(all[1].args, "[]");

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_injected_failure() {
        let store = InMemoryTaskStore::new();
        store.fail_next_reads(1);
        assert!(store.find_all().await.is_err());
        assert!(store.find_all().await.unwrap().is_empty());
    }
}
