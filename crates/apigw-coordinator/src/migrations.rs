// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for apigw-coordinator.
//!
//! The coordinator owns a single table, `periodic_tasks`. Products that
//! manage task definitions themselves can run these migrations from their
//! own startup code.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use apigw_coordinator::migrations;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with all coordinator migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with all coordinator migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Run SQLite migrations.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrators_have_same_versions() {
        let pg: Vec<i64> = POSTGRES.iter().map(|m| m.version).collect();
        let sqlite: Vec<i64> = SQLITE.iter().map(|m| m.version).collect();
        assert!(!pg.is_empty());
        assert_eq!(pg, sqlite);
    }
}
