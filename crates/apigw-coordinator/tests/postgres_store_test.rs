// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL periodic task store.
//!
//! These tests need a database and are skipped unless
//! `TEST_APIGW_DATABASE_URL` is set.

mod common;

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use apigw_coordinator::scheduler::{
    PeriodicScheduler, PeriodicTaskDefinition, PeriodicTaskStore, PostgresTaskStore,
    SchedulerConfig,
};
use apigw_coordinator::tasks::builtin_registry;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_APIGW_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_APIGW_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a migrated database pool for testing
async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_APIGW_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    apigw_coordinator::migrations::run_postgres(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

/// Task ids private to this test process.
fn test_ids(count: i64) -> Vec<i64> {
    let base = 1_000_000 + i64::from(std::process::id()) * 100;
    (0..count).map(|i| base + i).collect()
}

async fn cleanup(store: &PostgresTaskStore, ids: &[i64]) {
    for id in ids {
        store.delete(*id).await.expect("Failed to clean up task");
    }
}

#[tokio::test]
async fn test_save_find_delete() {
    skip_if_no_db!();
    let pool = get_test_pool().await.expect("Failed to connect to database");
    let store = PostgresTaskStore::new(pool);
    let ids = test_ids(2);
    cleanup(&store, &ids).await;

    let first = PeriodicTaskDefinition::new(ids[0], "CalcFib", "* * * * *", &[json!(10)]);
    let mut second = PeriodicTaskDefinition::new(ids[1], "CalcFib", "0 * * * *", &[json!(20)]);
    store.save(&first).await.unwrap();
    store.save(&second).await.unwrap();

    let stored: Vec<PeriodicTaskDefinition> = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| ids.contains(&t.id))
        .collect();
    assert_eq!(stored, vec![first.clone(), second.clone()]);
    assert_eq!(stored[0].decode_args().unwrap(), vec![json!(10)]);

    // Saving again updates in place
    second.enabled = false;
    second.cron = "30 * * * *".to_string();
    store.save(&second).await.unwrap();
    let updated = store
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == ids[1])
        .expect("task missing after update");
    assert_eq!(updated, second);

    assert!(store.delete(ids[0]).await.unwrap());
    assert!(!store.delete(ids[0]).await.unwrap());
    assert!(
        !store
            .find_all()
            .await
            .unwrap()
            .iter()
            .any(|t| t.id == ids[0])
    );

    cleanup(&store, &ids).await;
}

#[tokio::test]
async fn test_scheduler_reconciles_from_postgres() {
    skip_if_no_db!();
    let pool = get_test_pool().await.expect("Failed to connect to database");
    let store = Arc::new(PostgresTaskStore::new(pool));
    let ids = test_ids(3);
    let id = ids[2];
    cleanup(&store, &[id]).await;

    let scheduler = PeriodicScheduler::new(
        store.clone(),
        Arc::new(builtin_registry()),
        SchedulerConfig {
            leader_only: false,
            ..Default::default()
        },
    );

    let mut task = PeriodicTaskDefinition::new(id, "CalcFib", "* * * * *", &[json!(10)]);
    store.save(&task).await.unwrap();
    scheduler.load_tasks().await.unwrap();
    assert!(scheduler.is_registered(id));

    task.enabled = false;
    store.save(&task).await.unwrap();
    scheduler.load_tasks().await.unwrap();
    assert!(!scheduler.is_registered(id));

    cleanup(&store, &[id]).await;
}
