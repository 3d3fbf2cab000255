// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! APIGW Coordinator - control-plane coordination for gateway replicas
//!
//! A background service responsible for:
//! - Leader election among API-server replicas
//! - Periodic task scheduling from stored definitions
//! - Dispatching named tasks on their own supervised tasks

use std::sync::Arc;
use tracing::{info, warn};

use apigw_coordinator::config::Config;
use apigw_coordinator::election;
use apigw_coordinator::migrations;
use apigw_coordinator::runtime::CoordinatorRuntime;
use apigw_coordinator::scheduler::{PeriodicTaskStore, PostgresTaskStore, SqliteTaskStore};
use apigw_coordinator::tasks::builtin_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apigw_coordinator=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        election = %config.election.prefix(),
        reload_cron = %config.scheduler.reload_cron,
        leader_only = config.scheduler.leader_only,
        demo_mode = config.demo.enabled,
        "Starting APIGW Coordinator"
    );

    // Connect to database and apply migrations
    let store: Arc<dyn PeriodicTaskStore> = if config.is_sqlite() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        migrations::run_sqlite(&pool).await?;
        Arc::new(SqliteTaskStore::new(pool))
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Arc::new(PostgresTaskStore::new(pool))
    };

    info!("Database schema verified");

    let coordinator = election::connect(&config.election).await?;
    let registry = builtin_registry();
    info!(tasks = ?registry.names(), "Task registry initialized");

    // Start the runtime
    let runtime = CoordinatorRuntime::builder()
        .store(store)
        .registry(registry)
        .coordinator(coordinator)
        .election(config.election.clone())
        .scheduler(config.scheduler.clone())
        .build()?
        .start()
        .await?;

    info!(instance_id = %runtime.elector().instance_id(), "Coordinator ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("APIGW Coordinator shut down");

    Ok(())
}
