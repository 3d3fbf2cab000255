// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for apigw-coordinator.
//!
//! This module provides [`CoordinatorRuntime`] which runs the leader elector
//! and the periodic scheduler inside an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apigw_coordinator::election::InMemoryCoordinator;
//! use apigw_coordinator::runtime::CoordinatorRuntime;
//! use apigw_coordinator::scheduler::SqliteTaskStore;
//! use apigw_coordinator::tasks::builtin_registry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::SqlitePool::connect("sqlite:apigw.db").await?;
//!     apigw_coordinator::migrations::run_sqlite(&pool).await?;
//!
//!     let runtime = CoordinatorRuntime::builder()
//!         .store(Arc::new(SqliteTaskStore::new(pool)))
//!         .registry(builtin_registry())
//!         .coordinator(Arc::new(InMemoryCoordinator::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // Leader-only work can wait for a leadership term
//!     let term = runtime.elector().wait_for_leading().await;
//!     term.cancelled().await;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::election::{Coordinator, ElectionConfig, InMemoryCoordinator, LeaderElector};
use crate::scheduler::{PeriodicScheduler, PeriodicTaskStore, SchedulerConfig};
use crate::tasks::TaskRegistry;

/// Builder for creating a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeBuilder {
    store: Option<Arc<dyn PeriodicTaskStore>>,
    registry: Option<TaskRegistry>,
    coordinator: Option<Arc<dyn Coordinator>>,
    election: ElectionConfig,
    scheduler: SchedulerConfig,
    instance_id: Option<String>,
}

impl Default for CoordinatorRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            registry: None,
            coordinator: None,
            election: ElectionConfig::default(),
            scheduler: SchedulerConfig::default(),
            instance_id: None,
        }
    }
}

impl CoordinatorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the periodic task definition store (required).
    pub fn store(mut self, store: Arc<dyn PeriodicTaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the task registry (required). It is frozen once the runtime is built.
    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the coordination service.
    ///
    /// Defaults to a process-local [`InMemoryCoordinator`], under which this
    /// replica always becomes leader.
    pub fn coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the leader election configuration.
    pub fn election(mut self, config: ElectionConfig) -> Self {
        self.election = config;
        self
    }

    /// Set the periodic scheduler configuration.
    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Override the instance identity (defaults to `<hostname>_<local IPv4>`).
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<CoordinatorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        let coordinator = self.coordinator.unwrap_or_else(|| {
            warn!("No coordinator configured; using in-memory coordination");
            Arc::new(InMemoryCoordinator::new()) as Arc<dyn Coordinator>
        });

        Ok(CoordinatorRuntimeConfig {
            store,
            registry: Arc::new(registry),
            coordinator,
            election: self.election,
            scheduler: self.scheduler,
            instance_id: self.instance_id,
        })
    }
}

/// Configuration for a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeConfig {
    store: Arc<dyn PeriodicTaskStore>,
    registry: Arc<TaskRegistry>,
    coordinator: Arc<dyn Coordinator>,
    election: ElectionConfig,
    scheduler: SchedulerConfig,
    instance_id: Option<String>,
}

impl CoordinatorRuntimeConfig {
    /// Start the runtime, spawning the election loop and the scheduler.
    ///
    /// Task definitions are loaded once before the scheduler starts. A storage
    /// failure at that point is logged; the reload job retries it.
    pub async fn start(self) -> Result<CoordinatorRuntime> {
        let elector = match self.instance_id {
            Some(id) => LeaderElector::with_instance_id(self.coordinator, self.election, id),
            None => LeaderElector::new(self.coordinator, self.election),
        };

        let scheduler = PeriodicScheduler::with_leader(
            self.store,
            self.registry,
            self.scheduler,
            elector.clone(),
        );
        scheduler.init()?;

        if let Err(e) = scheduler.load_tasks().await {
            warn!(error = %e, "Initial periodic task load failed");
        }

        let election_cancel = CancellationToken::new();
        let election_handle = elector
            .run(election_cancel.clone())
            .ok_or_else(|| anyhow::anyhow!("leader elector already running"))?;

        let scheduler_shutdown = scheduler.shutdown_handle();
        let runner = scheduler.clone();
        let scheduler_handle = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!(error = %e, "Periodic scheduler failed");
            }
        });

        info!(
            instance_id = %elector.instance_id(),
            prefix = %elector.prefix(),
            registered_tasks = scheduler.registered_ids().len(),
            "CoordinatorRuntime started"
        );

        Ok(CoordinatorRuntime {
            elector,
            scheduler,
            election_cancel,
            scheduler_shutdown,
            election_handle,
            scheduler_handle,
        })
    }
}

/// A running coordinator that can be embedded in an application.
///
/// The runtime manages:
/// - Leader election against the configured coordination service
/// - The periodic scheduler and its reload job
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct CoordinatorRuntime {
    elector: LeaderElector,
    scheduler: PeriodicScheduler,
    election_cancel: CancellationToken,
    scheduler_shutdown: Arc<Notify>,
    election_handle: JoinHandle<()>,
    scheduler_handle: JoinHandle<()>,
}

impl CoordinatorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> CoordinatorRuntimeBuilder {
        CoordinatorRuntimeBuilder::new()
    }

    /// The leader elector of this replica.
    pub fn elector(&self) -> &LeaderElector {
        &self.elector
    }

    /// The periodic scheduler of this replica.
    pub fn scheduler(&self) -> &PeriodicScheduler {
        &self.scheduler
    }

    /// Gracefully shut down the runtime.
    ///
    /// Cancels the election (closing its session), stops the cron engine and
    /// waits for both tasks. Tasks already dispatched run to completion.
    pub async fn shutdown(self) -> Result<()> {
        info!("CoordinatorRuntime shutting down...");

        self.election_cancel.cancel();
        self.scheduler_shutdown.notify_one();

        if let Err(e) = self.election_handle.await {
            error!("Leader elector task panicked: {}", e);
        }

        if let Err(e) = self.scheduler_handle.await {
            error!("Periodic scheduler task panicked: {}", e);
        }

        info!("CoordinatorRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.election_handle.is_finished() && !self.scheduler_handle.is_finished()
    }
}
