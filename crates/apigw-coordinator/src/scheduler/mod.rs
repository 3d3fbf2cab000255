// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic task scheduler.
//!
//! Keeps a [`CronEngine`] in sync with the periodic task definitions held in
//! a [`PeriodicTaskStore`]. Reconciliation runs on demand through
//! [`PeriodicScheduler::load_tasks`] and automatically as a cron entry of the
//! same engine (every five minutes by default).
//!
//! Per definition:
//!
//! | Registered? | Definition | Action |
//! |---|---|---|
//! | no | enabled | parse cron, add entry, record it in the [`TaskEntryMap`] |
//! | yes | enabled | nothing |
//! | yes | disabled or deleted | remove entry and forget it |
//!
//! A registered task is not re-read, so edits to its cron expression or
//! arguments take effect only after it is disabled and enabled again.
//!
//! Each fired entry decodes its stored arguments and hands them to
//! [`TaskRegistry::dispatch`]. When a [`LeaderElector`] is attached and
//! `leader_only` is set, entries fire only on the current leader.

mod engine;
mod entry_map;
mod store;

pub use engine::{CronEngine, EntryId, parse_cron};
pub use entry_map::TaskEntryMap;
pub use store::{
    InMemoryTaskStore, PeriodicTaskDefinition, PeriodicTaskStore, PostgresTaskStore,
    SqliteTaskStore,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::election::LeaderElector;
use crate::tasks::TaskRegistry;

/// Periodic scheduling errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The cron expression could not be parsed or never fires.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// Offending expression.
        expr: String,
        /// Parser message.
        reason: String,
    },

    /// The engine has shut down.
    #[error("cron engine stopped")]
    EngineStopped,
}

/// Periodic scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cron expression of the reconciliation job
    pub reload_cron: String,
    /// Only fire periodic tasks on the elected leader
    pub leader_only: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reload_cron: "*/5 * * * *".to_string(),
            leader_only: true,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Newly registered tasks
    pub registered: usize,
    /// Tasks removed because they were disabled or deleted
    pub unregistered: usize,
    /// Enabled tasks that could not be registered
    pub failed: usize,
    /// The definitions were read before those of an already applied pass
    /// and were discarded
    pub stale: bool,
}

/// Cron scheduler synchronized with stored task definitions.
///
/// Cheap to clone; clones share the same engine and entry map.
#[derive(Clone)]
pub struct PeriodicScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    engine: CronEngine,
    entries: TaskEntryMap,
    store: Arc<dyn PeriodicTaskStore>,
    registry: Arc<TaskRegistry>,
    leader: Option<LeaderElector>,
    config: SchedulerConfig,
    reload_entry: OnceCell<EntryId>,
    /// Ticket handed to each reload before it reads the store.
    issued: AtomicU64,
    /// Ticket of the newest reload applied so far.
    reconcile: Mutex<u64>,
}

impl PeriodicScheduler {
    /// Create a scheduler that fires tasks on every replica.
    pub fn new(
        store: Arc<dyn PeriodicTaskStore>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self::build(store, registry, config, None)
    }

    /// Create a scheduler gated on `elector` when `config.leader_only` is set.
    pub fn with_leader(
        store: Arc<dyn PeriodicTaskStore>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
        elector: LeaderElector,
    ) -> Self {
        let leader = config.leader_only.then_some(elector);
        Self::build(store, registry, config, leader)
    }

    fn build(
        store: Arc<dyn PeriodicTaskStore>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
        leader: Option<LeaderElector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine: CronEngine::new(),
                entries: TaskEntryMap::new(),
                store,
                registry,
                leader,
                config,
                reload_entry: OnceCell::new(),
                issued: AtomicU64::new(0),
                reconcile: Mutex::new(0),
            }),
        }
    }

    /// Register the reconciliation job. Only the first call has an effect.
    pub fn init(&self) -> Result<(), ScheduleError> {
        self.inner.reload_entry.get_or_try_init(|| {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let id = self.inner.engine.add(
                "reload-periodic-tasks",
                &self.inner.config.reload_cron,
                move || {
                    let weak = weak.clone();
                    async move {
                        let Some(inner) = weak.upgrade() else {
                            return;
                        };
                        let scheduler = PeriodicScheduler { inner };
                        if let Err(e) = scheduler.load_tasks().await {
                            warn!(error = %e, "Failed to reload periodic tasks");
                        }
                    }
                },
            )?;

            info!(
                reload_cron = %self.inner.config.reload_cron,
                leader_only = self.inner.leader.is_some(),
                "Periodic scheduler initialized"
            );
            Ok::<EntryId, ScheduleError>(id)
        })?;
        Ok(())
    }

    /// Run the timer engine until shutdown is signalled.
    pub async fn run(&self) -> Result<(), ScheduleError> {
        self.init()?;
        self.inner.engine.run().await;
        Ok(())
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.inner.engine.shutdown_handle()
    }

    /// Reconcile registered entries with the stored definitions.
    ///
    /// A storage failure is returned and leaves every registered task in
    /// place. A task that fails to register is logged and counted; the other
    /// tasks are still processed.
    ///
    /// Overlapping reloads are ordered by the moment they started reading.
    /// A reload whose read started before that of an already applied reload
    /// changes nothing and reports `stale`.
    pub async fn load_tasks(&self) -> crate::error::Result<ReloadSummary> {
        let ticket = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let definitions = self.inner.store.find_all().await?;

        let summary = {
            let mut applied = self
                .inner
                .reconcile
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if ticket < *applied {
                None
            } else {
                *applied = ticket;
                Some(self.reconcile(&definitions))
            }
        };

        let Some(summary) = summary else {
            debug!(ticket, "Discarding outdated periodic task snapshot");
            return Ok(ReloadSummary {
                stale: true,
                ..Default::default()
            });
        };

        if summary != ReloadSummary::default() {
            info!(
                registered = summary.registered,
                unregistered = summary.unregistered,
                failed = summary.failed,
                active = self.inner.entries.len(),
                "Periodic tasks reloaded"
            );
        } else {
            debug!(active = self.inner.entries.len(), "Periodic tasks unchanged");
        }
        Ok(summary)
    }

    fn reconcile(&self, definitions: &[PeriodicTaskDefinition]) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut stored = HashSet::with_capacity(definitions.len());

        for task in definitions {
            stored.insert(task.id);

            if !task.enabled {
                if self.unregister(task.id, &task.name) {
                    summary.unregistered += 1;
                }
                continue;
            }

            match self.register(task) {
                Ok(true) => summary.registered += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        task_id = task.id,
                        task = %task.name,
                        cron = %task.cron,
                        error = %e,
                        "Failed to register periodic task"
                    );
                }
            }
        }

        for task_id in self.inner.entries.ids() {
            if !stored.contains(&task_id) && self.unregister(task_id, "<deleted>") {
                summary.unregistered += 1;
            }
        }

        summary
    }

    /// Returns true if a new entry was added.
    fn register(&self, task: &PeriodicTaskDefinition) -> Result<bool, ScheduleError> {
        if self.inner.entries.get(task.id).is_some() {
            return Ok(false);
        }

        info!(
            task_id = task.id,
            task = %task.name,
            cron = %task.cron,
            args = %task.args,
            "Registering periodic task"
        );

        let task_id = task.id;
        let name = Arc::<str>::from(task.name.as_str());
        let args = Arc::<str>::from(task.args.as_str());
        let registry = self.inner.registry.clone();
        let leader = self.inner.leader.clone();

        let entry_id = self.inner.engine.add(&task.name, &task.cron, move || {
            let name = name.clone();
            let args = args.clone();
            let registry = registry.clone();
            let leader = leader.clone();
            async move {
                if let Some(elector) = &leader
                    && !elector.is_leader()
                {
                    debug!(task_id, task = %name, "Not leader, skipping periodic task");
                    return;
                }

                let values: Vec<Value> = match serde_json::from_str(&args) {
                    Ok(values) => values,
                    Err(e) => {
                        error!(task_id, task = %name, error = %e, "Failed to decode periodic task args");
                        return;
                    }
                };

                registry.dispatch(&name, values);
            }
        })?;

        self.inner.entries.set(task.id, entry_id);
        Ok(true)
    }

    /// Returns true if an entry was removed.
    fn unregister(&self, task_id: i64, name: &str) -> bool {
        let Some(entry_id) = self.inner.entries.get(task_id) else {
            return false;
        };

        info!(task_id, task = %name, "Unregistering periodic task");
        self.inner.engine.remove(entry_id);
        self.inner.entries.delete(task_id);
        true
    }

    /// Task ids currently registered.
    pub fn registered_ids(&self) -> Vec<i64> {
        self.inner.entries.ids()
    }

    /// Whether `task_id` is registered.
    pub fn is_registered(&self, task_id: i64) -> bool {
        self.inner.entries.get(task_id).is_some()
    }

    /// Next scheduled run of a registered task.
    pub fn next_run(&self, task_id: i64) -> Option<chrono::DateTime<chrono::Local>> {
        let entry_id = self.inner.entries.get(task_id)?;
        self.inner.engine.next_run(entry_id)
    }

    /// Number of engine entries, including the reconciliation job.
    pub fn engine_entries(&self) -> usize {
        self.inner.engine.len()
    }
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("registered", &self.inner.entries.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
