// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cron timer engine.
//!
//! A single main loop sleeps until the earliest upcoming entry, then starts
//! every due job on its own supervised task, so jobs may overlap with each
//! other and with later ticks. Times are evaluated in the local time zone.
//! Expressions use five fields; a leading seconds field is accepted as well.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use croner::Cron;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::ScheduleError;
use crate::supervise::spawn_supervised;

/// Opaque handle of a registered entry.
pub type EntryId = u64;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct Entry {
    name: String,
    schedule: Cron,
    next: Option<DateTime<Local>>,
    job: Job,
}

/// Parse a cron expression.
pub fn parse_cron(expr: &str) -> Result<Cron, ScheduleError> {
    Cron::new(expr)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// In-process cron engine.
pub struct CronEngine {
    entries: Mutex<BTreeMap<EntryId, Entry>>,
    next_id: AtomicU64,
    changed: Notify,
    shutdown: Arc<Notify>,
    stopped: AtomicBool,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CronEngine {
    /// Create an engine with no entries.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            changed: Notify::new(),
            shutdown: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EntryId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `job` to run on `expr`.
    pub fn add<F, Fut>(&self, name: &str, expr: &str, job: F) -> Result<EntryId, ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ScheduleError::EngineStopped);
        }

        let schedule = parse_cron(expr)?;
        let next = schedule
            .find_next_occurrence(&Local::now(), false)
            .map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;

        let boxed: Job = Arc::new(move || Box::pin(job()) as JobFuture);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(
            id,
            Entry {
                name: name.to_string(),
                schedule,
                next: Some(next),
                job: boxed,
            },
        );
        self.changed.notify_one();

        debug!(entry_id = id, name = %name, cron = %expr, next_run = %next, "Cron entry added");
        Ok(id)
    }

    /// Remove an entry. Returns false if it did not exist.
    pub fn remove(&self, id: EntryId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            self.changed.notify_one();
            debug!(entry_id = id, "Cron entry removed");
        }
        removed
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the engine has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: EntryId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Next scheduled run of an entry.
    pub fn next_run(&self, id: EntryId) -> Option<DateTime<Local>> {
        self.lock().get(&id).and_then(|e| e.next)
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the engine until shutdown is signalled.
    pub async fn run(&self) {
        info!(entries = self.len(), "Cron engine started");

        loop {
            let wait = self.time_until_next();
            let sleep = async {
                match wait {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Cron engine shutting down");
                    break;
                }
                _ = self.changed.notified() => {}
                _ = sleep => self.fire_due(),
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
    }

    fn time_until_next(&self) -> Option<Duration> {
        let earliest = self.lock().values().filter_map(|e| e.next).min()?;
        Some((earliest - Local::now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn fire_due(&self) {
        let now = Local::now();
        let due: Vec<(EntryId, String, Job)> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|(_, e)| e.next.is_some_and(|next| next <= now))
                .map(|(id, e)| {
                    e.next = e.schedule.find_next_occurrence(&now, false).ok();
                    if e.next.is_none() {
                        warn!(entry_id = *id, name = %e.name, "Cron entry has no further runs");
                    }
                    (*id, e.name.clone(), e.job.clone())
                })
                .collect()
        };

        for (id, name, job) in due {
            debug!(entry_id = id, name = %name, "Running cron entry");
            spawn_supervised(format!("cron:{}", name), job());
        }
    }
}

impl std::fmt::Debug for CronEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronEngine")
            .field("entries", &self.len())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("* * * * * *").is_ok());
        assert!(matches!(
            parse_cron("not a cron"),
            Err(ScheduleError::InvalidCron { .. })
        ));
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let engine = CronEngine::new();
        let id = engine.add("noop", "*/5 * * * *", || async {}).unwrap();

        assert_eq!(engine.len(), 1);
        assert!(engine.next_run(id).unwrap() > Local::now());
        assert!(engine.remove(id));
        assert!(!engine.remove(id));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_expression_is_rejected() {
        let engine = CronEngine::new();
        assert!(engine.add("bad", "every minute", || async {}).is_err());
        assert!(engine.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_due_job_fires_and_engine_stops() {
        let engine = Arc::new(CronEngine::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        engine
            .add("tick", "* * * * * *", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        engine.shutdown_handle().notify_one();
        handle.await.unwrap();
        assert!(matches!(
            engine.add("late", "* * * * *", || async {}),
            Err(ScheduleError::EngineStopped)
        ));
    }
}
