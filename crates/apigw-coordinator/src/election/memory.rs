// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory coordination service.
//!
//! Candidates are queued per prefix in campaign order and the head of the
//! queue is the leader, which mirrors etcd's lowest-create-revision rule.
//! Closing or expiring a session drops its candidacies.
//!
//! ## Limitations
//!
//! - Single-process only: leadership is not shared across processes
//! - Leases never expire on their own; use [`InMemoryCoordinator::expire_session`]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CoordinationError, Coordinator, Session};

#[derive(Debug)]
struct Candidate {
    lease_id: i64,
    value: String,
}

#[derive(Debug, Default)]
struct State {
    next_lease: i64,
    sessions: HashMap<i64, CancellationToken>,
    candidates: HashMap<String, VecDeque<Candidate>>,
    failing_sessions: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    version: watch::Sender<u64>,
}

fn poison_err<T>(_: PoisonError<T>) -> CoordinationError {
    CoordinationError::Unavailable("lock poisoned".to_string())
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, CoordinationError> {
        self.state.lock().map_err(poison_err)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn end_session(&self, lease_id: i64) -> Result<bool, CoordinationError> {
        let ended = {
            let mut state = self.lock()?;
            let token = state.sessions.remove(&lease_id);
            for queue in state.candidates.values_mut() {
                queue.retain(|c| c.lease_id != lease_id);
            }
            state.candidates.retain(|_, q| !q.is_empty());
            token
        };

        match ended {
            Some(token) => {
                token.cancel();
                self.bump();
                debug!(lease_id, "In-memory session ended");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Process-local [`Coordinator`].
#[derive(Debug, Clone)]
pub struct InMemoryCoordinator {
    shared: Arc<Shared>,
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    next_lease: 1,
                    ..Default::default()
                }),
                version,
            }),
        }
    }

    /// Make the next `count` session creations fail.
    pub fn fail_next_sessions(&self, count: usize) {
        if let Ok(mut state) = self.shared.lock() {
            state.failing_sessions = count;
        }
    }

    /// Force a session to end as if its lease had expired.
    ///
    /// Returns false if no such session is live.
    pub fn expire_session(&self, lease_id: i64) -> bool {
        self.shared.end_session(lease_id).unwrap_or(false)
    }

    /// Lease of the current leader of `prefix`.
    pub fn leader_lease(&self, prefix: &str) -> Option<i64> {
        let state = self.shared.lock().ok()?;
        state
            .candidates
            .get(prefix)
            .and_then(|q| q.front())
            .map(|c| c.lease_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn create_session(&self, _ttl: Duration) -> Result<Box<dyn Session>, CoordinationError> {
        let (lease_id, done) = {
            let mut state = self.shared.lock()?;
            if state.failing_sessions > 0 {
                state.failing_sessions -= 1;
                return Err(CoordinationError::Session(
                    "injected session failure".to_string(),
                ));
            }
            let lease_id = state.next_lease;
            state.next_lease += 1;
            let done = CancellationToken::new();
            state.sessions.insert(lease_id, done.clone());
            (lease_id, done)
        };

        Ok(Box::new(MemorySession {
            shared: self.shared.clone(),
            lease_id,
            done,
        }))
    }

    async fn leader(&self, prefix: &str) -> Result<Option<String>, CoordinationError> {
        let state = self.shared.lock()?;
        Ok(state
            .candidates
            .get(prefix)
            .and_then(|q| q.front())
            .map(|c| c.value.clone()))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    lease_id: i64,
    done: CancellationToken,
}

impl MemorySession {
    /// Whether this session heads the queue of `prefix`.
    fn is_front(&self, prefix: &str) -> Result<bool, CoordinationError> {
        if self.done.is_cancelled() {
            return Err(CoordinationError::SessionClosed);
        }
        let state = self.shared.lock()?;
        Ok(state
            .candidates
            .get(prefix)
            .and_then(|q| q.front())
            .is_some_and(|c| c.lease_id == self.lease_id))
    }
}

#[async_trait]
impl Session for MemorySession {
    fn lease_id(&self) -> i64 {
        self.lease_id
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    async fn campaign(&self, prefix: &str, value: &str) -> Result<(), CoordinationError> {
        {
            let mut state = self.shared.lock()?;
            if self.done.is_cancelled() {
                return Err(CoordinationError::SessionClosed);
            }
            let queue = state.candidates.entry(prefix.to_string()).or_default();
            match queue.iter_mut().find(|c| c.lease_id == self.lease_id) {
                Some(existing) => existing.value = value.to_string(),
                None => queue.push_back(Candidate {
                    lease_id: self.lease_id,
                    value: value.to_string(),
                }),
            }
        }
        self.shared.bump();

        let mut changes = self.shared.version.subscribe();
        loop {
            if self.is_front(prefix)? {
                return Ok(());
            }
            tokio::select! {
                _ = changes.changed() => {}
                _ = self.done.cancelled() => return Err(CoordinationError::SessionClosed),
            }
        }
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        self.shared.end_session(self.lease_id)?;
        Ok(())
    }
}
