// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for apigw-coordinator integration tests.
//!
//! Provides helpers for building electors over a shared in-memory
//! coordination service and for polling asynchronous conditions.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apigw_coordinator::election::{ElectionConfig, InMemoryCoordinator, LeaderElector};
use apigw_coordinator::tasks::{TaskError, TaskRegistry};
use tokio_util::sync::CancellationToken;

/// Default timeout for conditions that should hold almost immediately.
pub const WAIT: Duration = Duration::from_secs(5);

/// Election settings with a short retry interval.
pub fn fast_election(name: &str) -> ElectionConfig {
    ElectionConfig {
        name: name.to_string(),
        retry_interval: Duration::from_millis(20),
        session_ttl: Duration::from_secs(10),
        etcd_endpoints: Vec::new(),
    }
}

/// A replica under test: an elector plus the token that stops it.
pub struct Replica {
    pub elector: LeaderElector,
    pub cancel: CancellationToken,
    pub handle: tokio::task::JoinHandle<()>,
}

impl Replica {
    /// Start an elector named `instance_id` on `coordinator`.
    pub fn start(coordinator: &InMemoryCoordinator, config: ElectionConfig, instance_id: &str) -> Self {
        let elector =
            LeaderElector::with_instance_id(Arc::new(coordinator.clone()), config, instance_id);
        let cancel = CancellationToken::new();
        let handle = elector
            .run(cancel.clone())
            .expect("elector should start once");
        Self {
            elector,
            cancel,
            handle,
        }
    }

    /// Cancel the elector and wait for its loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("elector did not stop in time")
            .expect("elector task panicked");
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `calls` reaches `n`.
pub async fn wait_for_calls(calls: &Arc<AtomicUsize>, n: usize) -> bool {
    let calls = calls.clone();
    eventually(WAIT, move || {
        let calls = calls.clone();
        async move { calls.load(Ordering::SeqCst) >= n }
    })
    .await
}

/// Registry with a `count` task that records each call and its first argument.
pub fn counting_registry() -> (TaskRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_arg = Arc::new(AtomicUsize::new(0));

    let mut registry = TaskRegistry::new();
    let c = calls.clone();
    let l = last_arg.clone();
    registry.register_fn("count", move |(n,): (usize,)| {
        let c = c.clone();
        let l = l.clone();
        async move {
            l.store(n, Ordering::SeqCst);
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<(), TaskError>(())
        }
    });

    (registry, calls, last_arg)
}
