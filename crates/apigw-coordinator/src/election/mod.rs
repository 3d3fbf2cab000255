// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leader election over a strongly-consistent coordination service.
//!
//! Every replica runs one [`LeaderElector`] racing on the same key prefix.
//! The elector opens a lease-bound [`Session`], campaigns with its instance
//! identity, and once elected watches the session. When the session is lost
//! it starts over with a fresh session; when its cancellation token fires it
//! closes the session and stops for good.
//!
//! ```text
//!  ┌──────────────┐  ok   ┌─────────────┐  elected  ┌─────────┐
//!  │ Initializing │──────►│ Campaigning │──────────►│ Leading │
//!  └──────────────┘       └─────────────┘           └────┬────┘
//!     ▲  │ error: retry      │ error: retry              │
//!     │  └──┘                └──┘            session lost│ cancelled
//!     └──────────────────────────────────────────────────┘    ▼
//!                                                        ┌─────────┐
//!                                                        │ Stopped │
//!                                                        └─────────┘
//! ```
//!
//! Coordination failures are never returned to callers. They are logged and
//! retried after [`ElectionConfig::retry_interval`].
//!
//! Two [`Coordinator`] implementations are provided:
//!
//! - [`InMemoryCoordinator`] - process-local, used by tests and single-replica
//!   deployments
//! - `EtcdCoordinator` - etcd leases and elections (feature `etcd`)

mod lease;
mod memory;

#[cfg(feature = "etcd")]
mod etcd;

pub use memory::InMemoryCoordinator;

#[cfg(feature = "etcd")]
pub use etcd::EtcdCoordinator;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordination service errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    /// A session could not be created.
    #[error("failed to create session: {0}")]
    Session(String),

    /// A campaign call failed.
    #[error("campaign failed: {0}")]
    Campaign(String),

    /// The leader could not be queried.
    #[error("leader query failed: {0}")]
    Query(String),

    /// The session has already ended.
    #[error("session closed")]
    SessionClosed,

    /// The coordination service could not be reached.
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
}

/// Leader election configuration.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Election name; the key prefix is `<name>-leader-election`
    pub name: String,
    /// Fixed delay between failed session/campaign attempts
    pub retry_interval: Duration,
    /// Lease TTL of a coordination session
    pub session_ttl: Duration,
    /// Coordination service endpoints (empty for in-memory coordination)
    pub etcd_endpoints: Vec<String>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            name: "apigw".to_string(),
            retry_interval: Duration::from_secs(5),
            session_ttl: Duration::from_secs(60),
            etcd_endpoints: Vec::new(),
        }
    }
}

impl ElectionConfig {
    /// Key prefix shared by all candidates.
    pub fn prefix(&self) -> String {
        format!("{}-leader-election", self.name)
    }
}

/// Client side of a coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Open a new session bound to a lease with the given TTL.
    async fn create_session(&self, ttl: Duration) -> Result<Box<dyn Session>, CoordinationError>;

    /// Identity recorded by the current leader of `prefix`, if any.
    async fn leader(&self, prefix: &str) -> Result<Option<String>, CoordinationError>;
}

/// A lease-bound session. Owned by exactly one elector and never reused.
#[async_trait]
pub trait Session: Send + Sync {
    /// Lease identifier backing the session.
    fn lease_id(&self) -> i64;

    /// Token cancelled when the session is lost or closed.
    fn done(&self) -> CancellationToken;

    /// Block until `value` is elected leader of `prefix`.
    async fn campaign(&self, prefix: &str, value: &str) -> Result<(), CoordinationError>;

    /// Close the session and release its lease.
    async fn close(&self) -> Result<(), CoordinationError>;
}

#[derive(Debug, Clone, Default)]
struct ElectionState {
    leading: bool,
    term: Option<CancellationToken>,
    stopped: bool,
}

enum Campaign {
    Elected,
    SessionLost,
    Cancelled,
}

/// Self-healing single-leader designation for one process.
///
/// Cheap to clone; clones share the same election.
#[derive(Clone)]
pub struct LeaderElector {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: Arc<dyn Coordinator>,
    config: ElectionConfig,
    prefix: String,
    instance_id: String,
    started: AtomicBool,
    state: watch::Sender<ElectionState>,
    stopped: CancellationToken,
}

impl LeaderElector {
    /// Create an elector identified as `<hostname>_<local IPv4>`.
    pub fn new(coordinator: Arc<dyn Coordinator>, config: ElectionConfig) -> Self {
        Self::with_instance_id(coordinator, config, local_instance_id())
    }

    /// Create an elector with an explicit instance identity.
    pub fn with_instance_id(
        coordinator: Arc<dyn Coordinator>,
        config: ElectionConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ElectionState::default());
        Self {
            inner: Arc::new(Inner {
                coordinator,
                prefix: config.prefix(),
                config,
                instance_id: instance_id.into(),
                started: AtomicBool::new(false),
                state,
                stopped: CancellationToken::new(),
            }),
        }
    }

    /// Start the election loop in the background.
    ///
    /// Only the first call starts anything; later calls return `None`. The
    /// loop runs until `cancel` fires, after which the elector is stopped for
    /// good.
    pub fn run(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!(instance_id = %self.inner.instance_id, "Leader elector already running");
            return None;
        }

        let inner = self.inner.clone();
        Some(tokio::spawn(async move { inner.election_loop(cancel).await }))
    }

    /// Whether this instance currently holds leadership.
    pub fn is_leader(&self) -> bool {
        self.inner.state.borrow().leading
    }

    /// Identity of the current leader as recorded by the coordination service.
    ///
    /// Returns `None` when no leader is recorded or the query fails.
    pub async fn leader(&self) -> Option<String> {
        match self.inner.coordinator.leader(&self.inner.prefix).await {
            Ok(leader) => leader,
            Err(e) => {
                error!(prefix = %self.inner.prefix, error = %e, "Failed to query current leader");
                None
            }
        }
    }

    /// Wait until this instance leads, then return a token that is cancelled
    /// when that leadership term ends.
    ///
    /// Returns immediately when already leading. If the elector stops without
    /// leading, the returned token is already cancelled.
    pub async fn wait_for_leading(&self) -> CancellationToken {
        let mut rx = self.inner.state.subscribe();
        let term = match rx.wait_for(|s| s.leading || s.stopped).await {
            Ok(state) if state.leading => state.term.clone(),
            _ => None,
        };

        term.unwrap_or_else(|| {
            let ended = CancellationToken::new();
            ended.cancel();
            ended
        })
    }

    /// Resolves once the election loop has fully stopped.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await
    }

    /// Whether the election loop has fully stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.is_cancelled()
    }

    /// This instance's identity.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Key prefix this elector campaigns on.
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("instance_id", &self.inner.instance_id)
            .field("prefix", &self.inner.prefix)
            .field("leading", &self.is_leader())
            .finish()
    }
}

impl Inner {
    async fn election_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            instance_id = %self.instance_id,
            prefix = %self.prefix,
            retry_interval_secs = self.config.retry_interval.as_secs(),
            "Leader elector started"
        );

        while let Some(session) = self.open_session(&cancel).await {
            match self.campaign(session.as_ref(), &cancel).await {
                Campaign::Elected => {}
                Campaign::SessionLost => {
                    warn!(instance_id = %self.instance_id, "Election session lost while campaigning");
                    continue;
                }
                Campaign::Cancelled => {
                    self.close_session(session.as_ref()).await;
                    break;
                }
            }

            let term = CancellationToken::new();
            self.state.send_modify(|s| {
                s.leading = true;
                s.term = Some(term.clone());
            });
            info!(instance_id = %self.instance_id, lease_id = session.lease_id(), "Became leader");

            let lost = session.done();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.step_down(&term);
                    self.close_session(session.as_ref()).await;
                    break;
                }
                _ = lost.cancelled() => {
                    self.step_down(&term);
                    warn!(instance_id = %self.instance_id, "Election session lost, starting new election");
                }
            }
        }

        self.state.send_modify(|s| {
            s.leading = false;
            s.term = None;
            s.stopped = true;
        });
        self.stopped.cancel();
        info!(instance_id = %self.instance_id, "Leader elector stopped");
    }

    async fn open_session(&self, cancel: &CancellationToken) -> Option<Box<dyn Session>> {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                r = self.coordinator.create_session(self.config.session_ttl) => r,
            };

            match result {
                Ok(session) => {
                    debug!(lease_id = session.lease_id(), "Election session created");
                    return Some(session);
                }
                Err(e) => {
                    error!(error = %e, "Create election session failed");
                    if !self.backoff(cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn campaign(&self, session: &dyn Session, cancel: &CancellationToken) -> Campaign {
        let lost = session.done();
        loop {
            info!(instance_id = %self.instance_id, "Trying to become leader");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Campaign::Cancelled,
                _ = lost.cancelled() => return Campaign::SessionLost,
                r = session.campaign(&self.prefix, &self.instance_id) => r,
            };

            match result {
                Ok(()) => return Campaign::Elected,
                Err(e) => {
                    error!(instance_id = %self.instance_id, error = %e, "Leader election campaign failed");
                    if !self.backoff(cancel).await {
                        return Campaign::Cancelled;
                    }
                }
            }
        }
    }

    /// Returns false when cancelled during the wait.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_interval) => true,
        }
    }

    fn step_down(&self, term: &CancellationToken) {
        self.state.send_modify(|s| {
            s.leading = false;
            s.term = None;
        });
        term.cancel();
        info!(instance_id = %self.instance_id, "Leadership ended");
    }

    async fn close_session(&self, session: &dyn Session) {
        if let Err(e) = session.close().await {
            warn!(lease_id = session.lease_id(), error = %e, "Failed to close election session");
        }
    }
}

/// Build the coordinator selected by `config`.
///
/// Without endpoints the coordinator is process-local, which only yields a
/// single leader when one replica runs. Configured endpoints are never
/// ignored: a build without the `etcd` feature rejects them.
pub async fn connect(config: &ElectionConfig) -> Result<Arc<dyn Coordinator>, CoordinationError> {
    if config.etcd_endpoints.is_empty() {
        warn!("No etcd endpoints configured; using in-memory coordination (single replica only)");
        return Ok(Arc::new(InMemoryCoordinator::new()));
    }
    connect_etcd(&config.etcd_endpoints).await
}

#[cfg(feature = "etcd")]
async fn connect_etcd(endpoints: &[String]) -> Result<Arc<dyn Coordinator>, CoordinationError> {
    let coordinator = EtcdCoordinator::connect(endpoints).await?;
    info!(endpoints = ?endpoints, "Connected to etcd");
    Ok(Arc::new(coordinator))
}

#[cfg(not(feature = "etcd"))]
async fn connect_etcd(endpoints: &[String]) -> Result<Arc<dyn Coordinator>, CoordinationError> {
    Err(CoordinationError::Unavailable(format!(
        "etcd endpoints {:?} configured but this build lacks the etcd feature",
        endpoints
    )))
}

/// `<hostname>_<local IPv4>` identity of this process.
pub fn local_instance_id() -> String {
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}_{}", hostname, local_ipv4())
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends no packets.
fn local_ipv4() -> Ipv4Addr {
    let outbound = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };

    match outbound() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    }
}
