// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! etcd-backed coordination: lease sessions and election campaigns.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, LeaseKeepAliveStream, LeaseKeeper};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::lease::{LeaseRenewer, keep_alive_loop};
use super::{CoordinationError, Coordinator, Session};

/// [`Coordinator`] talking to an etcd cluster.
#[derive(Clone)]
pub struct EtcdCoordinator {
    client: Client,
}

impl EtcdCoordinator {
    /// Connect to the given endpoints.
    pub async fn connect(endpoints: &[String]) -> Result<Self, CoordinationError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| CoordinationError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Coordinator for EtcdCoordinator {
    async fn create_session(&self, ttl: Duration) -> Result<Box<dyn Session>, CoordinationError> {
        let mut client = self.client.clone();
        let ttl_secs = ttl.as_secs().max(1) as i64;

        let lease_id = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| CoordinationError::Session(e.to_string()))?
            .id();

        let (keeper, stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| CoordinationError::Session(e.to_string()))?;

        let done = CancellationToken::new();
        let keep_alive = tokio::spawn(keep_alive_loop(
            EtcdRenewer { keeper, stream },
            lease_id,
            Duration::from_secs(ttl_secs as u64),
            done.clone(),
        ));

        debug!(lease_id, ttl_secs, "etcd session created");
        Ok(Box::new(EtcdSession {
            client,
            lease_id,
            done,
            keep_alive,
        }))
    }

    async fn leader(&self, prefix: &str) -> Result<Option<String>, CoordinationError> {
        let mut client = self.client.clone();
        match client.leader(prefix).await {
            Ok(resp) => Ok(resp
                .kv()
                .map(|kv| String::from_utf8_lossy(kv.value()).into_owned())),
            Err(etcd_client::Error::GRpcStatus(status)) if status.message().contains("no leader") => {
                Ok(None)
            }
            Err(e) => Err(CoordinationError::Query(e.to_string())),
        }
    }
}

struct EtcdRenewer {
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
}

#[async_trait]
impl LeaseRenewer for EtcdRenewer {
    async fn renew(&mut self) -> Result<i64, String> {
        self.keeper.keep_alive().await.map_err(|e| e.to_string())?;
        match self.stream.message().await {
            Ok(Some(resp)) => Ok(resp.ttl()),
            Ok(None) => Ok(0),
            Err(e) => Err(e.to_string()),
        }
    }
}

struct EtcdSession {
    client: Client,
    lease_id: i64,
    done: CancellationToken,
    keep_alive: JoinHandle<()>,
}

#[async_trait]
impl Session for EtcdSession {
    fn lease_id(&self) -> i64 {
        self.lease_id
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    async fn campaign(&self, prefix: &str, value: &str) -> Result<(), CoordinationError> {
        if self.done.is_cancelled() {
            return Err(CoordinationError::SessionClosed);
        }
        let mut client = self.client.clone();
        client
            .campaign(prefix, value, self.lease_id)
            .await
            .map_err(|e| CoordinationError::Campaign(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        self.keep_alive.abort();
        self.done.cancel();
        let mut client = self.client.clone();
        client
            .lease_revoke(self.lease_id)
            .await
            .map_err(|e| CoordinationError::Unavailable(e.to_string()))?;
        debug!(lease_id = self.lease_id, "etcd session closed");
        Ok(())
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        // An unclosed lease runs out its TTL.
        self.keep_alive.abort();
    }
}
