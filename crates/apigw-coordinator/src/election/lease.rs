// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease keep-alive loop shared by lease-backed sessions.
//!
//! The session is considered lost as soon as the lease deadline passes
//! without a confirmed renewal, even if the server never answers.
#![cfg_attr(not(feature = "etcd"), allow(dead_code))]

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One keep-alive round trip against the coordination service.
#[async_trait]
pub(crate) trait LeaseRenewer: Send {
    /// Renew the lease and return the TTL granted in seconds. Zero means the
    /// lease no longer exists.
    async fn renew(&mut self) -> Result<i64, String>;
}

/// Renew every `ttl / 3` until `done` fires or the lease is lost. Always
/// leaves `done` cancelled.
pub(crate) async fn keep_alive_loop<R: LeaseRenewer>(
    mut renewer: R,
    lease_id: i64,
    ttl: Duration,
    done: CancellationToken,
) {
    let interval = ttl / 3;
    let mut deadline = Instant::now() + ttl;

    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let outcome = tokio::select! {
            _ = done.cancelled() => return,
            r = tokio::time::timeout_at(deadline, renewer.renew()) => r,
        };

        match outcome {
            Ok(Ok(granted)) if granted > 0 => {
                deadline = Instant::now() + Duration::from_secs(granted as u64);
                debug!(lease_id, ttl_secs = granted, "Lease renewed");
            }
            Ok(Ok(_)) => {
                warn!(lease_id, "Lease expired");
                break;
            }
            Ok(Err(e)) => {
                warn!(lease_id, error = %e, "Lease keep-alive failed");
                break;
            }
            Err(_) => {
                warn!(lease_id, "Lease deadline passed without keep-alive response");
                break;
            }
        }
    }

    done.cancel();
}
