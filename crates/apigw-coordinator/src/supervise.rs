// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Panic-recovering spawn wrapper for fire-and-forget work.

use std::any::Any;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Spawn `fut` on its own task and log instead of propagating a panic.
///
/// The returned handle belongs to the supervisor and always resolves to `()`.
pub fn spawn_supervised<F>(name: impl Into<String>, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let inner = tokio::spawn(fut);

    tokio::spawn(async move {
        match inner.await {
            Ok(()) => debug!(task = %name, "Supervised task finished"),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(task = %name, panic = %message, "Supervised task panicked");
            }
            Err(_) => warn!(task = %name, "Supervised task cancelled"),
        }
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
