// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-resource status machine.

use super::{
    OperationType, PlatformGuard, ResourceSnapshot, ResourceStatus, StatusError, lookup,
};

/// Decides legal operations for one resource.
///
/// The machine keeps its own cursor seeded from the snapshot. It never
/// persists anything; the caller stores the status returned by
/// [`next_status`](Self::next_status).
#[derive(Debug, Clone)]
pub struct StatusMachine {
    resource: ResourceSnapshot,
    current: ResourceStatus,
    guard: PlatformGuard,
}

impl StatusMachine {
    /// Create a machine for `resource` with a permissive guard.
    pub fn new(resource: ResourceSnapshot) -> Self {
        let current = resource.status;
        Self {
            resource,
            current,
            guard: PlatformGuard::permissive(),
        }
    }

    /// Attach the platform guard for this request.
    pub fn with_guard(mut self, guard: PlatformGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Current status of the cursor.
    pub fn current(&self) -> ResourceStatus {
        self.current
    }

    /// The resource this machine was built for.
    pub fn resource(&self) -> &ResourceSnapshot {
        &self.resource
    }

    /// Check whether `operation` is allowed.
    pub fn can_do(&self, operation: OperationType) -> Result<(), StatusError> {
        self.resolve(operation).map(|_| ())
    }

    /// Return the status `operation` leads to and move the cursor there.
    ///
    /// `update` on a draft is a no-op judged on the cursor, not the snapshot.
    pub fn next_status(&mut self, operation: OperationType) -> Result<ResourceStatus, StatusError> {
        let next = self.resolve(operation)?;
        self.current = next;
        Ok(next)
    }

    fn resolve(&self, operation: OperationType) -> Result<ResourceStatus, StatusError> {
        self.guard.check(&self.resource)?;

        // The table has no identity rows. The no-op is keyed on the cursor,
        // not the snapshot, so a chain of operations sees its own drafts.
        if operation == OperationType::Update
            && matches!(
                self.current,
                ResourceStatus::CreateDraft | ResourceStatus::UpdateDraft
            )
        {
            return Ok(self.current);
        }

        lookup(self.current, operation).ok_or(StatusError::IllegalTransition {
            from: self.current,
            operation,
        })
    }
}
