// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Draft/publish lifecycle of gateway configuration resources.
//!
//! Every managed resource (route, service, upstream, consumer, ...) carries a
//! [`ResourceStatus`]. Edits move it into a draft status; publishing or
//! reverting brings it back to `success`. [`StatusMachine`] decides whether a
//! requested [`OperationType`] is legal for a resource and what status results,
//! without touching storage.
//!
//! # Transition Table
//!
//! ```text
//!  (none) ──create──► create_draft ──publish──► success
//!                        │  ▲                    │  │
//!                  delete│  └──update (no-op)    │  │update
//!                        ▼                 delete│  ▼
//!                     (none)                     │ update_draft ──publish/revert──► success
//!                                                ▼
//!                                          delete_draft ──publish/revert──► success
//! ```

mod guard;
mod machine;

pub use guard::{DEFAULT_DEMO_WARN_MSG, DemoConfig, PlatformGuard};
pub use machine::StatusMachine;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// No row, or unmanaged. Treated as deleted / non-existent.
    #[default]
    #[serde(rename = "")]
    None,
    /// Created but not yet published.
    #[serde(rename = "create_draft")]
    CreateDraft,
    /// Edited since the last publish.
    #[serde(rename = "update_draft")]
    UpdateDraft,
    /// Marked for deletion, not yet published.
    #[serde(rename = "delete_draft")]
    DeleteDraft,
    /// Matches the published configuration.
    #[serde(rename = "success")]
    Success,
}

impl ResourceStatus {
    /// All statuses, including [`ResourceStatus::None`].
    pub const ALL: [ResourceStatus; 5] = [
        ResourceStatus::None,
        ResourceStatus::CreateDraft,
        ResourceStatus::UpdateDraft,
        ResourceStatus::DeleteDraft,
        ResourceStatus::Success,
    ];

    /// Stored string value of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::None => "",
            ResourceStatus::CreateDraft => "create_draft",
            ResourceStatus::UpdateDraft => "update_draft",
            ResourceStatus::DeleteDraft => "delete_draft",
            ResourceStatus::Success => "success",
        }
    }

    /// Whether the resource is pending publication.
    pub fn is_draft(&self) -> bool {
        matches!(
            self,
            ResourceStatus::CreateDraft | ResourceStatus::UpdateDraft | ResourceStatus::DeleteDraft
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(ResourceStatus::None),
            "create_draft" => Ok(ResourceStatus::CreateDraft),
            "update_draft" => Ok(ResourceStatus::UpdateDraft),
            "delete_draft" => Ok(ResourceStatus::DeleteDraft),
            "success" => Ok(ResourceStatus::Success),
            other => Err(StatusError::UnknownStatus(other.to_string())),
        }
    }
}

/// Operation requested against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Create a new resource.
    Create,
    /// Edit an existing resource.
    Update,
    /// Delete a resource.
    Delete,
    /// Discard pending draft changes.
    Revert,
    /// Push the draft to the gateway.
    Publish,
}

impl OperationType {
    /// All operations.
    pub const ALL: [OperationType; 5] = [
        OperationType::Create,
        OperationType::Update,
        OperationType::Delete,
        OperationType::Revert,
        OperationType::Publish,
    ];

    /// Event name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Revert => "revert",
            OperationType::Publish => "publish",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            "revert" => Ok(OperationType::Revert),
            "publish" => Ok(OperationType::Publish),
            other => Err(StatusError::UnknownOperation(other.to_string())),
        }
    }
}

/// Minimal view of a resource, built fresh by the caller for every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Opaque resource identifier.
    pub id: String,
    /// Status currently persisted for the resource.
    pub status: ResourceStatus,
}

impl ResourceSnapshot {
    /// Snapshot of an existing resource.
    pub fn new(id: impl Into<String>, status: ResourceStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    /// Snapshot of a resource that has no row yet.
    pub fn absent(id: impl Into<String>) -> Self {
        Self::new(id, ResourceStatus::None)
    }

    /// Whether the resource counts as non-existent.
    pub fn is_absent(&self) -> bool {
        self.status == ResourceStatus::None
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status the resource must be in.
    pub from: ResourceStatus,
    /// Requested operation.
    pub operation: OperationType,
    /// Resulting status.
    pub to: ResourceStatus,
}

const fn t(from: ResourceStatus, operation: OperationType, to: ResourceStatus) -> Transition {
    Transition {
        from,
        operation,
        to,
    }
}

/// Legal transitions. Identity transitions are not listed; the machine handles
/// the `update` no-op itself.
static TRANSITIONS: [Transition; 9] = [
    t(ResourceStatus::None, OperationType::Create, ResourceStatus::CreateDraft),
    t(ResourceStatus::Success, OperationType::Delete, ResourceStatus::DeleteDraft),
    t(ResourceStatus::CreateDraft, OperationType::Delete, ResourceStatus::None),
    t(ResourceStatus::Success, OperationType::Update, ResourceStatus::UpdateDraft),
    t(ResourceStatus::UpdateDraft, OperationType::Revert, ResourceStatus::Success),
    t(ResourceStatus::DeleteDraft, OperationType::Revert, ResourceStatus::Success),
    t(ResourceStatus::UpdateDraft, OperationType::Publish, ResourceStatus::Success),
    t(ResourceStatus::CreateDraft, OperationType::Publish, ResourceStatus::Success),
    t(ResourceStatus::DeleteDraft, OperationType::Publish, ResourceStatus::Success),
];

/// The static transition table.
pub fn transitions() -> &'static [Transition] {
    &TRANSITIONS
}

/// Look up the destination of `operation` from `from`, if the table allows it.
pub fn lookup(from: ResourceStatus, operation: OperationType) -> Option<ResourceStatus> {
    TRANSITIONS
        .iter()
        .find(|tr| tr.from == from && tr.operation == operation)
        .map(|tr| tr.to)
}

/// Status check failures. All are user-facing and not retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// The resource is on the demo-mode protection list.
    #[error("{warn_msg}: resource '{resource_id}' is protected, create your own resource to try this operation")]
    DemoProtected {
        /// Protected resource.
        resource_id: String,
        /// Configured demo-mode warning.
        warn_msg: String,
    },

    /// The gateway is in read-only mode.
    #[error("gateway is read-only, changes are not allowed")]
    ReadOnly,

    /// No legal transition exists.
    #[error("operation '{operation}' is not allowed for a resource in status '{}'", display_status(.from))]
    IllegalTransition {
        /// Current status.
        from: ResourceStatus,
        /// Requested operation.
        operation: OperationType,
    },

    /// A stored status value is not recognised.
    #[error("unknown resource status: {0}")]
    UnknownStatus(String),

    /// An operation name is not recognised.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

fn display_status(status: &ResourceStatus) -> &'static str {
    match status {
        ResourceStatus::None => "none",
        other => other.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ResourceStatus::ALL {
            assert_eq!(status.as_str().parse::<ResourceStatus>().unwrap(), status);
        }
        assert!("conflict".parse::<ResourceStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_stored_values() {
        assert_eq!(
            serde_json::to_string(&ResourceStatus::None).unwrap(),
            "\"\""
        );
        assert_eq!(
            serde_json::from_str::<ResourceStatus>("\"delete_draft\"").unwrap(),
            ResourceStatus::DeleteDraft
        );
        assert_eq!(
            serde_json::to_string(&OperationType::Publish).unwrap(),
            "\"publish\""
        );
    }

    #[test]
    fn test_table_has_no_identity_rows() {
        for tr in transitions() {
            assert_ne!(tr.from, tr.to, "identity transition in table: {:?}", tr);
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(
            lookup(ResourceStatus::None, OperationType::Create),
            Some(ResourceStatus::CreateDraft)
        );
        assert_eq!(
            lookup(ResourceStatus::CreateDraft, OperationType::Delete),
            Some(ResourceStatus::None)
        );
        assert_eq!(lookup(ResourceStatus::Success, OperationType::Create), None);
        assert_eq!(lookup(ResourceStatus::Success, OperationType::Revert), None);
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = StatusError::IllegalTransition {
            from: ResourceStatus::None,
            operation: OperationType::Delete,
        };
        assert_eq!(
            err.to_string(),
            "operation 'delete' is not allowed for a resource in status 'none'"
        );
    }

    #[test]
    fn test_snapshot_absent() {
        let snapshot = ResourceSnapshot::absent("route-1");
        assert!(snapshot.is_absent());
        assert!(!ResourceSnapshot::new("route-1", ResourceStatus::Success).is_absent());
    }
}
