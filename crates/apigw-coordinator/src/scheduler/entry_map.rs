// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task id to cron entry mapping.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::EntryId;

/// Process-local map from periodic task id to its engine entry.
///
/// Reads take the shared lock, writes the exclusive one. Never persisted.
#[derive(Debug, Default)]
pub struct TaskEntryMap {
    mapping: RwLock<HashMap<i64, EntryId>>,
}

impl TaskEntryMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry registered for `task_id`.
    pub fn get(&self, task_id: i64) -> Option<EntryId> {
        self.mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .copied()
    }

    /// Record the entry for `task_id`.
    pub fn set(&self, task_id: i64, entry_id: EntryId) {
        self.mapping
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id, entry_id);
    }

    /// Forget `task_id`.
    pub fn delete(&self, task_id: i64) {
        self.mapping
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
    }

    /// Registered task ids, sorted.
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
