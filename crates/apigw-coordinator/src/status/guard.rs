// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform-level guards consulted before the transition table.

use std::collections::HashSet;

use super::{ResourceSnapshot, StatusError};

/// Default rejection prefix used in demo mode.
pub const DEFAULT_DEMO_WARN_MSG: &str = "operation not allowed in demo mode";

/// Demo-mode configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// Whether demo mode is active.
    pub enabled: bool,
    /// Message prefix returned when a protected resource is touched.
    pub warn_msg: String,
    /// Resource identifiers that may not be modified in demo mode.
    pub protected_resources: HashSet<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warn_msg: DEFAULT_DEMO_WARN_MSG.to_string(),
            protected_resources: HashSet::new(),
        }
    }
}

impl DemoConfig {
    /// Parse a `;`-separated list of protected resource ids. Blank items are skipped.
    pub fn parse_protected(list: &str) -> HashSet<String> {
        list.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether `resource_id` is protected by demo mode.
    pub fn protects(&self, resource_id: &str) -> bool {
        self.enabled && self.protected_resources.contains(resource_id)
    }
}

/// Read-only and demo-mode checks for a single request.
///
/// The guard is evaluated before the transition table, so a rejected
/// operation never reaches it. Demo protection is checked first.
#[derive(Debug, Clone, Default)]
pub struct PlatformGuard {
    read_only: bool,
    demo: Option<DemoConfig>,
}

impl PlatformGuard {
    /// Guard that allows everything.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build a guard from the demo configuration and the gateway's read-only flag.
    pub fn new(demo: &DemoConfig, read_only: bool) -> Self {
        Self {
            read_only,
            demo: demo.enabled.then(|| demo.clone()),
        }
    }

    /// Set the read-only flag.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Attach demo-mode protection.
    pub fn with_demo(mut self, demo: DemoConfig) -> Self {
        self.demo = demo.enabled.then_some(demo);
        self
    }

    /// Check the resource against all guards.
    pub fn check(&self, resource: &ResourceSnapshot) -> Result<(), StatusError> {
        if let Some(demo) = &self.demo
            && demo.protects(&resource.id)
        {
            return Err(StatusError::DemoProtected {
                resource_id: resource.id.clone(),
                warn_msg: demo.warn_msg.clone(),
            });
        }

        if self.read_only {
            return Err(StatusError::ReadOnly);
        }

        Ok(())
    }
}
