// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! APIGW Coordinator - Control-Plane Coordination for Gateway Replicas
//!
//! This crate lets a fleet of stateless API-server replicas share ownership of
//! resource lifecycle state and singleton background duties. It provides a
//! draft/publish status machine for gateway resources, leader election over
//! a coordination service, and a cron scheduler kept in sync with task
//! definitions stored in a relational database.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Business layer (HTTP handlers, ORM)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │ can_do / next_status          │ load_tasks          │ wait_for_leading
//!        ▼                               ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    apigw-coordinator (This Crate)                       │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌──────────────────────┐    │
//! │  │    Status    │   │ PeriodicScheduler │──►│    LeaderElector     │    │
//! │  │   Machine    │   │   (CronEngine)    │   │  (leader-only gate)  │    │
//! │  └──────────────┘   └─────────┬─────────┘   └──────────┬───────────┘    │
//! │                               │ dispatch               │                │
//! │                               ▼                        │                │
//! │                     ┌───────────────────┐              │                │
//! │                     │   TaskRegistry    │              │                │
//! │                     └───────────────────┘              │                │
//! └───────────────────────────────┬────────────────────────┼────────────────┘
//!                                 │                        │
//!                                 ▼                        ▼
//!                 ┌───────────────────────────┐  ┌────────────────────┐
//!                 │   PostgreSQL / SQLite     │  │        etcd        │
//!                 │     (periodic_tasks)      │  │ (leases, election) │
//!                 └───────────────────────────┘  └────────────────────┘
//! ```
//!
//! # Resource Status Transitions
//!
//! | Source | Operation | Destination |
//! |--------|-----------|-------------|
//! | (none) | create | create_draft |
//! | success | delete | delete_draft |
//! | create_draft | delete | (none) |
//! | success, update_draft | update | update_draft |
//! | create_draft | update | create_draft (no-op) |
//! | update_draft, delete_draft | revert | success |
//! | create_draft, update_draft, delete_draft | publish | success |
//!
//! Demo-mode protection and read-only mode are checked before the table.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `APIGW_DATABASE_URL` | Yes* | - | PostgreSQL or SQLite connection string |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `APIGW_ETCD_ENDPOINTS` | No | - | Comma-separated etcd endpoints |
//! | `APIGW_ELECTION_NAME` | No | `apigw` | Election name (prefix `<name>-leader-election`) |
//! | `APIGW_ELECTION_RETRY_SECS` | No | `5` | Session/campaign retry delay |
//! | `APIGW_ELECTION_SESSION_TTL_SECS` | No | `60` | Session lease TTL |
//! | `APIGW_SCHEDULER_RELOAD_CRON` | No | `*/5 * * * *` | Task reload schedule |
//! | `APIGW_SCHEDULER_LEADER_ONLY` | No | `true` | Fire periodic tasks on the leader only |
//! | `APIGW_DEMO_MODE` | No | `false` | Enable demo-mode protection |
//! | `APIGW_DEMO_MODE_WARN_MSG` | No | `operation not allowed in demo mode` | Demo rejection message |
//! | `APIGW_DEMO_PROTECT_RESOURCES` | No | - | `;`-separated protected resource ids |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`election`]: Leader election and coordination backends
//! - [`error`]: Error types for coordinator operations
//! - [`scheduler`]: Cron engine and periodic task reconciliation
//! - [`status`]: Resource status machine
//! - [`supervise`]: Panic-recovering task spawning
//! - [`tasks`]: Task registry and dispatch

#![deny(missing_docs)]

/// Database migrations for the periodic task table.
pub mod migrations;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for coordinator operations.
pub mod error;

/// Resource draft/publish status machine.
pub mod status;

/// Leader election over a coordination service.
pub mod election;

/// Panic-recovering spawn wrapper.
pub mod supervise;

/// Named task registry and fire-and-forget dispatch.
pub mod tasks;

/// Periodic task scheduling.
pub mod scheduler;

/// Embeddable runtime for apigw-coordinator.
pub mod runtime;

pub use config::Config;
pub use election::LeaderElector;
pub use error::Error;
pub use scheduler::PeriodicScheduler;
pub use status::StatusMachine;
pub use tasks::TaskRegistry;
