// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for apigw-coordinator.

use thiserror::Error;

/// Coordinator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A resource status transition was rejected.
    #[error(transparent)]
    Status(#[from] crate::status::StatusError),

    /// Coordination service operation failed.
    #[error("Coordination error: {0}")]
    Coordination(#[from] crate::election::CoordinationError),

    /// Periodic task registration failed.
    #[error("Schedule error: {0}")]
    Schedule(#[from] crate::scheduler::ScheduleError),

    /// Task lookup or invocation failed.
    #[error("Task error: {0}")]
    Task(#[from] crate::tasks::TaskError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the coordinator Error.
pub type Result<T> = std::result::Result<T, Error>;
