// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for apigw-coordinator.

use std::env;
use std::time::Duration;

use crate::election::ElectionConfig;
use crate::scheduler::SchedulerConfig;
use crate::status::{DEFAULT_DEMO_WARN_MSG, DemoConfig};

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database holding periodic task definitions (`postgres://` or `sqlite:`)
    pub database_url: String,
    /// Leader election settings
    pub election: ElectionConfig,
    /// Periodic scheduler settings
    pub scheduler: SchedulerConfig,
    /// Demo-mode resource protection
    pub demo: DemoConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("APIGW_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("APIGW_DATABASE_URL or DATABASE_URL"))?;

        let election_defaults = ElectionConfig::default();
        let election = ElectionConfig {
            name: env::var("APIGW_ELECTION_NAME").unwrap_or(election_defaults.name),
            retry_interval: secs_var("APIGW_ELECTION_RETRY_SECS")?
                .unwrap_or(election_defaults.retry_interval),
            session_ttl: secs_var("APIGW_ELECTION_SESSION_TTL_SECS")?
                .unwrap_or(election_defaults.session_ttl),
            etcd_endpoints: env::var("APIGW_ETCD_ENDPOINTS")
                .map(|v| parse_endpoints(&v))
                .unwrap_or_default(),
        };

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            reload_cron: env::var("APIGW_SCHEDULER_RELOAD_CRON")
                .unwrap_or(scheduler_defaults.reload_cron),
            leader_only: bool_var("APIGW_SCHEDULER_LEADER_ONLY")?
                .unwrap_or(scheduler_defaults.leader_only),
        };

        let demo = DemoConfig {
            enabled: bool_var("APIGW_DEMO_MODE")?.unwrap_or(false),
            warn_msg: env::var("APIGW_DEMO_MODE_WARN_MSG")
                .unwrap_or_else(|_| DEFAULT_DEMO_WARN_MSG.to_string()),
            protected_resources: env::var("APIGW_DEMO_PROTECT_RESOURCES")
                .map(|v| DemoConfig::parse_protected(&v))
                .unwrap_or_default(),
        };

        Ok(Self {
            database_url,
            election,
            scheduler,
            demo,
        })
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
}

fn parse_endpoints(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn secs_var(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue(key, "a positive number of seconds")),
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        },
        Err(_) => Ok(None),
    }
}

fn bool_var(key: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue(key, "true or false")),
        },
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: expected {1}")]
    InvalidValue(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 11] = [
        "APIGW_DATABASE_URL",
        "DATABASE_URL",
        "APIGW_ETCD_ENDPOINTS",
        "APIGW_ELECTION_NAME",
        "APIGW_ELECTION_RETRY_SECS",
        "APIGW_ELECTION_SESSION_TTL_SECS",
        "APIGW_SCHEDULER_RELOAD_CRON",
        "APIGW_SCHEDULER_LEADER_ONLY",
        "APIGW_DEMO_MODE",
        "APIGW_DEMO_MODE_WARN_MSG",
        "APIGW_DEMO_PROTECT_RESOURCES",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("APIGW_DATABASE_URL", "postgres://localhost/apigw");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/apigw");
        assert!(!config.is_sqlite());
        assert_eq!(config.election.name, "apigw");
        assert_eq!(config.election.prefix(), "apigw-leader-election");
        assert_eq!(config.election.retry_interval, Duration::from_secs(5));
        assert_eq!(config.election.session_ttl, Duration::from_secs(60));
        assert!(config.election.etcd_endpoints.is_empty());
        assert_eq!(config.scheduler.reload_cron, "*/5 * * * *");
        assert!(config.scheduler.leader_only);
        assert!(!config.demo.enabled);
        assert_eq!(config.demo.warn_msg, DEFAULT_DEMO_WARN_MSG);
    }

    #[test]
    fn test_config_database_url_fallback() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("DATABASE_URL", "sqlite::memory:");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.is_sqlite());
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_config_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("APIGW_DATABASE_URL", "sqlite:apigw.db");
        guard.set("APIGW_ETCD_ENDPOINTS", "http://etcd-0:2379, http://etcd-1:2379,");
        guard.set("APIGW_ELECTION_NAME", "gw-east");
        guard.set("APIGW_ELECTION_RETRY_SECS", "2");
        guard.set("APIGW_SCHEDULER_LEADER_ONLY", "false");
        guard.set("APIGW_DEMO_MODE", "1");
        guard.set("APIGW_DEMO_PROTECT_RESOURCES", "route-1;svc-2");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.election.etcd_endpoints,
            vec!["http://etcd-0:2379".to_string(), "http://etcd-1:2379".to_string()]
        );
        assert_eq!(config.election.prefix(), "gw-east-leader-election");
        assert_eq!(config.election.retry_interval, Duration::from_secs(2));
        assert!(!config.scheduler.leader_only);
        assert!(config.demo.enabled);
        assert!(config.demo.protects("svc-2"));
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("APIGW_DATABASE_URL", "postgres://localhost/apigw");
        guard.set("APIGW_ELECTION_RETRY_SECS", "0");

        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("APIGW_ELECTION_RETRY_SECS", _))
        ));

        guard.set("APIGW_ELECTION_RETRY_SECS", "5");
        guard.set("APIGW_DEMO_MODE", "maybe");
        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("APIGW_DEMO_MODE", _))
        ));
    }
}
