//! Application configuration loaded from environment variables.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use mercato_core::ports::{BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff};
use mercato_infra::QueueServiceConfig;

#[cfg(feature = "sql")]
use mercato_infra::DatabaseConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[cfg(feature = "sql")]
    pub database: Option<DatabaseConfig>,
    /// Apply pending schema migrations on startup.
    pub run_migrations: bool,
    pub queue: QueueServiceConfig,
    pub backoff: BackoffConfig,
    /// Merge bursts of collection-filter jobs.
    pub buffer_collections: bool,
    pub maintenance: MaintenanceConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            http: HttpConfig::from_env(),
            #[cfg(feature = "sql")]
            database: DatabaseConfig::from_env(),
            run_migrations: flag("DB_RUN_MIGRATIONS", true),
            queue: QueueServiceConfig::from_env(),
            backoff: BackoffConfig::from_env(),
            buffer_collections: flag("JOB_BUFFER_COLLECTIONS", true),
            maintenance: MaintenanceConfig::from_env(),
        }
    }
}

/// Health and admin endpoint binding.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: flag("HEALTH_ENABLED", true),
            host: env::var("HEALTH_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed("HEALTH_PORT").unwrap_or(3123),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Delay before a failed job may be retried.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    pub base: Duration,
    /// Cap for exponential backoff.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Linear,
            base: Duration::from_millis(1000),
            max: Duration::from_millis(60_000),
        }
    }
}

impl BackoffConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let kind = match env::var("JOB_BACKOFF").map(|v| v.to_lowercase()).as_deref() {
            Ok("constant") => BackoffKind::Constant,
            Ok("exponential") => BackoffKind::Exponential,
            Ok("linear") | Err(_) => BackoffKind::Linear,
            Ok(other) => {
                tracing::warn!(backoff = %other, "Unknown JOB_BACKOFF, using linear");
                BackoffKind::Linear
            }
        };
        Self {
            kind,
            base: parsed("JOB_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base),
            max: parsed("JOB_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max),
        }
    }

    pub fn strategy(&self) -> Arc<dyn BackoffStrategy> {
        match self.kind {
            BackoffKind::Constant => Arc::new(ConstantBackoff(self.base)),
            BackoffKind::Linear => Arc::new(LinearBackoff { base: self.base }),
            BackoffKind::Exponential => Arc::new(ExponentialBackoff {
                base: self.base,
                max: self.max,
            }),
        }
    }
}

/// Scheduled housekeeping of the job table.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Cron expression (with seconds) for the settled-job purge.
    pub cleanup_cron: String,
    pub cleanup_older_than_days: u32,
    /// RUNNING jobs untouched for this long are requeued. `None` disables
    /// the sweep.
    pub stale_timeout: Option<Duration>,
    pub stale_sweep_cron: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_cron: "0 0 3 * * *".to_string(),
            cleanup_older_than_days: 30,
            stale_timeout: None,
            stale_sweep_cron: "0 * * * * *".to_string(),
        }
    }
}

impl MaintenanceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: flag("SCHEDULER_ENABLED", defaults.enabled),
            cleanup_cron: env::var("JOB_CLEANUP_CRON").unwrap_or(defaults.cleanup_cron),
            cleanup_older_than_days: parsed("JOB_CLEANUP_OLDER_THAN_DAYS")
                .unwrap_or(defaults.cleanup_older_than_days),
            stale_timeout: parsed("JOB_STALE_TIMEOUT_SECS").map(Duration::from_secs),
            stale_sweep_cron: env::var("JOB_STALE_SWEEP_CRON")
                .unwrap_or(defaults.stale_sweep_cron),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercato_core::Job;
    use serde_json::json;

    #[test]
    fn test_backoff_strategy_matches_kind() {
        let job = Job::new("idx", json!({}));
        let base = Duration::from_millis(100);

        let linear = BackoffConfig {
            kind: BackoffKind::Linear,
            base,
            max: Duration::from_secs(1),
        };
        assert_eq!(linear.strategy().delay("idx", 3, &job), Duration::from_millis(300));

        let exponential = BackoffConfig {
            kind: BackoffKind::Exponential,
            ..linear.clone()
        };
        assert_eq!(
            exponential.strategy().delay("idx", 4, &job),
            Duration::from_millis(800)
        );
        assert_eq!(exponential.strategy().delay("idx", 10, &job), Duration::from_secs(1));
    }

    #[test]
    fn test_maintenance_defaults() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.cleanup_older_than_days, 30);
        assert!(config.stale_timeout.is_none());
    }
}
