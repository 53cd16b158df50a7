use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const CONFIG_DIR: &str = "config";

/// Application configuration.
///
/// Layered from `config/default.toml`, an optional per-environment file, and
/// `FULFILLMENT_`-prefixed environment variables (highest precedence).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (Postgres in production, SQLite in tests).
    pub database_url: String,

    /// Runtime environment name (development, test, production).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level filter for the tracing subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum database connections in the pool.
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// Minimum database connections in the pool.
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Minutes a stock lock stays reservable before it expires.
    #[serde(default = "default_lock_timeout_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub lock_timeout_minutes: i64,

    /// Interval (minutes) at which the cron collaborator is expected to run
    /// the expiry sweep. Informational: the crate exposes the sweep as a
    /// plain callable and owns no timer.
    #[serde(default = "default_sweep_interval_minutes")]
    #[validate(range(min = 1))]
    pub lock_sweep_interval_minutes: u64,

    /// Variance ratio at or above which a count difference opens a
    /// discrepancy.
    #[serde(default = "default_variance_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub variance_threshold: f64,

    /// Default order cap per pick batch.
    #[serde(default = "default_max_orders_per_batch")]
    #[validate(range(min = 1))]
    pub max_orders_per_batch: u32,

    /// Default summed-item cap per pick batch.
    #[serde(default = "default_max_items_per_batch")]
    #[validate(range(min = 1))]
    pub max_items_per_batch: u32,

    /// How many high-drift (sku, bin) pairs a generated cycle count seeds.
    #[serde(default = "default_cycle_count_items")]
    #[validate(range(min = 1))]
    pub cycle_count_items: u64,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_lock_timeout_minutes() -> i64 {
    30
}

fn default_sweep_interval_minutes() -> u64 {
    15
}

fn default_variance_threshold() -> f64 {
    0.05
}

fn default_max_orders_per_batch() -> u32 {
    8
}

fn default_max_items_per_batch() -> u32 {
    50
}

fn default_cycle_count_items() -> u64 {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            environment: default_environment(),
            log_level: default_log_level(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            lock_timeout_minutes: default_lock_timeout_minutes(),
            lock_sweep_interval_minutes: default_sweep_interval_minutes(),
            variance_threshold: default_variance_threshold(),
            max_orders_per_batch: default_max_orders_per_batch(),
            max_items_per_batch: default_max_items_per_batch(),
            cycle_count_items: default_cycle_count_items(),
        }
    }
}

impl AppConfig {
    /// Minimal constructor for tests and embedded use.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("FULFILLMENT_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(
                File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false),
            )
            .add_source(Environment::with_prefix("FULFILLMENT").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid configuration: {}", e)))?;

        info!(
            environment = %app_config.environment,
            lock_timeout_minutes = app_config.lock_timeout_minutes,
            "Configuration loaded"
        );

        Ok(app_config)
    }

    pub fn lock_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lock_timeout_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_sweep_interval_minutes * 60)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_warehouse_policy() {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        assert_eq!(cfg.lock_timeout(), chrono::Duration::minutes(30));
        assert_eq!(cfg.lock_sweep_interval_minutes, 15);
        assert!((cfg.variance_threshold - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.max_orders_per_batch, 8);
        assert_eq!(cfg.max_items_per_batch, 50);
        assert!(!cfg.is_production());
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let cfg = AppConfig {
            lock_timeout_minutes: 0,
            ..AppConfig::new("sqlite::memory:", "test")
        };
        assert!(cfg.validate().is_err());
    }
}
