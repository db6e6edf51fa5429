//! Configuration for the inventory services and the sweeper.
//!
//! Loaded in layers:
//! 1. Defaults in code
//! 2. `config/{CURTAINWORKS_ENVIRONMENT}.toml` (optional)
//! 3. `CURTAINWORKS__SECTION__KEY` environment overrides

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use curtainworks_inventory::AlertPolicy;

use crate::retry::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InventoryConfig {
    /// Current environment (development, production)
    pub environment: String,
    pub reservations: ReservationSettings,
    pub alerts: AlertSettings,
    pub retry: RetrySettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReservationSettings {
    /// Hold lifetime when `reserve` is called without a TTL
    pub ttl_secs: u64,
    /// Sweeper period
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertSettings {
    /// Entries without movement for this many days are reported inactive
    pub inactivity_days: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    pub url: Option<String>,
    pub max_connections: u32,
}

impl InventoryConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("CURTAINWORKS_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Self::defaults(&environment)?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("CURTAINWORKS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Builder seeded with every default; further sources override it.
    pub fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("reservations.ttl_secs", 900)?
            .set_default("reservations.sweep_interval_secs", 60)?
            .set_default("alerts.inactivity_days", 30)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 50)?
            .set_default("retry.max_delay_ms", 1000)?
            .set_default("retry.strategy", "exponential")?
            .set_default("database.max_connections", 10)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservations.ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reservations.sweep_interval_secs)
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            inactivity_window: chrono::Duration::days(self.alerts.inactivity_days as i64),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            strategy: self.retry.strategy,
            ..RetryPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_match_documented_values() {
        let cfg: InventoryConfig = InventoryConfig::defaults("test")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.environment, "test");
        assert_eq!(cfg.reservation_ttl(), chrono::Duration::minutes(15));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.alert_policy(), AlertPolicy::default());
        assert_eq!(cfg.retry_policy().max_attempts, 3);
        assert_eq!(cfg.database.url, None);
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            [reservations]
            ttl_secs = 1

            [retry]
            strategy = "linear"

            [database]
            url = "postgres://localhost/curtainworks"
        "#;

        let cfg: InventoryConfig = InventoryConfig::defaults("test")
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.reservation_ttl(), chrono::Duration::seconds(1));
        assert_eq!(cfg.reservations.sweep_interval_secs, 60);
        assert_eq!(cfg.retry.strategy, BackoffStrategy::Linear);
        assert_eq!(
            cfg.database.url.as_deref(),
            Some("postgres://localhost/curtainworks")
        );
    }
}
