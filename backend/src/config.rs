//! Configuration for the Metal Recovery Platform core
//!
//! Settings are resolved in three layers, later layers winning:
//! coded defaults, then an optional per-environment TOML file under
//! `config/`, then `MRP_`-prefixed environment variables.

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level settings consumed by `AppState::initialize`
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Active environment name ("development" or "production")
    pub environment: String,

    /// Connection pool settings
    pub database: DatabaseConfig,

    /// Refining business defaults
    pub refining: RefiningConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL URL, required (no coded default)
    pub url: String,

    /// Pool size ceiling
    pub max_connections: u32,

    /// Connections kept warm
    pub min_connections: u32,

    /// Seconds to wait for a free connection before giving up
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefiningConfig {
    /// Expected processing break, a fraction in [0, 1]
    pub default_break_percent: Decimal,

    /// Refinery service fee, a fraction in [0, 1]
    pub default_service_fee_percent: Decimal,

    /// Days until a new metal receivable falls due
    pub receivable_due_days: i64,
}

impl Config {
    /// Resolve settings from defaults, file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("MRP_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("refining.default_break_percent", "0.05")?
            .set_default("refining.default_service_fee_percent", "0.20")?
            .set_default("refining.receivable_due_days", 7)?
            // config/development.toml, config/production.toml
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(
                Environment::with_prefix("MRP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for RefiningConfig {
    fn default() -> Self {
        Self {
            default_break_percent: Decimal::new(5, 2),
            default_service_fee_percent: Decimal::new(20, 2),
            receivable_due_days: 7,
        }
    }
}
