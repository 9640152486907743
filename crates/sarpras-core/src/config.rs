//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub booking: BookingConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Booking engine configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BookingConfig {
    /// Maximum simultaneously active bookings per requester
    #[serde(default = "default_max_active_bookings")]
    pub max_active_bookings: i32,

    /// How long before the start of an approved booking a pickup reminder is sent
    #[serde(default = "default_pickup_reminder")]
    pub pickup_reminder_minutes: i64,

    /// Maximum bookings handled by one sweep run
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: i64,
}

fn default_max_active_bookings() -> i32 {
    3
}

fn default_pickup_reminder() -> i64 {
    60
}

fn default_sweep_batch() -> i64 {
    500
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("booking.max_active_bookings", 3)?
            .set_default("booking.pickup_reminder_minutes", 60)?
            .set_default("booking.sweep_batch_size", 500)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with SARPRAS_ prefix
            .add_source(
                Environment::with_prefix("SARPRAS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SARPRAS").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Load `.env` (if present) and then the configuration
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load()
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_active_bookings: default_max_active_bookings(),
            pickup_reminder_minutes: default_pickup_reminder(),
            sweep_batch_size: default_sweep_batch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_booking_config() {
        let config = BookingConfig::default();
        assert_eq!(config.max_active_bookings, 3);
        assert_eq!(config.pickup_reminder_minutes, 60);
    }

    #[test]
    fn test_booking_section_is_optional() {
        let config = Config::builder()
            .set_default("database.url", "postgresql://localhost/sarpras")
            .unwrap()
            .build()
            .unwrap();

        let app: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app.booking, BookingConfig::default());
        assert_eq!(app.database.max_connections, 10);
    }
}
