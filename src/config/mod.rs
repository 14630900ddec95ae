//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database password is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;

const DEFAULT_SQL_PORT: u16 = 5432;

/// Connection parameters for the registry database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    /// Worker groups installed on this host. `None` when the variable is unset,
    /// which is distinct from an explicitly empty list.
    pub installed_groups: Option<Vec<String>>,
    pub log: LogConfig,
}

/// Logging and telemetry settings. Every field is optional, so commands
/// that never touch the registry can load these alone.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("SQL_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("SQL_PORT is not a valid port: {raw}")))?,
            Err(_) => DEFAULT_SQL_PORT,
        };

        Ok(Self {
            store: StoreConfig {
                host: required_var("SQL_HOST")?,
                port,
                user: required_var("SQL_USER")?,
                password: SecretString::from(required_var("SQL_PASSWORD")?),
                database: required_var("SQL_DB")?,
            },
            installed_groups: std::env::var("DAEMONIZER_INSTALLED_GROUPS")
                .ok()
                .map(|raw| parse_group_list(&raw)),
            log: LogConfig::from_env(),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Split a comma-separated group list, dropping blanks.
pub fn parse_group_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
