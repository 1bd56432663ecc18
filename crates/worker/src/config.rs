//! Export worker configuration

use std::env;

/// Log output format for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Worker configuration loaded from environment variables.
///
/// Detail assembly settings (link base, deadline, bulk limit) are read by
/// `DetailConfig::from_env` in the billing crate.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Logging
    pub log_format: LogFormat,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: match env::var("DATABASE_MAX_CONNECTIONS") {
                Ok(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", raw))?,
                Err(_) => 5,
            },
            log_format: match env::var("LOG_FORMAT") {
                Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::Invalid("LOG_FORMAT", raw)),
                },
                Err(_) => LogFormat::Json,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
