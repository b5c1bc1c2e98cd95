//! Configuration loaded from the environment.
//!
//! A `.env` file in the working directory is honored (values already set in
//! the process environment win).

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::models::database::ConnectInfo;

const DEFAULT_WORK_DIR: &str = "./data";

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name used in logs.
    pub service_name: String,
    /// Root directory under which each connector keeps its working directory.
    pub work_dir: PathBuf,
    /// MySQL URL of the metadata store; the in-memory store is used when unset.
    pub metadata_url: Option<String>,
    /// Timeout for establishing a physical connection.
    pub connect_timeout_secs: u64,
    /// Upper bound of pooled connections per registered database.
    pub max_connections: u32,
    /// Age after which a cached connection is considered stale.
    pub max_connection_age_secs: u64,
    /// Connection attempts before giving up.
    pub connect_retries: u32,
    /// Backoff before the second attempt; doubled for each further attempt.
    pub retry_base_delay_ms: u64,
    /// Query timeout applied when the caller does not supply one.
    pub default_query_timeout_secs: u64,
    /// Period of the stale-connection sweep.
    pub eviction_interval_secs: u64,
    /// Register the database described by `MYSQL_*` variables on start.
    pub bootstrap_default_database: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "connection-service".to_string(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            metadata_url: None,
            connect_timeout_secs: 10,
            max_connections: 5,
            max_connection_age_secs: 3600,
            connect_retries: 3,
            retry_base_delay_ms: 1000,
            default_query_timeout_secs: 60,
            eviction_interval_secs: 300,
            bootstrap_default_database: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        // Missing .env is not an error
        let _ = dotenvy::dotenv();
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring invalid numeric setting");
                    None
                }
            }
        };

        Self {
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| service_name.to_string()),
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            metadata_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            connect_timeout_secs: parsed("DB_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            max_connections: parsed("DB_MAX_CONNECTIONS")
                .map(|v| v.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_connections),
            max_connection_age_secs: parsed("DB_MAX_CONNECTION_AGE_SECS")
                .unwrap_or(defaults.max_connection_age_secs),
            connect_retries: parsed("DB_CONNECT_RETRIES")
                .map(|v| v.clamp(1, 10) as u32)
                .unwrap_or(defaults.connect_retries),
            retry_base_delay_ms: parsed("DB_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay_ms),
            default_query_timeout_secs: parsed("QUERY_DEFAULT_TIMEOUT_SECS")
                .map(|v| v.clamp(1, 600))
                .unwrap_or(defaults.default_query_timeout_secs),
            eviction_interval_secs: parsed("EVICTION_INTERVAL_SECS")
                .map(|v| v.max(1))
                .unwrap_or(defaults.eviction_interval_secs),
            bootstrap_default_database: lookup("BOOTSTRAP_DEFAULT_DATABASE")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.bootstrap_default_database),
        }
    }

    /// Returns the slice of configuration each connector needs.
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_connections: self.max_connections,
            max_connection_age: Duration::from_secs(self.max_connection_age_secs),
            connect_retries: self.connect_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            default_query_timeout: Duration::from_secs(self.default_query_timeout_secs),
        }
    }
}

/// Connection lifecycle settings of a single connector.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub connect_timeout: Duration,
    pub max_connections: u32,
    pub max_connection_age: Duration,
    pub connect_retries: u32,
    pub retry_base_delay: Duration,
    pub default_query_timeout: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        AppConfig::default().connector_settings()
    }
}

impl ConnectorSettings {
    /// Delay to wait after the failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Connection defaults for the bootstrap single-database mode.
///
/// Only read when a database is registered without explicit connect info,
/// so a missing variable fails the first use rather than process start.
#[derive(Debug, Clone)]
pub struct DefaultDatabaseConfig {
    pub connect_info: ConnectInfo,
    pub description: String,
}

impl DefaultDatabaseConfig {
    /// Reads `MYSQL_*` variables from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the defaults through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
                AppError::Configuration(format!(
                    "MySQL configuration missing required key: {key}"
                ))
            })
        };

        let host = required("MYSQL_HOST")?;
        let username = required("MYSQL_USER")?;
        let password = required("MYSQL_PASSWORD")?;
        let database = required("MYSQL_DATABASE")?;
        let port = match lookup("MYSQL_PORT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AppError::Configuration(format!("MYSQL_PORT is not a valid port: {raw}"))
            })?,
            None => ConnectInfo::DEFAULT_PORT,
        };
        let charset = lookup("MYSQL_CHARSET")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| ConnectInfo::DEFAULT_CHARSET.to_string());
        let description = lookup("MYSQL_DATABASE_DESCRIPTION")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "Default MySQL database".to_string());

        Ok(Self {
            connect_info: ConnectInfo {
                host,
                username,
                password,
                database,
                port,
                charset,
            },
            description,
        })
    }
}
