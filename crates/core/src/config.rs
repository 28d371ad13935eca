//! Configuration loading for signage gateway services
//!
//! Every setting comes from the environment (with `.env` picked up through
//! dotenvy) under the `SIGNAGE_` prefix; the common deployment variables
//! (`DATABASE_URL`, `PORT`, `RUST_LOG`) work unprefixed as fallbacks.
//! Loading and validation are separate steps so a service can fail fast on
//! bad values before it binds anything.

use crate::error::SignageError;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Standardized load-then-validate lifecycle for service configuration.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, applying defaults for
    /// missing optional values.
    fn from_env() -> Result<Self, SignageError>;

    /// Validate configuration values (URL formats, port ranges, timeouts).
    fn validate(&self) -> Result<(), SignageError>;
}

/// Connection pool settings for the coordinator's Postgres store
///
/// # Environment Variables
///
/// - `SIGNAGE_DATABASE_URL` (required, falls back to `DATABASE_URL`)
/// - `SIGNAGE_DATABASE_MAX_CONNECTIONS` (default: 20)
/// - `SIGNAGE_DATABASE_MIN_CONNECTIONS` (default: 2)
/// - `SIGNAGE_DATABASE_CONNECT_TIMEOUT` seconds (default: 30)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/signage_gateway".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, SignageError> {
        let url = std::env::var("SIGNAGE_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| SignageError::Configuration {
                message: "DATABASE_URL or SIGNAGE_DATABASE_URL must be set".to_string(),
                key: Some("SIGNAGE_DATABASE_URL".to_string()),
            })?;

        let max_connections = parse_env_var(
            "SIGNAGE_DATABASE_MAX_CONNECTIONS",
            DatabaseConfig::default().max_connections,
        )?;

        let min_connections = parse_env_var(
            "SIGNAGE_DATABASE_MIN_CONNECTIONS",
            DatabaseConfig::default().min_connections,
        )?;

        let connect_timeout_secs = parse_env_var("SIGNAGE_DATABASE_CONNECT_TIMEOUT", 30u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), SignageError> {
        Url::parse(&self.url).map_err(|e| SignageError::Configuration {
            message: format!("Invalid DATABASE_URL: {}", e),
            key: Some("SIGNAGE_DATABASE_URL".to_string()),
        })?;

        if self.max_connections == 0 {
            return Err(SignageError::Configuration {
                message: "max_connections must be greater than 0".to_string(),
                key: Some("SIGNAGE_DATABASE_MAX_CONNECTIONS".to_string()),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(SignageError::Configuration {
                message: format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                key: Some("SIGNAGE_DATABASE_MIN_CONNECTIONS".to_string()),
            });
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(SignageError::Configuration {
                message: "connect_timeout must be greater than 0 seconds".to_string(),
                key: Some("SIGNAGE_DATABASE_CONNECT_TIMEOUT".to_string()),
            });
        }

        Ok(())
    }
}

/// HTTP service configuration for the coordinator
///
/// # Environment Variables
///
/// - `SIGNAGE_SERVICE_HOST` (default: "0.0.0.0")
/// - `SIGNAGE_SERVICE_PORT` (default: 8090, falls back to `PORT`)
/// - `SIGNAGE_SERVICE_WORKERS` (default: CPU count)
/// - `SIGNAGE_SERVICE_LOG_LEVEL` (default: "info", falls back to `RUST_LOG`)
/// - `SIGNAGE_OFFLINE_TIMEOUT_SECS` (default: 300): presence staleness bound
/// - `SIGNAGE_SWEEP_INTERVAL_SECS` (default: 5): broadcast lifecycle sweep
/// - `SIGNAGE_MEDIA_DIR` (default: "./media"): video files served to devices
/// - `SIGNAGE_SCREENSHOT_DIR` (default: "./screenshots"): uploaded screenshots
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub log_level: String,
    /// Devices with `last_seen` older than this are reported offline
    pub offline_timeout: Duration,
    /// Interval of the broadcast activation/expiry sweep
    pub sweep_interval: Duration,
    pub media_dir: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            workers: num_cpus::get(),
            log_level: "info".to_string(),
            offline_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
            media_dir: PathBuf::from("./media"),
            screenshot_dir: PathBuf::from("./screenshots"),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, SignageError> {
        let host = std::env::var("SIGNAGE_SERVICE_HOST")
            .unwrap_or_else(|_| ServiceConfig::default().host);

        let port = parse_env_var("SIGNAGE_SERVICE_PORT", ServiceConfig::default().port)
            .or_else(|_| parse_env_var("PORT", ServiceConfig::default().port))?;

        let workers = parse_env_var("SIGNAGE_SERVICE_WORKERS", ServiceConfig::default().workers)?;

        let log_level = std::env::var("SIGNAGE_SERVICE_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| ServiceConfig::default().log_level);

        let offline_timeout_secs = parse_env_var("SIGNAGE_OFFLINE_TIMEOUT_SECS", 300u64)?;
        let sweep_interval_secs = parse_env_var("SIGNAGE_SWEEP_INTERVAL_SECS", 5u64)?;

        let media_dir = std::env::var("SIGNAGE_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| ServiceConfig::default().media_dir);
        let screenshot_dir = std::env::var("SIGNAGE_SCREENSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| ServiceConfig::default().screenshot_dir);

        Ok(Self {
            host,
            port,
            workers,
            log_level,
            offline_timeout: Duration::from_secs(offline_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            media_dir,
            screenshot_dir,
        })
    }

    fn validate(&self) -> Result<(), SignageError> {
        if self.port == 0 {
            return Err(SignageError::Configuration {
                message: "port must be greater than 0".to_string(),
                key: Some("SIGNAGE_SERVICE_PORT".to_string()),
            });
        }

        if self.workers == 0 {
            return Err(SignageError::Configuration {
                message: "workers must be greater than 0".to_string(),
                key: Some("SIGNAGE_SERVICE_WORKERS".to_string()),
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(SignageError::Configuration {
                message: format!(
                    "Invalid log_level '{}'. Must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
                key: Some("SIGNAGE_SERVICE_LOG_LEVEL".to_string()),
            });
        }

        if self.offline_timeout.as_secs() == 0 {
            return Err(SignageError::Configuration {
                message: "offline_timeout must be greater than 0 seconds".to_string(),
                key: Some("SIGNAGE_OFFLINE_TIMEOUT_SECS".to_string()),
            });
        }

        if self.sweep_interval.as_secs() == 0 {
            return Err(SignageError::Configuration {
                message: "sweep_interval must be greater than 0 seconds".to_string(),
                key: Some("SIGNAGE_SWEEP_INTERVAL_SECS".to_string()),
            });
        }

        Ok(())
    }
}

/// Read one environment variable, falling back to `default` when unset.
///
/// A variable that is set but does not parse is a `Configuration` error,
/// never a silent fallback.
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, SignageError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| SignageError::Configuration {
            message: format!("could not parse {}: {}", key, e),
            key: Some(key.to_string()),
        }),
        Err(_) => Ok(default),
    }
}

/// Pull in a `.env` file when one exists. Running without one is normal;
/// anything else (unreadable file, bad syntax) gets a stderr warning since
/// no logger is up yet.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn set_test_env(key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn clear_test_env(key: &str) {
        env::remove_var(key);
    }

    #[test]
    fn database_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn database_config_from_env() {
        set_test_env("SIGNAGE_DATABASE_URL", "postgresql://localhost/test");
        set_test_env("SIGNAGE_DATABASE_MAX_CONNECTIONS", "50");

        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.url, "postgresql://localhost/test");
        assert_eq!(config.max_connections, 50);

        clear_test_env("SIGNAGE_DATABASE_URL");
        clear_test_env("SIGNAGE_DATABASE_MAX_CONNECTIONS");
    }

    #[test]
    fn database_config_rejects_invalid_url() {
        let config = DatabaseConfig {
            url: "not-a-valid-url".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_config_rejects_min_over_max() {
        let config = DatabaseConfig {
            url: "postgresql://localhost/test".to_string(),
            min_connections: 30,
            max_connections: 20,
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn service_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.port, 8090);
        assert_eq!(config.offline_timeout, Duration::from_secs(300));
        assert!(config.workers > 0);
    }

    #[test]
    fn service_config_rejects_bad_log_level() {
        let config = ServiceConfig {
            log_level: "verbose".to_string(),
            ..ServiceConfig::default()
        };
        let result = config.validate();
        assert!(result.is_err());
        match result.unwrap_err() {
            SignageError::Configuration { message, .. } => {
                assert!(message.contains("Invalid log_level"));
            }
            other => panic!("expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn service_config_rejects_zero_offline_timeout() {
        let config = ServiceConfig {
            offline_timeout: Duration::from_secs(0),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_env_var_uses_default_when_unset() {
        let result: u32 = parse_env_var("SIGNAGE_TEST_MISSING_VAR", 42).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn parse_env_var_rejects_garbage() {
        set_test_env("SIGNAGE_TEST_BAD_VAR", "not-a-number");
        let result: Result<u32, _> = parse_env_var("SIGNAGE_TEST_BAD_VAR", 42);
        assert!(result.is_err());
        clear_test_env("SIGNAGE_TEST_BAD_VAR");
    }
}
