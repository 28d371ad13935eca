//! Player agent configuration
//!
//! # Environment Variables
//!
//! - `SIGNAGE_COORDINATOR_URL` (required): base URL of the coordinator
//! - `SIGNAGE_DEVICE_NAME` (default: hostname-like "signage-player")
//! - `SIGNAGE_DEVICE_SERIAL` (required): hardware serial used at registration
//! - `SIGNAGE_DATA_DIR` (default: "./data"): identity file and cache root
//! - `SIGNAGE_PLAYER_COMMAND` (default: "mpv"): media player binary
//! - `SIGNAGE_SOFTWARE_VERSION` (default: crate version): version reported upstream
//! - `SIGNAGE_INSTALL_COMMAND` (optional): invoked with a verified update artifact
//! - `SIGNAGE_SCREENSHOT_COMMAND` (default: "scrot"): invoked with an output path
//! - `SIGNAGE_HEARTBEAT_SECS` (default: 60)
//! - `SIGNAGE_CONTENT_SYNC_SECS` (default: 300)
//! - `SIGNAGE_CONFIG_POLL_SECS` (default: 30)
//! - `SIGNAGE_EMERGENCY_POLL_SECS` (default: 10)
//! - `SIGNAGE_UPDATE_CHECK_SECS` (default: 3600)

use std::path::PathBuf;
use std::time::Duration;

use signage_gateway_core::config::{parse_env_var, ConfigLoader};
use signage_gateway_core::version::ReleaseVersion;
use signage_gateway_core::SignageError;
use url::Url;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub coordinator_url: String,
    pub device_name: String,
    pub device_serial: String,
    pub data_dir: PathBuf,
    pub player_command: String,
    pub software_version: ReleaseVersion,
    pub install_command: Option<String>,
    pub screenshot_command: String,
    pub heartbeat_interval: Duration,
    pub content_sync_interval: Duration,
    pub config_poll_interval: Duration,
    pub emergency_poll_interval: Duration,
    pub update_check_interval: Duration,
}

impl AgentConfig {
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("updates")
    }
}

impl ConfigLoader for AgentConfig {
    fn from_env() -> Result<Self, SignageError> {
        let coordinator_url =
            std::env::var("SIGNAGE_COORDINATOR_URL").map_err(|_| SignageError::Configuration {
                message: "SIGNAGE_COORDINATOR_URL must be set".to_string(),
                key: Some("SIGNAGE_COORDINATOR_URL".to_string()),
            })?;
        let device_serial =
            std::env::var("SIGNAGE_DEVICE_SERIAL").map_err(|_| SignageError::Configuration {
                message: "SIGNAGE_DEVICE_SERIAL must be set".to_string(),
                key: Some("SIGNAGE_DEVICE_SERIAL".to_string()),
            })?;

        let device_name = std::env::var("SIGNAGE_DEVICE_NAME")
            .unwrap_or_else(|_| "signage-player".to_string());
        let data_dir = std::env::var("SIGNAGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let player_command =
            std::env::var("SIGNAGE_PLAYER_COMMAND").unwrap_or_else(|_| "mpv".to_string());
        let software_version = match std::env::var("SIGNAGE_SOFTWARE_VERSION") {
            Ok(raw) => raw
                .parse::<ReleaseVersion>()
                .map_err(|e| SignageError::Configuration {
                    message: format!("Invalid software version: {}", e),
                    key: Some("SIGNAGE_SOFTWARE_VERSION".to_string()),
                })?,
            Err(_) => env!("CARGO_PKG_VERSION")
                .parse::<ReleaseVersion>()
                .map_err(|e| SignageError::Configuration {
                    message: format!("Invalid crate version: {}", e),
                    key: None,
                })?,
        };
        let install_command = std::env::var("SIGNAGE_INSTALL_COMMAND").ok();
        let screenshot_command =
            std::env::var("SIGNAGE_SCREENSHOT_COMMAND").unwrap_or_else(|_| "scrot".to_string());

        Ok(Self {
            coordinator_url,
            device_name,
            device_serial,
            data_dir,
            player_command,
            software_version,
            install_command,
            screenshot_command,
            heartbeat_interval: Duration::from_secs(parse_env_var("SIGNAGE_HEARTBEAT_SECS", 60u64)?),
            content_sync_interval: Duration::from_secs(parse_env_var(
                "SIGNAGE_CONTENT_SYNC_SECS",
                300u64,
            )?),
            config_poll_interval: Duration::from_secs(parse_env_var(
                "SIGNAGE_CONFIG_POLL_SECS",
                30u64,
            )?),
            emergency_poll_interval: Duration::from_secs(parse_env_var(
                "SIGNAGE_EMERGENCY_POLL_SECS",
                10u64,
            )?),
            update_check_interval: Duration::from_secs(parse_env_var(
                "SIGNAGE_UPDATE_CHECK_SECS",
                3600u64,
            )?),
        })
    }

    fn validate(&self) -> Result<(), SignageError> {
        Url::parse(&self.coordinator_url).map_err(|e| SignageError::Configuration {
            message: format!("Invalid coordinator URL: {}", e),
            key: Some("SIGNAGE_COORDINATOR_URL".to_string()),
        })?;

        if self.device_serial.trim().is_empty() {
            return Err(SignageError::Configuration {
                message: "device serial must not be empty".to_string(),
                key: Some("SIGNAGE_DEVICE_SERIAL".to_string()),
            });
        }

        for (name, interval) in [
            ("SIGNAGE_HEARTBEAT_SECS", self.heartbeat_interval),
            ("SIGNAGE_CONTENT_SYNC_SECS", self.content_sync_interval),
            ("SIGNAGE_CONFIG_POLL_SECS", self.config_poll_interval),
            ("SIGNAGE_EMERGENCY_POLL_SECS", self.emergency_poll_interval),
            ("SIGNAGE_UPDATE_CHECK_SECS", self.update_check_interval),
        ] {
            if interval.as_secs() == 0 {
                return Err(SignageError::Configuration {
                    message: format!("{} must be greater than 0", name),
                    key: Some(name.to_string()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            coordinator_url: "http://localhost:8090".to_string(),
            device_name: "lobby".to_string(),
            device_serial: "RPI-001".to_string(),
            data_dir: PathBuf::from("./data"),
            player_command: "mpv".to_string(),
            software_version: ReleaseVersion::new(1, 0, 0),
            install_command: None,
            screenshot_command: "scrot".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            content_sync_interval: Duration::from_secs(300),
            config_poll_interval: Duration::from_secs(30),
            emergency_poll_interval: Duration::from_secs(10),
            update_check_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn bad_url_rejected() {
        let mut c = config();
        c.coordinator_url = "not a url".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut c = config();
        c.emergency_poll_interval = Duration::from_secs(0);
        assert!(c.validate().is_err());
    }
}
