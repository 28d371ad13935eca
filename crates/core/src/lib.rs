//! # Signage Gateway Core
//!
//! Shared building blocks for the signage gateway: domain models, the error
//! taxonomy used across coordinator and player agent, configuration loading,
//! retry utilities, release version ordering, and the in-process event bus.
//!
//! ## Modules
//!
//! - `models`: Domain records for devices, content, broadcasts, and updates
//! - `error`: Error taxonomy and HTTP response mapping
//! - `config`: Environment-based configuration loading and validation
//! - `version`: Release version parsing and ordering
//! - `retry`: Exponential backoff retry utilities
//! - `events`: Advisory event bus published after state mutations

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod retry;
pub mod version;

pub use config::{load_dotenv, parse_env_var, ConfigLoader, DatabaseConfig, ServiceConfig};
pub use error::SignageError;
pub use events::{EventBus, GatewayEvent};
pub use models::{broadcast, content, device, update};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use version::ReleaseVersion;

/// Result type alias for signage gateway operations
pub type Result<T> = std::result::Result<T, SignageError>;
