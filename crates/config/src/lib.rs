//! Configuration for the dialcast engine
//!
//! Settings load from `config/default.yaml`, an optional environment file,
//! and `DIALCAST__`-prefixed environment variables, in that order of
//! increasing precedence.

pub mod settings;

pub use settings::{
    load_settings, DatabaseConfig, ObservabilityConfig, QueueSettings, RealtimeConfig,
    ServerConfig, Settings, TelephonyConfig, WorkerSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(String),
}
