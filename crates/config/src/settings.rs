//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Row store and queue database paths
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job store tuning
    #[serde(default)]
    pub queue: QueueSettings,

    /// Worker pool tuning
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Voice provider credentials and call defaults
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// AI realtime peer configuration
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.public_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("server.public_base_url".to_string()));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.worker.rate_limit_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.rate_limit_window_secs".to_string(),
                message: "window must be non-zero".to_string(),
            });
        }
        if self.queue.default_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.default_max_attempts".to_string(),
                message: "must allow at least one attempt".to_string(),
            });
        }
        if self.realtime.connect_deadline_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "realtime.connect_deadline_secs".to_string(),
                message: "deadline must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build answer and webhook
    /// URLs handed to the voice provider (e.g. "https://dial.example.com")
    #[serde(default)]
    pub public_base_url: String,

    /// Enable CORS on the control-plane API
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: String::new(),
            cors_enabled: default_true(),
        }
    }
}

/// Database paths.
///
/// The queue keeps its own keyspace, independent of the row store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Row store (leads, call events, transcripts, recordings, users)
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Job store
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
}

fn default_store_path() -> String {
    "data/dialcast.db".to_string()
}
fn default_queue_path() -> String {
    "data/dialcast-queue.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            queue_path: default_queue_path(),
        }
    }
}

/// Job store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Default retry count for a job
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Initial retry delay; doubles on every failed attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Lease duration while a job is active
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Completed jobs older than this are swept
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    /// Completed jobs beyond this count are swept, newest kept
    #[serde(default = "default_completed_retention_count")]
    pub completed_retention_count: u32,

    /// Failed jobs older than this are swept
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2_000
}
fn default_lease_ms() -> u64 {
    60_000
}
fn default_completed_retention_secs() -> u64 {
    7 * 24 * 3600
}
fn default_completed_retention_count() -> u32 {
    1_000
}
fn default_failed_retention_secs() -> u64 {
    30 * 24 * 3600
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            lease_ms: default_lease_ms(),
            completed_retention_secs: default_completed_retention_secs(),
            completed_retention_count: default_completed_retention_count(),
            failed_retention_secs: default_failed_retention_secs(),
        }
    }
}

/// Worker pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of parallel consumers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Dispatches allowed per window
    #[serde(default = "default_rate_limit_count")]
    pub rate_limit_count: u32,

    /// Rate limit window
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

fn default_concurrency() -> usize {
    5
}
fn default_rate_limit_count() -> u32 {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate_limit_count: default_rate_limit_count(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// Voice provider credentials and call defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Provider account identifier
    #[serde(default)]
    pub account_sid: String,

    /// Provider auth token (set via DIALCAST__TELEPHONY__AUTH_TOKEN)
    #[serde(default)]
    pub auth_token: String,

    /// Caller id for outbound calls
    #[serde(default)]
    pub from_number: String,

    /// Provider REST API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Record outbound calls
    #[serde(default = "default_true")]
    pub record: bool,

    /// Ring timeout before the provider gives up
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u32,
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_call_timeout_secs() -> u32 {
    30
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base_url: default_api_base_url(),
            record: default_true(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// AI realtime peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the realtime peer
    #[serde(default = "default_realtime_url")]
    pub url: String,

    /// Bearer credential (set via DIALCAST__REALTIME__API_KEY)
    #[serde(default)]
    pub api_key: String,

    /// Voice identifier sent in the session config
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Per-attempt connect deadline
    #[serde(default = "default_connect_deadline_secs")]
    pub connect_deadline_secs: u64,

    /// Session-level cap on connect/reconnect attempts
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    /// Upper bound on response tokens per turn
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_connect_deadline_secs() -> u64 {
    10
}
fn default_max_connect_attempts() -> u32 {
    3
}
fn default_max_response_tokens() -> u32 {
    4_096
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            api_key: String::new(),
            voice: default_voice(),
            connect_deadline_secs: default_connect_deadline_secs(),
            max_connect_attempts: default_max_connect_attempts(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable the Prometheus endpoint
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (DIALCAST prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("DIALCAST")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
