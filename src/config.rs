use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level for this crate when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database URL. Documents are kept in memory when unset.
    pub db_url: Option<String>,

    /// Outbound events buffered per session before it is skipped
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    /// Chat messages kept per room for late joiners
    #[serde(default = "default_chat_history_limit")]
    pub chat_history_limit: usize,

    /// Largest inbound WebSocket message or frame, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Seconds an unused per-document load guard is kept
    #[serde(default = "default_lock_idle_secs")]
    pub lock_idle_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lock_idle(&self) -> Duration {
        Duration::from_secs(self.lock_idle_secs)
    }

    /// Configured CORS origins, empty when any origin is allowed
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Tracing directives used when `RUST_LOG` is not set
    pub fn default_log_filter(&self) -> String {
        format!("doc_relay={},tower_http=debug,axum::rejection=trace,info", self.log_level)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            cors_origins: None,
            db_url: None,
            session_queue_capacity: default_session_queue_capacity(),
            chat_history_limit: default_chat_history_limit(),
            max_message_bytes: default_max_message_bytes(),
            lock_idle_secs: default_lock_idle_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_session_queue_capacity() -> usize {
    256
}

fn default_chat_history_limit() -> usize {
    200
}

fn default_lock_idle_secs() -> u64 {
    300
}
