//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use taskwatch_ws::{ConnectionConfig, SamplerConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TASKWATCH_CONFIG";
/// Environment variable carrying the auth token.
pub const TOKEN_ENV: &str = "TASKWATCH_TOKEN";
/// Config file used when neither the flag nor the env var is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Origin of the dashboard the tasks live on.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub sampler: SamplerSettings,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            websocket: WsConfig::default(),
            sampler: SamplerSettings::default(),
        }
    }
}

/// `[websocket]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Retries between two successful opens. Default: 5.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First backoff delay (ms). Default: 3000.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff ceiling (ms). Default: 30000.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Ping period while open (ms). Default: 30000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    3000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30000
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl From<WsConfig> for ConnectionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            server_url: String::new(), // Set separately from AppConfig::server_url
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.reconnect_max_delay_ms,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
        }
    }
}

/// `[sampler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerSettings {
    #[serde(default = "default_sampler_enabled")]
    pub enabled: bool,
    /// Sampling period (ms). Default: 1000.
    #[serde(default = "default_sampler_interval_ms")]
    pub interval_ms: u64,
}

fn default_sampler_enabled() -> bool {
    true
}

fn default_sampler_interval_ms() -> u64 {
    1000
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            enabled: default_sampler_enabled(),
            interval_ms: default_sampler_interval_ms(),
        }
    }
}

impl From<SamplerSettings> for SamplerConfig {
    fn from(cfg: SamplerSettings) -> Self {
        Self {
            enabled: cfg.enabled,
            interval: Duration::from_millis(cfg.interval_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the connection manager cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        if self.server_url.trim().is_empty() {
            return Err(AppError::Config("server_url must not be empty".to_string()));
        }
        if self.websocket.reconnect_base_delay_ms > self.websocket.reconnect_max_delay_ms {
            return Err(AppError::Config(format!(
                "reconnect_base_delay_ms ({}) exceeds reconnect_max_delay_ms ({})",
                self.websocket.reconnect_base_delay_ms, self.websocket.reconnect_max_delay_ms
            )));
        }
        if self.sampler.interval_ms == 0 {
            return Err(AppError::Config("sampler.interval_ms must be > 0".to_string()));
        }
        if self.websocket.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "websocket.heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection settings with the server origin filled in.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut ws_config: ConnectionConfig = self.websocket.clone().into();
        ws_config.server_url = self.server_url.clone();
        ws_config
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        self.sampler.clone().into()
    }
}

/// Resolve the config path: CLI arg > `TASKWATCH_CONFIG` > default.
pub fn resolve_config_path(arg: Option<String>) -> String {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Resolve the auth token: CLI arg > `TASKWATCH_TOKEN`. Empty means none.
pub fn resolve_token(arg: Option<String>) -> Option<String> {
    arg.or_else(|| std::env::var(TOKEN_ENV).ok())
        .filter(|t| !t.is_empty())
}
