//! Configuration loading.
//!
//! The controller reads `configs/config.yaml` and applies environment
//! overrides on top; the agent is configured from the environment only.

use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Controller configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// `debug` or `release`.
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Tunables for dispatch, liveness tracking, and reaping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Blocking-pop window for `GET /tasks/next`, in seconds.
    pub task_timeout_secs: u64,
    /// Age after which an in-flight task is considered stuck, in seconds.
    pub stuck_task_timeout_secs: u64,
    /// `last_heartbeat` age after which an agent is swept offline, in seconds.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            mode: "debug".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "netscan.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 30,
            stuck_task_timeout_secs: 600,
            heartbeat_timeout_secs: 120,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from `configs/config.yaml` (if present) plus environment
    /// overrides, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("configs/config.yaml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("NETSCAN_SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(mode) = env::var("NETSCAN_SERVER_MODE") {
            self.server.mode = mode;
        }
        if let Ok(path) = env::var("NETSCAN_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(level) = env::var("NETSCAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(secs) = env_parse::<u64>("NETSCAN_TASK_TIMEOUT_SECS") {
            self.dispatch.task_timeout_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("NETSCAN_STUCK_TASK_TIMEOUT_SECS") {
            self.dispatch.stuck_task_timeout_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("NETSCAN_HEARTBEAT_TIMEOUT_SECS") {
            self.dispatch.heartbeat_timeout_secs = secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port must be non-zero".into()));
        }
        if self.server.mode != "debug" && self.server.mode != "release" {
            return Err(ConfigError::Invalid(format!(
                "invalid server mode: {}",
                self.server.mode
            )));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::Invalid("database path is required".into()));
        }
        Ok(())
    }
}

/// Agent configuration, read from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub backend_url: String,
    pub token: String,
    pub agent_id: String,
    pub name: String,
    pub location: String,
    pub registration_token: String,
    pub ip_address: String,
    pub os: String,
    pub arch: String,
    pub debug: bool,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            backend_url: env_or("BACKEND_URL", "http://localhost:8080"),
            token: env_or("AGENT_TOKEN", ""),
            agent_id: env_or("AGENT_ID", ""),
            name: env_or("AGENT_NAME", "netscan-agent"),
            location: env_or("AGENT_LOCATION", "unknown"),
            registration_token: env_or("REGISTRATION_TOKEN", ""),
            ip_address: env_or("AGENT_IP", ""),
            os: env_or("OS", env::consts::OS),
            arch: env_or("ARCH", env::consts::ARCH),
            debug: env_or("DEBUG", "") == "true",
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.parse().ok()
}
