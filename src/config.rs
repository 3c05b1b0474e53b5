//! Configuration loading and validation.
//!
//! Settings are grouped the way the daemon consumes them: listener and
//! identity under `[server]`, pool sizing under `[database]` and
//! `[threadpool]`, crypto and account policy under `[security]`.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub threadpool: ThreadPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,
    #[serde(default = "defaults::read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "defaults::write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "defaults::server_name")]
    pub server_name: String,
    #[serde(default)]
    pub motd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "defaults::max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "defaults::max_idle_conns")]
    pub max_idle_conns: u32,
    #[serde(default = "defaults::conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "defaults::rsa_key_size")]
    pub rsa_key_size: usize,
    #[serde(default = "defaults::rsa_private_key_path")]
    pub rsa_private_key_path: String,
    #[serde(default = "defaults::rsa_public_key_path")]
    pub rsa_public_key_path: String,
    #[serde(default = "defaults::aes_key_size")]
    pub aes_key_size: usize,
    #[serde(default = "defaults::aes_mode")]
    pub aes_mode: String,
    #[serde(default = "defaults::session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "defaults::max_ip_suspicion")]
    pub max_ip_suspicion: i64,
    #[serde(default = "defaults::enable_ip_tracking")]
    pub enable_ip_tracking: bool,
    #[serde(default = "defaults::password_min_length")]
    pub password_min_length: usize,
    #[serde(default)]
    pub password_require_special: bool,
    #[serde(default = "defaults::max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "defaults::login_attempt_window_secs")]
    pub login_attempt_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPoolConfig {
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,
    #[serde(default = "defaults::queue_size")]
    pub queue_size: usize,
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,
    #[serde(default = "defaults::worker_idle_timeout_secs")]
    pub worker_idle_timeout_secs: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::worker_count(),
            queue_size: defaults::queue_size(),
            max_workers: defaults::max_workers(),
            worker_idle_timeout_secs: defaults::worker_idle_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    /// When set, SESSIONKEY payloads are RSA-wrapped to the client's public
    /// key instead of raw base64. The reference client expects raw base64.
    #[serde(default)]
    pub encrypt_session_key: bool,
    #[serde(default = "defaults::enable_direct_messages")]
    pub enable_direct_messages: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            encrypt_session_key: false,
            enable_direct_messages: defaults::enable_direct_messages(),
        }
    }
}

mod defaults {
    pub fn host() -> String {
        "0.0.0.0".into()
    }
    pub fn port() -> u16 {
        6667
    }
    pub fn max_connections() -> usize {
        1024
    }
    pub fn read_timeout_secs() -> u64 {
        60
    }
    pub fn write_timeout_secs() -> u64 {
        30
    }
    pub fn server_name() -> String {
        "emberd".into()
    }
    pub fn max_open_conns() -> u32 {
        10
    }
    pub fn max_idle_conns() -> u32 {
        2
    }
    pub fn conn_max_lifetime_secs() -> u64 {
        1800
    }
    pub fn rsa_key_size() -> usize {
        2048
    }
    pub fn rsa_private_key_path() -> String {
        "keys/server_rsa.pem".into()
    }
    pub fn rsa_public_key_path() -> String {
        "keys/server_rsa.pub.pem".into()
    }
    pub fn aes_key_size() -> usize {
        256
    }
    pub fn aes_mode() -> String {
        "GCM".into()
    }
    pub fn session_timeout_secs() -> u64 {
        3600
    }
    pub fn max_ip_suspicion() -> i64 {
        3
    }
    pub fn enable_ip_tracking() -> bool {
        true
    }
    pub fn password_min_length() -> usize {
        8
    }
    pub fn max_login_attempts() -> u32 {
        5
    }
    pub fn login_attempt_window_secs() -> u64 {
        300
    }
    pub fn worker_count() -> usize {
        4
    }
    pub fn queue_size() -> usize {
        64
    }
    pub fn max_workers() -> usize {
        16
    }
    pub fn worker_idle_timeout_secs() -> u64 {
        30
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn enable_direct_messages() -> bool {
        true
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.database.path = expand_env(&config.database.path);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::Invalid("database.path is required".into()));
        }
        if self.security.rsa_key_size != 2048 && self.security.rsa_key_size != 4096 {
            return Err(ConfigError::Invalid(
                "security.rsa_key_size must be 2048 or 4096".into(),
            ));
        }
        if self.security.aes_key_size != 256 {
            return Err(ConfigError::Invalid(
                "security.aes_key_size must be 256".into(),
            ));
        }
        if self.security.aes_mode != "GCM" && self.security.aes_mode != "CBC" {
            return Err(ConfigError::Invalid(
                "security.aes_mode must be GCM or CBC".into(),
            ));
        }
        if self.security.max_ip_suspicion < 1 {
            return Err(ConfigError::Invalid(
                "security.max_ip_suspicion must be at least 1".into(),
            ));
        }
        if self.threadpool.max_workers < self.threadpool.worker_count {
            return Err(ConfigError::Invalid(
                "threadpool.max_workers must be >= threadpool.worker_count".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` references from the environment. Unset variables expand
/// to the empty string.
fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
