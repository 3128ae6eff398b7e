//! Configuration management for Blogochain
//!
//! Settings come from `config.toml` (or the file named by
//! `BLOGOCHAIN_CONFIG`). A missing file yields the defaults below; durations
//! are written as human strings such as `"30s"` or `"500ms"`.

use serde::{Deserialize, Deserializer};
use std::fs;
use std::time::Duration;

use crate::blockchain::MAX_DIFFICULTY;
use crate::error::ChainError;

pub const CONFIG_PATH_ENV: &str = "BLOGOCHAIN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub difficulty: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_tick_interval", deserialize_with = "human_duration")]
    pub tick_interval: Duration,
    #[serde(default = "default_queue_capacity")]
    pub viewer_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ping_interval", deserialize_with = "human_duration")]
    pub ping_interval: Duration,
    #[serde(default = "default_pong_timeout", deserialize_with = "human_duration")]
    pub pong_timeout: Duration,
    #[serde(default = "default_write_timeout", deserialize_with = "human_duration")]
    pub write_timeout: Duration,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ledger: LedgerConfig::default(),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            viewer_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            pong_timeout: default_pong_timeout(),
            write_timeout: default_write_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.server.port == 0 {
            return Err(ChainError::Config("server.port must be non-zero".to_string()));
        }
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::Config(format!(
                "ledger.difficulty must be at most {}",
                MAX_DIFFICULTY
            )));
        }
        if self.hub.tick_interval.is_zero() {
            return Err(ChainError::Config("hub.tick_interval must be positive".to_string()));
        }
        if self.hub.viewer_queue_capacity == 0 {
            return Err(ChainError::Config(
                "hub.viewer_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.session.pong_timeout <= self.session.ping_interval {
            return Err(ChainError::Config(
                "session.pong_timeout must be longer than session.ping_interval".to_string(),
            ));
        }
        if self.session.max_message_size == 0 {
            return Err(ChainError::Config(
                "session.max_message_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Load `config.toml` (or `$BLOGOCHAIN_CONFIG`), falling back to defaults when
/// the file is absent. `PORT` overrides `server.port`.
pub fn load_config() -> Result<Config, ChainError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config_str = fs::read_to_string(&path).unwrap_or_default();

    let mut config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        config.server.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> String {
    "web".to_string()
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_pong_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_message_size() -> usize {
    1024
}
