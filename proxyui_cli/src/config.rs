//! CLI configuration management

use crate::api::ApiClient;
use crate::stream::StreamOptions;
use anyhow::{Context, Result};
use proxyui_common::{constants, LogLevel, SubscriptionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("proxyui")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".proxyui")
    }
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

/// Ensure the config directory exists
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    Ok(())
}

/// Main configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend base address (default: http://127.0.0.1:9090)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Shared secret for the backend
    #[serde(default)]
    pub secret: Option<String>,

    /// Minimum severity requested for streamed logs
    #[serde(default)]
    pub log_level: LogLevel,

    /// Seconds to wait before reconnecting a dropped stream
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_api_url() -> String {
    constants::DEFAULT_API_URL.to_string()
}

fn default_reconnect_delay() -> u64 {
    constants::RECONNECT_DELAY_SECONDS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            secret: None,
            log_level: LogLevel::default(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl Config {
    /// Load config from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        self.save_to(&config_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Configured secret, treating an empty string as none
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Apply command-line overrides on top of the file values
    pub fn with_overrides(mut self, api_url: Option<String>, secret: Option<String>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        if let Some(secret) = secret {
            self.secret = Some(secret);
        }
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            reconnect_delay: self.reconnect_delay(),
        }
    }

    /// Initial subscription: every topic, at the configured log level
    pub fn subscriptions(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            log_level: self.log_level,
            ..SubscriptionConfig::default()
        }
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_url, self.secret()).context("Failed to create API client")
    }
}
