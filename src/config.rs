//! Configuration loading
//!
//! Settings live in `<config dir>/a2dp-switcher/config.toml`. A default file
//! is written on first run.

use anyhow::{Context, Result};
use a2dp_switcher_core::{ConnectingPolicy, WorkflowPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "a2dp-switcher";
const CONFIG_FILE: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Where the device registry is stored
    #[serde(skip)]
    pub data_dir: PathBuf,

    pub workflow: WorkflowConfig,
    pub tag: TagConfig,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectingPolicyConfig {
    #[default]
    Ignore,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// What a `Connecting` report means while waiting for the profile
    pub connecting_policy: ConnectingPolicyConfig,

    /// Give up after this many seconds. 0 waits forever.
    pub connect_timeout_secs: u64,

    /// Keep the final status up for the dismiss delay before exiting
    pub linger: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            connecting_policy: ConnectingPolicyConfig::Ignore,
            connect_timeout_secs: 60,
            linger: false,
        }
    }
}

impl WorkflowConfig {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            connecting: match self.connecting_policy {
                ConnectingPolicyConfig::Ignore => ConnectingPolicy::Ignore,
                ConnectingPolicyConfig::Fail => ConnectingPolicy::Fail,
            },
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Package named in the application record written to tags.
    /// Empty writes no application record.
    pub app_package: String,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            app_package: APP_DIR.to_string(),
        }
    }
}

impl TagConfig {
    pub fn app_package(&self) -> Option<&str> {
        Some(self.app_package.as_str()).filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name such as `hci1`. Unset uses the default adapter.
    pub adapter: Option<String>,
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path(), Self::default_data_dir())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Load configuration from an explicit file
    pub fn load_from(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", config_path.display()))?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(config_path, content)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            config
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        config.data_dir = data_dir;

        Ok(config)
    }
}
