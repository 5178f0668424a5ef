//! Configuration management for fnhold.
//!
//! The configuration is a small TOML file under the user's config
//! directory. Every field is optional and defaults are not written back,
//! so the file only ever holds what the user changed.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::{APP_NAME, DEFAULT_ACTIVATION_DELAY_MS, DEFAULT_LOG_LEVEL};

/// Upper bound for the activation delay.
pub const MAX_ACTIVATION_DELAY_MS: u64 = 2000;

/// Configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// How long Fn must be held with no other key before recording starts
    #[serde(
        default = "default_activation_delay_ms",
        skip_serializing_if = "is_default_activation_delay_ms"
    )]
    pub activation_delay_ms: u64,

    /// Log filter used when `FNHOLD_LOG` is not set
    #[serde(
        default = "default_log_level",
        skip_serializing_if = "is_default_log_level"
    )]
    pub log_level: String,

    /// Show a desktop notification for warnings and errors
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub notify_on_error: bool,
}

fn default_activation_delay_ms() -> u64 {
    DEFAULT_ACTIVATION_DELAY_MS
}

fn is_default_activation_delay_ms(v: &u64) -> bool {
    *v == DEFAULT_ACTIVATION_DELAY_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn is_default_log_level(v: &str) -> bool {
    v == DEFAULT_LOG_LEVEL
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

impl Default for Config {
    fn default() -> Self {
        Self {
            activation_delay_ms: default_activation_delay_ms(),
            log_level: default_log_level(),
            notify_on_error: true,
        }
    }
}

impl Config {
    /// Get the activation delay, clamped to [`MAX_ACTIVATION_DELAY_MS`].
    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms.min(MAX_ACTIVATION_DELAY_MS))
    }

    /// Whether the configured delay is above the clamp.
    pub fn activation_delay_clamped(&self) -> bool {
        self.activation_delay_ms > MAX_ACTIVATION_DELAY_MS
    }

    /// Get the fallback log filter
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Check if warnings should surface as notifications
    pub fn notify_on_error(&self) -> bool {
        self.notify_on_error
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager rooted at `dir`.
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}
