//! Command system configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::batch::BatchOptions;
use crate::context::ConfigSource;
use crate::error::ConfigError;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "EASEL_CONFIG";

/// Command system configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Plugins whose commands are never registered
    #[serde(default)]
    pub disabled_plugins: Vec<String>,

    /// Plugins whose commands are registered (if empty, all are)
    #[serde(default)]
    pub enabled_plugins: Vec<String>,

    /// Plugin-specific configurations
    #[serde(default)]
    pub plugin_configs: HashMap<String, Value>,

    /// Values exposed to commands through their context
    #[serde(default)]
    pub settings: HashMap<String, Value>,

    /// Default batch options
    #[serde(default)]
    pub batch: BatchOptions,

    /// Command-line defaults
    #[serde(default)]
    pub cli: CliConfig,
}

/// Defaults for the `easel` command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Timeout for `easel run` (in milliseconds)
    #[serde(default)]
    pub invocation_timeout_ms: Option<u64>,

    /// Log filter, e.g. `info` or `easel_commands=debug`
    #[serde(default)]
    pub log_level: Option<String>,
}

impl CommandsConfig {
    /// Check if a plugin is enabled.
    pub fn is_plugin_enabled(&self, plugin_id: &str) -> bool {
        if self.disabled_plugins.iter().any(|id| id == plugin_id) {
            return false;
        }

        if !self.enabled_plugins.is_empty() {
            return self.enabled_plugins.iter().any(|id| id == plugin_id);
        }

        true
    }

    /// Enable a plugin.
    pub fn enable_plugin(&mut self, plugin_id: &str) {
        self.disabled_plugins.retain(|id| id != plugin_id);
        if !self.enabled_plugins.is_empty() && !self.enabled_plugins.iter().any(|id| id == plugin_id)
        {
            self.enabled_plugins.push(plugin_id.to_string());
        }
    }

    /// Disable a plugin.
    pub fn disable_plugin(&mut self, plugin_id: &str) {
        if !self.disabled_plugins.iter().any(|id| id == plugin_id) {
            self.disabled_plugins.push(plugin_id.to_string());
        }
        self.enabled_plugins.retain(|id| id != plugin_id);
    }

    /// Get configuration for a specific plugin.
    pub fn get_plugin_config(&self, plugin_id: &str) -> Option<&Value> {
        self.plugin_configs.get(plugin_id)
    }

    /// Settings as a command configuration source.
    pub fn settings_source(&self) -> Arc<dyn ConfigSource> {
        Arc::new(self.settings.clone())
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loading command configuration from {}", path.display());
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Load from `$EASEL_CONFIG`, else from the user configuration directory.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

/// Location of the configuration file when none is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("easel").join("commands.toml"))
}
