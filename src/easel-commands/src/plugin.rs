//! Plugin-facing types.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::PluginError;
use crate::registry::CommandRegistry;

/// Callbacks a plugin module implements to contribute commands.
pub trait CommandPlugin: Send + Sync {
    /// Register the plugin's commands.
    fn register_commands(&self, registry: &CommandRegistry) -> Result<(), PluginError>;

    /// Remove the commands this plugin registered.
    fn unregister_commands(&self, registry: &CommandRegistry) -> Result<(), PluginError>;
}

/// What a [`CommandBundle`] does when one of its commands fails to register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Register the remaining commands and log each failure.
    ContinueOnError,
    /// Stop at the first failure and unregister what was already registered.
    #[default]
    Abort,
}

/// A fixed set of commands registered and unregistered together.
pub struct CommandBundle {
    id: String,
    commands: Vec<Arc<dyn Command>>,
    policy: RegistrationPolicy,
    registered: Mutex<Vec<String>>,
}

impl CommandBundle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            commands: Vec::new(),
            policy: RegistrationPolicy::default(),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_command(mut self, command: Arc<dyn Command>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Identifiers of every command in the bundle.
    pub fn command_ids(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.descriptor().id.clone())
            .collect()
    }

    /// Identifiers this bundle currently owns in a registry.
    pub fn registered_ids(&self) -> Vec<String> {
        self.registered.lock().clone()
    }
}

impl CommandPlugin for CommandBundle {
    fn register_commands(&self, registry: &CommandRegistry) -> Result<(), PluginError> {
        let mut registered = self.registered.lock();

        for command in &self.commands {
            let id = &command.descriptor().id;
            if registered.contains(id) {
                continue;
            }

            match registry.register(command.clone()) {
                Ok(_) => registered.push(id.clone()),
                Err(e) => match self.policy {
                    RegistrationPolicy::ContinueOnError => {
                        warn!("Plugin {}: skipping command {}: {}", self.id, id, e);
                    }
                    RegistrationPolicy::Abort => {
                        for owned in registered.drain(..) {
                            registry.unregister(&owned);
                        }
                        return Err(PluginError::registration(&self.id, e.to_string()));
                    }
                },
            }
        }

        debug!(
            "Plugin {} registered {} commands",
            self.id,
            registered.len()
        );
        Ok(())
    }

    fn unregister_commands(&self, registry: &CommandRegistry) -> Result<(), PluginError> {
        let owned: Vec<String> = self.registered.lock().drain(..).collect();
        let removed = owned.iter().filter(|id| registry.unregister(id)).count();
        debug!("Plugin {} unregistered {} commands", self.id, removed);
        Ok(())
    }
}

impl fmt::Debug for CommandBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBundle")
            .field("id", &self.id)
            .field("commands", &self.command_ids())
            .field("policy", &self.policy)
            .finish()
    }
}

/// A plugin module as known to the host's plugin loader.
#[derive(Clone)]
pub struct LoadedPlugin {
    /// Stable plugin identifier
    pub id: String,

    /// Enabled flag from the plugin's metadata
    pub enabled: bool,

    /// Command callbacks, absent for plugins without commands
    pub plugin: Option<Arc<dyn CommandPlugin>>,
}

impl LoadedPlugin {
    pub fn new(id: impl Into<String>, plugin: Arc<dyn CommandPlugin>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            plugin: Some(plugin),
        }
    }

    /// A plugin that contributes no commands.
    pub fn without_commands(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            plugin: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("has_commands", &self.plugin.is_some())
            .finish()
    }
}

/// Access to the plugins the host has loaded.
pub trait PluginSource: Send + Sync {
    /// Every loaded plugin.
    fn loaded_plugins(&self) -> Vec<LoadedPlugin>;

    /// Look up one plugin.
    fn plugin(&self, id: &str) -> Option<LoadedPlugin> {
        self.loaded_plugins().into_iter().find(|p| p.id == id)
    }
}

/// In-memory [`PluginSource`] for hosts that link their plugins statically.
#[derive(Debug, Default)]
pub struct StaticPluginSource {
    plugins: RwLock<Vec<LoadedPlugin>>,
}

impl StaticPluginSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(self, plugin: LoadedPlugin) -> Self {
        self.insert(plugin);
        self
    }

    /// Add a plugin, replacing any previous plugin with the same id.
    pub fn insert(&self, plugin: LoadedPlugin) {
        let mut plugins = self.plugins.write();
        match plugins.iter_mut().find(|p| p.id == plugin.id) {
            Some(existing) => *existing = plugin,
            None => plugins.push(plugin),
        }
    }

    /// Update the enabled flag. Returns false for unknown plugins.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.plugins.write().iter_mut().find(|p| p.id == id) {
            Some(plugin) => {
                plugin.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

impl PluginSource for StaticPluginSource {
    fn loaded_plugins(&self) -> Vec<LoadedPlugin> {
        self.plugins.read().clone()
    }

    fn plugin(&self, id: &str) -> Option<LoadedPlugin> {
        self.plugins.read().iter().find(|p| p.id == id).cloned()
    }
}

/// A plugin was enabled or disabled at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStateChanged {
    pub plugin_id: String,
    pub enabled: bool,
}

impl PluginStateChanged {
    pub fn enabled(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            enabled: true,
        }
    }

    pub fn disabled(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            enabled: false,
        }
    }
}
