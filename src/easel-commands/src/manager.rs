//! Keeps the registry in step with plugin state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CommandsConfig;
use crate::error::{PluginError, panic_message};
use crate::plugin::{CommandPlugin, PluginSource, PluginStateChanged};
use crate::registry::CommandRegistry;

/// Registers and unregisters plugin commands as plugins come and go.
///
/// The manager tracks which plugins it has integrated, so unregistering a
/// plugin touches only that plugin's commands. Plugin callbacks that fail or
/// panic are logged; they never leave the manager in an inconsistent state and
/// never reach the host.
pub struct CommandPluginManager {
    registry: Arc<CommandRegistry>,
    source: Arc<dyn PluginSource>,
    config: CommandsConfig,
    plugins: DashMap<String, Arc<dyn CommandPlugin>>,
}

impl CommandPluginManager {
    pub fn new(registry: Arc<CommandRegistry>, source: Arc<dyn PluginSource>) -> Self {
        Self::with_config(registry, source, CommandsConfig::default())
    }

    pub fn with_config(
        registry: Arc<CommandRegistry>,
        source: Arc<dyn PluginSource>,
        config: CommandsConfig,
    ) -> Self {
        Self {
            registry,
            source,
            config,
            plugins: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CommandsConfig {
        &self.config
    }

    /// Register the commands of every enabled plugin.
    ///
    /// Returns the ids of the plugins that were registered.
    pub fn register_all(&self) -> Vec<String> {
        let mut registered = Vec::new();

        for loaded in self.source.loaded_plugins() {
            let Some(plugin) = loaded.plugin else {
                continue;
            };
            if !loaded.enabled || !self.config.is_plugin_enabled(&loaded.id) {
                debug!("Skipping disabled plugin: {}", loaded.id);
                continue;
            }
            if self.is_plugin_registered(&loaded.id) {
                continue;
            }

            match self.register_plugin(&loaded.id, plugin) {
                Ok(()) => registered.push(loaded.id),
                Err(e) => error!("Failed to register plugin {}: {}", loaded.id, e),
            }
        }

        info!("Registered commands from {} plugins", registered.len());
        registered
    }

    /// Register one plugin's commands.
    pub fn register_plugin(
        &self,
        plugin_id: &str,
        plugin: Arc<dyn CommandPlugin>,
    ) -> Result<(), PluginError> {
        let slot = match self.plugins.entry(plugin_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(PluginError::AlreadyRegistered(plugin_id.to_string()));
            }
            Entry::Vacant(slot) => slot,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            plugin.register_commands(&self.registry)
        }));

        let err = match outcome {
            Ok(Ok(())) => {
                slot.insert(plugin);
                info!("Registered commands of plugin {}", plugin_id);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(payload) => PluginError::Panicked {
                plugin: plugin_id.to_string(),
                message: panic_message(payload.as_ref()),
            },
        };
        drop(slot);

        warn!("Plugin {} failed to register its commands: {}", plugin_id, err);
        // Remove whatever the plugin managed to register before failing.
        let _ = catch_unwind(AssertUnwindSafe(|| {
            plugin.unregister_commands(&self.registry)
        }));
        Err(err)
    }

    /// Unregister one plugin's commands. Returns false if the plugin was not
    /// registered.
    pub fn unregister_plugin(&self, plugin_id: &str) -> bool {
        let Some((_, plugin)) = self.plugins.remove(plugin_id) else {
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| {
            plugin.unregister_commands(&self.registry)
        })) {
            Ok(Ok(())) => info!("Unregistered commands of plugin {}", plugin_id),
            Ok(Err(e)) => warn!(
                "Plugin {} failed to unregister its commands: {}",
                plugin_id, e
            ),
            Err(payload) => warn!(
                "Plugin {} panicked while unregistering its commands: {}",
                plugin_id,
                panic_message(payload.as_ref())
            ),
        }
        true
    }

    /// React to a plugin being enabled or disabled.
    pub fn handle_state_change(&self, event: &PluginStateChanged) {
        let id = &event.plugin_id;

        if !event.enabled {
            if self.unregister_plugin(id) {
                debug!("Plugin {} disabled, commands removed", id);
            }
            return;
        }

        if self.is_plugin_registered(id) {
            return;
        }
        if !self.config.is_plugin_enabled(id) {
            debug!("Plugin {} enabled but disabled by configuration", id);
            return;
        }

        match self.enable_plugin(id) {
            Ok(_) => {}
            Err(PluginError::NotFound(_)) => {
                warn!("Received state change for unknown plugin {}", id)
            }
            Err(e) => error!("Failed to register plugin {}: {}", id, e),
        }
    }

    /// Look a plugin up in the source and register its commands.
    ///
    /// Returns `Ok(false)` when the plugin is already registered or
    /// contributes no commands.
    pub fn enable_plugin(&self, plugin_id: &str) -> Result<bool, PluginError> {
        if self.is_plugin_registered(plugin_id) {
            return Ok(false);
        }

        let loaded = self
            .source
            .plugin(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        let Some(plugin) = loaded.plugin else {
            debug!("Plugin {} has no commands", plugin_id);
            return Ok(false);
        };

        self.register_plugin(plugin_id, plugin)?;
        Ok(true)
    }

    /// Process state change notifications on a background task until the
    /// sending side closes.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PluginStateChanged>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_state_change(&event);
            }
            debug!("Plugin state listener stopped");
        })
    }

    /// Ids of the plugins whose commands are registered.
    pub fn registered_plugins(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_plugin_registered(&self, plugin_id: &str) -> bool {
        self.plugins.contains_key(plugin_id)
    }

    /// Unregister every plugin.
    pub fn unregister_all(&self) -> usize {
        self.registered_plugins()
            .iter()
            .filter(|id| self.unregister_plugin(id))
            .count()
    }
}

impl std::fmt::Debug for CommandPluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPluginManager")
            .field("plugins", &self.registered_plugins())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
