//! Command host used by the CLI: registry, plugins and invoker wired together.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use easel_commands::builtin::{CORE_PLUGIN_ID, core_plugin};
use easel_commands::{
    BatchExecutor, CommandPluginManager, CommandRegistry, CommandsConfig, ExecutionMode, Invoker,
    LoadedPlugin, Services, StaticPluginSource,
};

/// Everything a CLI subcommand needs to run commands.
pub struct Host {
    pub config: CommandsConfig,
    pub registry: Arc<CommandRegistry>,
    pub plugins: CommandPluginManager,
    pub invoker: Invoker,
}

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<CommandsConfig> {
    match path {
        Some(path) => CommandsConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => CommandsConfig::load_default().context("Failed to load config"),
    }
}

impl Host {
    /// Build a host and register every enabled plugin.
    pub fn new(config: CommandsConfig) -> Self {
        let registry = Arc::new(CommandRegistry::new());
        let source = Arc::new(
            StaticPluginSource::new()
                .with_plugin(LoadedPlugin::new(CORE_PLUGIN_ID, Arc::new(core_plugin()))),
        );

        let plugins = CommandPluginManager::with_config(registry.clone(), source, config.clone());
        let registered = plugins.register_all();
        debug!(
            "Registered {} plugin(s), {} command(s)",
            registered.len(),
            registry.len()
        );

        let services = Services::new().with(registry.clone());
        let invoker = Invoker::new(registry.clone())
            .with_services(Arc::new(services))
            .with_config(config.settings_source());

        Self {
            config,
            registry,
            plugins,
            invoker,
        }
    }

    /// Batch executor sharing the invoker's services and settings.
    pub fn batch_executor(&self) -> BatchExecutor {
        BatchExecutor::new(self.registry.clone())
            .with_context(self.invoker.context(ExecutionMode::Automation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_commands_registered() {
        let host = Host::new(CommandsConfig::default());
        assert!(host.registry.is_registered("core.echo"));
        assert!(host.registry.is_registered("core.wait"));
        assert!(host.registry.is_registered("core.commands"));
        assert_eq!(host.plugins.registered_plugins(), vec![CORE_PLUGIN_ID]);
    }

    #[test]
    fn test_disabled_core_plugin() {
        let mut config = CommandsConfig::default();
        config.disable_plugin(CORE_PLUGIN_ID);
        let host = Host::new(config);
        assert!(host.registry.is_empty());
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        std::fs::write(&path, "disabled_plugins = 3").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("commands.toml"));
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, CommandsConfig::default());
    }
}
