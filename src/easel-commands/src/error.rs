//! Error types for the command core.

use thiserror::Error;

/// Errors raised by the command registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A command with the same identifier is already registered.
    #[error("Command '{0}' is already registered")]
    DuplicateId(String),

    /// Commands must carry a non-empty identifier.
    #[error("Command identifier must not be empty")]
    EmptyId,
}

/// Parameter validation errors, surfaced before a command executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// A required parameter was not supplied and has no default.
    #[error("Missing required parameter '{0}'")]
    Missing(String),

    /// The supplied value does not match the declared kind.
    #[error("Parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// The supplied value is outside the declared valid set.
    #[error("Parameter '{name}' does not accept {value}; allowed: {allowed}")]
    NotAllowed {
        name: String,
        value: String,
        allowed: String,
    },

    /// A flat (string) value could not be parsed into the declared kind.
    #[error("Invalid value for parameter '{name}': {message}")]
    InvalidValue { name: String, message: String },
}

impl ParameterError {
    /// Name of the offending parameter.
    pub fn parameter(&self) -> &str {
        match self {
            Self::Missing(name) => name,
            Self::TypeMismatch { name, .. }
            | Self::NotAllowed { name, .. }
            | Self::InvalidValue { name, .. } => name,
        }
    }
}

/// Errors produced while running a command.
///
/// `execute` may return any of these; the invocation wrapper turns them into a
/// [`CommandResult`](crate::CommandResult) so they never escape to the host.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command observed its cancellation token.
    #[error("Command was cancelled")]
    Cancelled,

    /// No command is registered under this identifier.
    #[error("Command not found: {0}")]
    NotFound(String),

    /// The command instance is already executing.
    #[error("Command '{0}' is already executing")]
    Busy(String),

    /// The command is disabled.
    #[error("Command '{0}' is disabled")]
    Disabled(String),

    /// `can_execute` rejected the invocation.
    #[error("Command '{0}' cannot execute in the current state")]
    NotExecutable(String),

    /// Parameter validation failed.
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Generic execution failure.
    #[error("Execution failed: {0}")]
    Failed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error raised by a command implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether this error represents cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised while integrating a plugin's commands.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin is not known to the plugin source.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The plugin's commands are already registered.
    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// The plugin's registration callback failed.
    #[error("Failed to register commands of plugin '{plugin}': {message}")]
    Registration { plugin: String, message: String },

    /// The plugin's unregistration callback failed.
    #[error("Failed to unregister commands of plugin '{plugin}': {message}")]
    Unregistration { plugin: String, message: String },

    /// A plugin callback panicked.
    #[error("Plugin '{plugin}' panicked: {message}")]
    Panicked { plugin: String, message: String },

    /// Registry rejected a command.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl PluginError {
    /// Create a registration error.
    pub fn registration(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create an unregistration error.
    pub fn unregistration(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unregistration {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Errors that abort a whole batch before it starts or while persisting its log.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A request names a command that is not registered.
    #[error("Request #{index}: command not found: {command_id}")]
    UnknownCommand { index: usize, command_id: String },

    /// A request carries parameters rejected by the command's schema.
    #[error("Request #{index} ({command_id}): {source}")]
    InvalidParameters {
        index: usize,
        command_id: String,
        #[source]
        source: ParameterError,
    },

    /// A batch file could not be read.
    #[error("Failed to read batch file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A TOML batch file is malformed.
    #[error("Invalid batch file: {0}")]
    Toml(#[from] toml::de::Error),

    /// The execution log could not be written.
    #[error("Failed to write execution log to {path}: {source}")]
    Log {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::DuplicateId("new-document".to_string());
        assert_eq!(err.to_string(), "Command 'new-document' is already registered");
    }

    #[test]
    fn test_parameter_error_name() {
        let err = ParameterError::TypeMismatch {
            name: "width".to_string(),
            expected: "integer".to_string(),
            found: "string".to_string(),
        };
        assert_eq!(err.parameter(), "width");
        assert!(err.to_string().contains("expects integer"));
    }

    #[test]
    fn test_command_error_from_anyhow() {
        let err: CommandError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, CommandError::Other(_)));
        assert!(!err.is_cancelled());
        assert!(CommandError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("brush exploded")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "brush exploded");
    }

    #[test]
    fn test_plugin_error_helpers() {
        let err = PluginError::registration("filters", "boom");
        assert!(err.to_string().contains("filters"));
        assert!(err.to_string().contains("boom"));
    }
}
