//! # Easel Command Core
//!
//! Runtime that lets independently loaded plugins contribute commands to
//! Easel: named, parameterized, cancellable units of work.
//!
//! ## Features
//!
//! - **Registry**: Concurrent store of live commands keyed by identifier
//! - **Lifecycle**: Prepare, execute and cleanup with progress, timeouts and cancellation
//! - **Plugin Bridge**: Commands follow their plugin as it is enabled or disabled
//! - **Batches**: Sequential or bounded-parallel runs with continue-on-error policies
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use easel_commands::{CommandContext, CommandRegistry, Invoker, Parameters};
//! use easel_commands::builtin::core_plugin;
//! use easel_commands::plugin::CommandPlugin;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(CommandRegistry::new());
//!     core_plugin().register_commands(&registry)?;
//!
//!     let invoker = Invoker::new(registry);
//!     let mut params = Parameters::new();
//!     params.insert("text".into(), "hello".into());
//!
//!     let result = invoker
//!         .invoke("core.echo", params, CommandContext::scripted())
//!         .await?;
//!     println!("{}", result.message());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod builtin;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod invocation;
pub mod manager;
pub mod params;
pub mod plugin;
pub mod progress;
pub mod registry;
pub mod result;

// Re-exports for convenience
pub use batch::{
    BatchExecutor, BatchFile, BatchItemResult, BatchOptions, BatchReport, BatchRequest,
    ExecutionLog, SkipReason,
};
pub use command::{Command, CommandCategory, CommandDescriptor, InvocationState};
pub use config::CommandsConfig;
pub use context::{CommandContext, ConfigSource, ExecutionMode, ServiceProvider, Services};
pub use error::{
    BatchError, CommandError, ConfigError, ParameterError, PluginError, RegistryError,
};
pub use handle::{CommandFlags, CommandHandle};
pub use invocation::{CliOutcome, Invocation, InvocationEvent, InvokeOptions, Invoker};
pub use manager::CommandPluginManager;
pub use params::{ParameterKind, ParameterSchema, ParameterSpec, Parameters};
pub use plugin::{
    CommandBundle, CommandPlugin, LoadedPlugin, PluginSource, PluginStateChanged,
    RegistrationPolicy, StaticPluginSource,
};
pub use progress::{ProgressSink, ProgressUpdate};
pub use registry::{CommandRegistry, RegistryEvent, RegistryStats};
pub use result::CommandResult;

// Needed to implement `Command`
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
