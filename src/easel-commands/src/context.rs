//! Per-invocation command context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::{ProgressSink, ProgressUpdate};

/// How a command is being invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Triggered by a user from the UI.
    #[default]
    Interactive,
    /// Triggered from a script or the command line.
    Scripted,
    /// Triggered by the batch executor or another automated driver.
    Automation,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Scripted => write!(f, "scripted"),
            Self::Automation => write!(f, "automation"),
        }
    }
}

/// Capability lookup supplied by the host.
pub trait ServiceProvider: Send + Sync {
    /// Get the service registered for a type, if any.
    fn service(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Configuration lookup supplied by the host.
pub trait ConfigSource: Send + Sync {
    /// Get a configuration value by key.
    fn get(&self, key: &str) -> Option<Value>;
}

/// Type-keyed service map.
#[derive(Default)]
pub struct Services {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// Builder form of [`Services::insert`].
    pub fn with<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceProvider for Services {
    fn service(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(&type_id).cloned()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("count", &self.services.len())
            .finish()
    }
}

/// Configuration source with no values.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyConfig;

impl ConfigSource for EmptyConfig {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }
}

impl ConfigSource for HashMap<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for serde_json::Map<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        serde_json::Map::get(self, key).cloned()
    }
}

/// Context handed to every lifecycle call of one invocation.
///
/// A context is created per invocation by the caller. Services, configuration
/// and the progress sink may be shared; the data bag belongs to this
/// invocation only.
pub struct CommandContext {
    services: Arc<dyn ServiceProvider>,
    config: Arc<dyn ConfigSource>,
    mode: ExecutionMode,
    progress: Option<ProgressSink>,
    data: Mutex<HashMap<String, Value>>,
}

impl CommandContext {
    /// Create a context with no services and no configuration.
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            services: Arc::new(Services::new()),
            config: Arc::new(EmptyConfig),
            mode,
            progress: None,
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn interactive() -> Self {
        Self::new(ExecutionMode::Interactive)
    }

    pub fn scripted() -> Self {
        Self::new(ExecutionMode::Scripted)
    }

    pub fn automation() -> Self {
        Self::new(ExecutionMode::Automation)
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceProvider>) -> Self {
        self.services = services;
        self
    }

    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// New context sharing services, configuration, mode and progress sink,
    /// with an empty data bag.
    pub fn fork(&self) -> Self {
        Self {
            services: self.services.clone(),
            config: self.config.clone(),
            mode: self.mode,
            progress: self.progress.clone(),
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Look up a typed service.
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .service(TypeId::of::<T>())
            .and_then(|s| s.downcast::<T>().ok())
    }

    /// Raw configuration value.
    pub fn config_value(&self, key: &str) -> Option<Value> {
        self.config.get(key)
    }

    /// Typed configuration value. Values of the wrong shape read as `None`.
    pub fn config<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn progress(&self) -> Option<&ProgressSink> {
        self.progress.as_ref()
    }

    /// Report progress if a sink is attached.
    pub fn report_progress(&self, update: ProgressUpdate) {
        if let Some(sink) = &self.progress {
            sink.report(update);
        }
    }

    /// Store a value in the data bag.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    pub fn remove_data(&self, key: &str) -> Option<Value> {
        self.data.lock().remove(key)
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::interactive()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("mode", &self.mode)
            .field("progress", &self.progress.is_some())
            .field("data_keys", &self.data.lock().len())
            .finish_non_exhaustive()
    }
}
