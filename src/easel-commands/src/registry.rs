//! Command registry.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandCategory};
use crate::error::{RegistryError, panic_message};
use crate::handle::CommandHandle;

const EVENT_CAPACITY: usize = 256;

/// Change notifications published by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A command was added.
    Registered {
        id: String,
        command: Arc<CommandHandle>,
    },
    /// A command was removed and disposed.
    Unregistered {
        id: String,
        command: Arc<CommandHandle>,
    },
}

impl RegistryEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Registered { id, .. } | Self::Unregistered { id, .. } => id,
        }
    }
}

/// Counts computed from the current registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub visible: usize,
    pub with_shortcuts: usize,
    pub by_category: BTreeMap<CommandCategory, usize>,
}

/// Concurrent store of the commands that can currently be invoked.
///
/// Identifiers are unique: registering an identifier that is already present
/// fails and leaves the existing entry untouched, even when several plugins
/// register at the same time.
pub struct CommandRegistry {
    commands: DashMap<String, Arc<CommandHandle>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl CommandRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            commands: DashMap::new(),
            events,
        }
    }

    /// Subscribe to registration events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a command.
    pub fn register(&self, command: Arc<dyn Command>) -> Result<Arc<CommandHandle>, RegistryError> {
        let id = command.descriptor().id.clone();
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }

        let handle = match self.commands.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!("Rejected duplicate command registration: {}", id);
                return Err(RegistryError::DuplicateId(id));
            }
            Entry::Vacant(slot) => {
                let handle = Arc::new(CommandHandle::new(command));
                slot.insert(handle.clone());
                handle
            }
        };

        debug!("Registered command: {}", id);
        let _ = self.events.send(RegistryEvent::Registered {
            id,
            command: handle.clone(),
        });
        Ok(handle)
    }

    /// Remove and dispose a command.
    ///
    /// Disposal failures are logged; the entry is removed regardless. Returns
    /// false if no command was registered under `id`.
    pub fn unregister(&self, id: &str) -> bool {
        let Some((id, handle)) = self.commands.remove(id) else {
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| handle.command().dispose())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to dispose command {}: {}", id, e),
            Err(payload) => warn!(
                "Command {} panicked during dispose: {}",
                id,
                panic_message(payload.as_ref())
            ),
        }

        debug!("Unregistered command: {}", id);
        let _ = self.events.send(RegistryEvent::Unregistered {
            id,
            command: handle,
        });
        true
    }

    /// Get a command by identifier.
    pub fn get(&self, id: &str) -> Option<Arc<CommandHandle>> {
        self.commands.get(id).map(|entry| entry.value().clone())
    }

    /// Check if a command is registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.commands.contains_key(id)
    }

    /// All commands, ordered by category, priority and display name.
    pub fn list(&self) -> Vec<Arc<CommandHandle>> {
        self.sorted(|_| true)
    }

    /// Commands in one category, in registry order.
    pub fn list_by_category(&self, category: CommandCategory) -> Vec<Arc<CommandHandle>> {
        self.sorted(|h| h.descriptor().category == category)
    }

    /// Commands that declare a keyboard shortcut, in registry order.
    pub fn list_with_shortcuts(&self) -> Vec<Arc<CommandHandle>> {
        self.sorted(|h| h.has_shortcut())
    }

    /// Commands whose id, name or description contains `query` (case-insensitive).
    pub fn search(&self, query: &str) -> Vec<Arc<CommandHandle>> {
        let query = query.to_lowercase();
        self.sorted(|h| {
            let d = h.descriptor();
            d.id.to_lowercase().contains(&query)
                || d.name.to_lowercase().contains(&query)
                || d.description.to_lowercase().contains(&query)
        })
    }

    fn sorted<F>(&self, filter: F) -> Vec<Arc<CommandHandle>>
    where
        F: Fn(&CommandHandle) -> bool,
    {
        let mut handles: Vec<_> = self
            .commands
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        handles.sort_by(|a, b| {
            let (a, b) = (a.descriptor(), b.descriptor());
            a.category
                .cmp(&b.category)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        handles
    }

    /// All registered identifiers, unordered.
    pub fn ids(&self) -> Vec<String> {
        self.commands.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Unregister every command. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self
            .ids()
            .into_iter()
            .filter(|id| self.unregister(id))
            .count();
        info!("Cleared {} commands from registry", removed);
        removed
    }

    /// Compute statistics over the current contents.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.commands.iter() {
            let handle = entry.value();
            let flags = handle.flags();
            stats.total += 1;
            if flags.enabled {
                stats.enabled += 1;
            }
            if flags.visible {
                stats.visible += 1;
            }
            if handle.has_shortcut() {
                stats.with_shortcuts += 1;
            }
            *stats
                .by_category
                .entry(handle.descriptor().category)
                .or_default() += 1;
        }
        stats
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.len())
            .finish()
    }
}
