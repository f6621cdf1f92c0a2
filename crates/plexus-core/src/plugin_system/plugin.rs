use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use serde::Serialize;

use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::loader::{NativeLibrary, SymbolAddress};
use crate::plugin_system::traits::{InstanceData, PluginRuntime};

/// Lifecycle state of a plugin.
///
/// States are ordered by how far the plugin has progressed, which is the
/// order used by comparisons such as "at least resolved".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Uninstalled,
    Installed,
    Resolved,
    Starting,
    Stopping,
    Active,
}

impl PluginState {
    /// Starting and Stopping are transient: a hook is running.
    pub fn is_transient(self) -> bool {
        matches!(self, PluginState::Starting | PluginState::Stopping)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Uninstalled => "uninstalled",
            PluginState::Installed => "installed",
            PluginState::Resolved => "resolved",
            PluginState::Starting => "starting",
            PluginState::Stopping => "stopping",
            PluginState::Active => "active",
        };
        f.write_str(s)
    }
}

/// An installed plugin as tracked by its environment.
///
/// Edges to other plugins are stored as identifiers into the environment's
/// plugin table. `imported` and `importing` always mirror each other.
pub(crate) struct Plugin {
    pub descriptor: Arc<PluginDescriptor>,
    pub state: PluginState,
    /// Plugins this one depends on, statically or through resolved symbols
    pub imported: Vec<String>,
    /// Plugins depending on this one
    pub importing: Vec<String>,
    pub library: Option<Box<dyn NativeLibrary>>,
    pub runtime: Option<Arc<dyn PluginRuntime>>,
    pub instance: Option<InstanceData>,
    /// Generation of the live plugin context, if any
    pub context_generation: Option<u64>,
    pub defined_symbols: HashMap<String, SymbolAddress>,
    /// Thread currently running a start or stop hook of this plugin
    pub transition_owner: Option<ThreadId>,
}

impl Plugin {
    pub fn new(descriptor: Arc<PluginDescriptor>) -> Self {
        Self {
            descriptor,
            state: PluginState::Installed,
            imported: Vec::new(),
            importing: Vec::new(),
            library: None,
            runtime: None,
            instance: None,
            context_generation: None,
            defined_symbols: HashMap::new(),
            transition_owner: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.identifier
    }

    pub fn imports(&self, other: &str) -> bool {
        self.imported.iter().any(|id| id == other)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.descriptor.identifier)
            .field("state", &self.state)
            .field("imported", &self.imported)
            .field("importing", &self.importing)
            .field("has_runtime", &self.runtime.is_some())
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}
