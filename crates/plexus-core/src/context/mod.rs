//! # Plexus Plugin Contexts
//!
//! A [`Context`] is the handle through which the host program or one plugin
//! instance talks to an environment. The host creates the environment
//! together with its main context; the framework creates a plugin context
//! whenever it constructs a plugin instance and invalidates it when the
//! instance is destroyed.
//!
//! Every operation acquires the environment lock for its duration. Using a
//! context after it has been invalidated, or calling an operation from a
//! callback that forbids it, is a contract violation handled by
//! [`crate::kernel::fatal`].
pub mod environment;
pub mod info;

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ConfigFormat;
use crate::context::environment::{EnvGuard, Environment, Holder, Invocation, ANY};
use crate::context::info::{info_key, Teardown};
use crate::event::{HandlerId, LogSeverity, PluginEvent};
use crate::kernel::error::Result;
use crate::kernel::fatal::fatal;
use crate::plugin_system::descriptor::{Extension, ExtensionPoint, PluginDescriptor};
use crate::plugin_system::loader::{DynamicLoader, NativeLoader, SymbolAddress};
use crate::plugin_system::parser::{self, DescriptorParser, SerdeDescriptorParser};
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::scanner::ScanFlags;
use crate::plugin_system::scheduler::RunFunction;

const LOGGER_OR_LISTENER: &[Invocation] = &[Invocation::Logger, Invocation::Listener];
const LOGGER: &[Invocation] = &[Invocation::Logger];

/// Handle to an environment, acting either for the host program or for one
/// plugin instance
#[derive(Clone)]
pub struct Context {
    env: Arc<Environment>,
    holder: Holder,
    generation: u64,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("environment", &self.env.id())
            .field("holder", &self.holder)
            .finish()
    }
}

/// Configures the collaborators of a new environment
pub struct ContextBuilder {
    loader: Arc<dyn NativeLoader>,
    parser: Arc<dyn DescriptorParser>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            loader: Arc::new(DynamicLoader::new()),
            parser: Arc::new(SerdeDescriptorParser::new()),
        }
    }
}

impl ContextBuilder {
    /// Loader used to open plugin runtime libraries
    pub fn loader(mut self, loader: impl NativeLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Parser used for plugin descriptors
    pub fn parser(mut self, parser: impl DescriptorParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Create the environment and return its main context
    pub fn build(self) -> Context {
        let env = Environment::new(self.loader, self.parser);
        Context {
            env,
            holder: Holder::Main,
            generation: 0,
        }
    }
}

impl Context {
    /// Create a new environment with the default loader and parser and
    /// return its main context.
    pub fn create() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub(crate) fn for_plugin(env: Arc<Environment>, plugin_id: &str, generation: u64) -> Self {
        Self {
            env,
            holder: Holder::Plugin(plugin_id.to_string()),
            generation,
        }
    }

    pub(crate) fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Whether this is the host program's context
    pub fn is_main(&self) -> bool {
        self.holder == Holder::Main
    }

    /// Identifier of the plugin this context belongs to
    pub fn plugin_id(&self) -> Option<&str> {
        self.holder.plugin_id()
    }

    /// Lock the environment and validate the call.
    fn enter(&self, forbidden: &[Invocation], function: &str) -> EnvGuard<'_> {
        let guard = self.env.lock();
        guard.check_alive(function);
        if let Holder::Plugin(id) = &self.holder {
            let live = guard.state().plugins.get(id).and_then(|p| p.context_generation) == Some(self.generation);
            if !live {
                drop(guard);
                fatal(format!("{} called on the stale context of plugin '{}'", function, id));
            }
        }
        guard.check_invocation(forbidden, function);
        guard
    }

    fn require_plugin(&self, function: &str) -> &str {
        match &self.holder {
            Holder::Plugin(id) => id,
            Holder::Main => fatal(format!("{} can only be called from a plugin context", function)),
        }
    }

    /// Uninstall every plugin and destroy the environment.
    ///
    /// Only the main context may destroy its environment.
    pub fn destroy(&self) {
        {
            let _guard = self.enter(ANY, "destroy");
            if !self.is_main() {
                fatal("destroy called on a plugin context");
            }
        }
        self.env.destroy();
    }

    /// Register a directory containing one subdirectory per plugin.
    pub fn register_collection(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let guard = self.enter(LOGGER_OR_LISTENER, "register_collection");
        let added = {
            let mut state = guard.state();
            if state.collections.iter().any(|c| c == dir) {
                false
            } else {
                state.collections.push(dir.to_path_buf());
                true
            }
        };
        if added {
            guard.debug(&format!("Plugin collection {} was registered", dir.display()));
        }
        Ok(())
    }

    pub fn unregister_collection(&self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        let guard = self.enter(LOGGER_OR_LISTENER, "unregister_collection");
        guard.state().collections.retain(|c| c != dir);
        guard.debug(&format!("Plugin collection {} was unregistered", dir.display()));
    }

    pub fn unregister_collections(&self) {
        let guard = self.enter(LOGGER_OR_LISTENER, "unregister_collections");
        guard.state().collections.clear();
        guard.debug("All plugin collections were unregistered");
    }

    pub fn collections(&self) -> Vec<PathBuf> {
        let guard = self.enter(LOGGER, "collections");
        let collections = guard.state().collections.clone();
        collections
    }

    /// Register a logger receiving framework messages of at least `floor`
    /// severity. Registering the same function again updates its floor.
    pub fn register_logger<F>(&self, floor: LogSeverity, logger: F) -> HandlerId
    where
        F: Fn(LogSeverity, &str, Option<&str>) + Send + Sync + 'static,
    {
        self.register_logger_arc(floor, Arc::new(logger))
    }

    pub fn register_logger_arc(&self, floor: LogSeverity, logger: crate::event::Logger) -> HandlerId {
        let guard = self.enter(LOGGER_OR_LISTENER, "register_logger");
        let id = guard.state().events.register_logger(self.plugin_id(), floor, logger);
        guard.debug(&format!("{} registered a logger", self.owner_name()));
        id
    }

    pub fn unregister_logger(&self, id: HandlerId) -> bool {
        let guard = self.enter(LOGGER_OR_LISTENER, "unregister_logger");
        let removed = guard.state().events.unregister_logger(id);
        removed
    }

    /// Log a message attributed to this context.
    pub fn log(&self, severity: LogSeverity, message: &str) {
        let guard = self.enter(LOGGER, "log");
        guard.log(severity, self.plugin_id(), message);
    }

    /// Whether a message of `severity` would reach any registered logger.
    pub fn is_logged(&self, severity: LogSeverity) -> bool {
        let guard = self.enter(&[], "is_logged");
        let logged = guard.state().events.is_logged(severity);
        logged
    }

    /// Register a listener for plugin state changes.
    pub fn register_listener<F>(&self, listener: F) -> HandlerId
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        let guard = self.enter(LOGGER_OR_LISTENER, "register_listener");
        let id = guard.state().events.register_listener(self.plugin_id(), Arc::new(listener));
        guard.debug(&format!("{} registered an event listener", self.owner_name()));
        id
    }

    pub fn unregister_listener(&self, id: HandlerId) -> bool {
        let guard = self.enter(LOGGER_OR_LISTENER, "unregister_listener");
        let removed = guard.state().events.unregister_listener(id);
        removed
    }

    fn owner_name(&self) -> String {
        match &self.holder {
            Holder::Main => "The main program".to_string(),
            Holder::Plugin(id) => format!("Plugin {}", id),
        }
    }

    fn register_descriptor(guard: &EnvGuard<'_>, descriptor: PluginDescriptor) -> Arc<PluginDescriptor> {
        let descriptor = Arc::new(descriptor);
        guard.state().infos.register("plugin descriptor", &descriptor, Teardown::Drop);
        descriptor
    }

    /// Load the descriptor of the plugin stored in `dir`.
    ///
    /// The returned descriptor is usage tracked; release it with
    /// [`Context::release_info`].
    pub fn load_plugin_descriptor(&self, dir: impl AsRef<Path>) -> Result<Arc<PluginDescriptor>> {
        let dir = dir.as_ref();
        let guard = self.enter(LOGGER_OR_LISTENER, "load_plugin_descriptor");
        match parser::load_from_dir(self.env.parser.as_ref(), dir) {
            Ok(descriptor) => Ok(Self::register_descriptor(&guard, descriptor)),
            Err(e) => {
                guard.error(&format!("Could not load a plugin descriptor from {}: {}", dir.display(), e));
                Err(e)
            }
        }
    }

    /// Parse a descriptor held in memory.
    pub fn load_plugin_descriptor_from_memory(&self, data: &[u8], format: ConfigFormat) -> Result<Arc<PluginDescriptor>> {
        let guard = self.enter(LOGGER_OR_LISTENER, "load_plugin_descriptor_from_memory");
        match self.env.parser.parse(data, format, None) {
            Ok(descriptor) => Ok(Self::register_descriptor(&guard, descriptor)),
            Err(e) => {
                guard.error(&format!("Could not parse a plugin descriptor: {}", e));
                Err(e)
            }
        }
    }

    /// Install a plugin. Fails with a conflict if the identifier or one of
    /// its extension points is already installed.
    pub fn install_plugin(&self, descriptor: &Arc<PluginDescriptor>) -> Result<()> {
        let guard = self.enter(ANY, "install_plugin");
        guard.install(descriptor)
    }

    /// Uninstall a plugin, stopping and unresolving it first.
    pub fn uninstall_plugin(&self, id: &str) -> Result<()> {
        let guard = self.enter(ANY, "uninstall_plugin");
        guard.uninstall(id)
    }

    /// Stop every plugin and uninstall all of them.
    pub fn uninstall_plugins(&self) {
        let guard = self.enter(ANY, "uninstall_plugins");
        guard.uninstall_all();
    }

    /// Install or upgrade plugins found in the registered collections.
    pub fn scan_plugins(&self, flags: ScanFlags) -> Result<()> {
        let guard = self.enter(ANY, "scan_plugins");
        guard.scan(flags)
    }

    /// Start a plugin and everything it imports.
    pub fn start_plugin(&self, id: &str) -> Result<()> {
        let guard = self.enter(ANY, "start_plugin");
        guard.start_plugin(id)
    }

    /// Stop a plugin and every plugin depending on it.
    pub fn stop_plugin(&self, id: &str) -> Result<()> {
        let guard = self.enter(ANY, "stop_plugin");
        guard.stop_plugin(id)
    }

    /// Stop every active plugin in reverse activation order.
    pub fn stop_plugins(&self) {
        let guard = self.enter(ANY, "stop_plugins");
        guard.stop_all();
    }

    /// Current state of a plugin; unknown plugins are reported Uninstalled.
    pub fn plugin_state(&self, id: &str) -> PluginState {
        let guard = self.enter(LOGGER, "plugin_state");
        let state = guard.state().plugin_state(id);
        state
    }

    /// Descriptor of an installed plugin. Release it with [`Context::release_info`].
    pub fn plugin_info(&self, id: &str) -> Result<Arc<PluginDescriptor>> {
        let guard = self.enter(LOGGER, "plugin_info");
        let mut state = guard.state();
        let descriptor = match state.plugins.get(id) {
            Some(plugin) => Arc::clone(&plugin.descriptor),
            None => return Err(crate::kernel::error::Error::unknown_plugin(id)),
        };
        state.infos.use_info(info_key(&descriptor));
        Ok(descriptor)
    }

    /// Descriptors of every installed plugin, sorted by identifier.
    pub fn plugins_info(&self) -> Arc<Vec<Arc<PluginDescriptor>>> {
        let guard = self.enter(LOGGER, "plugins_info");
        let mut state = guard.state();
        let mut descriptors: Vec<Arc<PluginDescriptor>> = state.plugins.values().map(|p| Arc::clone(&p.descriptor)).collect();
        descriptors.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let keys: Vec<_> = descriptors.iter().map(info_key).collect();
        for key in &keys {
            state.infos.use_info(*key);
        }
        let list = Arc::new(descriptors);
        state.infos.register("plugin information list", &list, Teardown::Release(keys));
        list
    }

    /// Every installed extension point, sorted by identifier.
    pub fn ext_points_info(&self) -> Arc<Vec<ExtensionPoint>> {
        let guard = self.enter(LOGGER, "ext_points_info");
        let mut state = guard.state();
        let mut points: Vec<ExtensionPoint> = state
            .plugins
            .values()
            .flat_map(|p| p.descriptor.ext_points.iter().cloned())
            .collect();
        points.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let list = Arc::new(points);
        state.infos.register("extension point information list", &list, Teardown::Drop);
        list
    }

    /// Installed extensions, either all of them or only those attached to
    /// `point_id`, in installation order.
    pub fn extensions_info(&self, point_id: Option<&str>) -> Arc<Vec<Extension>> {
        let guard = self.enter(LOGGER, "extensions_info");
        let mut state = guard.state();
        let collect = |entries: &[(String, usize)], out: &mut Vec<Extension>| {
            for (plugin_id, index) in entries {
                if let Some(ext) = state.plugins.get(plugin_id).and_then(|p| p.descriptor.extensions.get(*index)) {
                    out.push(ext.clone());
                }
            }
        };
        let mut extensions = Vec::new();
        match point_id {
            Some(point) => {
                if let Some(entries) = state.extensions.get(point) {
                    collect(entries, &mut extensions);
                }
            }
            None => {
                let mut points: Vec<&String> = state.extensions.keys().collect();
                points.sort();
                for point in points {
                    collect(&state.extensions[point], &mut extensions);
                }
            }
        }
        let list = Arc::new(extensions);
        state.infos.register("extension information list", &list, Teardown::Drop);
        list
    }

    /// Release an object obtained from one of the info functions or
    /// descriptor loaders.
    pub fn release_info<T: Any + Send + Sync>(&self, info: &Arc<T>) {
        let guard = self.enter(LOGGER, "release_info");
        guard.state().infos.release(info_key(info));
    }

    /// Queue a function to be run by the host's run loop. Returning `true`
    /// requests another run. Only plugin contexts may register run functions.
    pub fn register_run_function<F>(&self, func: F) -> Result<()>
    where
        F: Fn(&crate::plugin_system::traits::InstanceData) -> bool + Send + Sync + 'static,
    {
        self.register_run_function_arc(Arc::new(func))
    }

    pub fn register_run_function_arc(&self, func: RunFunction) -> Result<()> {
        let plugin_id = self.require_plugin("register_run_function").to_string();
        let guard = self.enter(&[Invocation::Logger, Invocation::Listener, Invocation::Stop], "register_run_function");
        guard.register_run_function(&plugin_id, func)
    }

    /// Run one queued run function. Returns whether more remain.
    pub fn run_plugins_step(&self) -> bool {
        let guard = self.enter(ANY, "run_plugins_step");
        guard.run_step()
    }

    /// Run queued run functions until none remain.
    pub fn run_plugins(&self) {
        while self.run_plugins_step() {}
    }

    /// Set the startup arguments made available to plugins.
    pub fn set_args(&self, args: Vec<String>) {
        let guard = self.enter(LOGGER_OR_LISTENER, "set_args");
        guard.state().args = args;
    }

    pub fn args(&self) -> Vec<String> {
        let guard = self.enter(LOGGER, "args");
        let args = guard.state().args.clone();
        args
    }

    /// Define a symbol other plugins can resolve from this plugin.
    pub fn define_symbol(&self, name: &str, address: SymbolAddress) -> Result<()> {
        let plugin_id = self.require_plugin("define_symbol").to_string();
        let guard = self.enter(LOGGER_OR_LISTENER, "define_symbol");
        guard.define_symbol(&plugin_id, name, address)
    }

    /// Resolve a symbol provided by another plugin, starting it if needed.
    /// Every resolved symbol must be released with [`Context::release_symbol`].
    pub fn resolve_symbol(&self, provider_id: &str, name: &str) -> Result<SymbolAddress> {
        let guard = self.enter(LOGGER_OR_LISTENER, "resolve_symbol");
        guard.resolve_symbol(&self.holder, provider_id, name)
    }

    /// Release a symbol obtained from [`Context::resolve_symbol`].
    pub fn release_symbol(&self, address: SymbolAddress) -> Result<()> {
        let guard = self.enter(LOGGER_OR_LISTENER, "release_symbol");
        guard.release_symbol(&self.holder, address)
    }
}
