//! Dependency resolution.
//!
//! Resolving walks the import graph depth first. Each plugin reached for the
//! first time is marked visited, its imports are resolved recursively and
//! its runtime library is loaded; the plugin itself stays Installed. A plugin
//! reached again while it is still being visited closes a cycle and yields a
//! preliminary success instead of recursing. When the walk succeeds every
//! visited plugin is committed to Resolved, dependencies first. When it
//! fails the edges added by the walk are severed and loaded runtimes are
//! dropped, leaving every visited plugin Installed.
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::environment::EnvGuard;
use crate::kernel::constants::FRAMEWORK_VERSION;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::version::{satisfies_import, PluginVersion};

/// Outcome of the preliminary pass for one plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preliminary {
    /// The plugin and its imports are resolvable
    Full,
    /// Resolvable provided a plugin still being visited up the stack is
    Cycle,
}

#[derive(Default)]
struct Walk {
    visited: HashSet<String>,
    order: Vec<String>,
}

impl Walk {
    fn visit(&mut self, id: &str) -> bool {
        if self.visited.insert(id.to_string()) {
            self.order.push(id.to_string());
            true
        } else {
            false
        }
    }
}

impl EnvGuard<'_> {
    /// Resolve a plugin and everything it imports.
    pub(crate) fn resolve_plugin(&self, id: &str) -> Result<()> {
        let mut walk = Walk::default();
        match self.resolve_preliminary(id, &mut walk) {
            // Nothing above the root can complete a cycle, so a preliminary
            // success at the top is a full one.
            Ok(_) => {
                let mut committed = HashSet::new();
                self.commit_resolved(id, &walk, &mut committed);
                Ok(())
            }
            Err(e) => {
                self.fail_resolved(&walk);
                Err(e)
            }
        }
    }

    fn resolve_preliminary(&self, id: &str, walk: &mut Walk) -> Result<Preliminary> {
        let descriptor = {
            let state = self.state();
            let Some(plugin) = state.plugins.get(id) else {
                return Err(Error::unknown_plugin(id));
            };
            if plugin.state >= PluginState::Resolved {
                return Ok(Preliminary::Full);
            }
            Arc::clone(&plugin.descriptor)
        };
        if !walk.visit(id) {
            return Ok(Preliminary::Cycle);
        }

        self.check_framework(&descriptor)?;

        let mut outcome = Preliminary::Full;
        for import in &descriptor.imports {
            let provider = {
                let state = self.state();
                state.plugins.get(&import.plugin_id).map(|p| Arc::clone(&p.descriptor))
            };
            let Some(provider) = provider else {
                if import.optional {
                    continue;
                }
                self.error(&format!(
                    "Plugin {} could not be resolved because it depends on plugin {} which is not installed",
                    id, import.plugin_id
                ));
                return Err(DependencyError::MissingPlugin {
                    plugin_id: id.to_string(),
                    import_id: import.plugin_id.clone(),
                }
                .into());
            };

            if let Some(required) = &import.version {
                if !satisfies_import(required, provider.version.as_ref(), provider.abi_bw_compatibility.as_ref()) {
                    self.error(&format!(
                        "Plugin {} could not be resolved because of incompatible version of plugin {}",
                        id, import.plugin_id
                    ));
                    return Err(DependencyError::IncompatibleVersion {
                        plugin_id: id.to_string(),
                        import_id: import.plugin_id.clone(),
                        required: required.to_string(),
                        actual: provider.version.as_ref().map(|v| v.to_string()),
                        floor: provider.abi_bw_compatibility.as_ref().map(|v| v.to_string()),
                    }
                    .into());
                }
            }

            self.add_edge(id, &import.plugin_id);
            match self.resolve_preliminary(&import.plugin_id, walk) {
                Ok(Preliminary::Full) => {}
                Ok(Preliminary::Cycle) => outcome = Preliminary::Cycle,
                Err(e) => {
                    self.error(&format!(
                        "Plugin {} could not be resolved because it depends on plugin {} which could not be resolved",
                        id, import.plugin_id
                    ));
                    return Err(e);
                }
            }
        }

        self.load_runtime(&descriptor)?;
        Ok(outcome)
    }

    fn check_framework(&self, descriptor: &PluginDescriptor) -> Result<()> {
        let Some(required) = &descriptor.required_framework else {
            return Ok(());
        };
        let running = PluginVersion::parse(FRAMEWORK_VERSION).ok();
        if running.as_ref().is_some_and(|r| r >= required) {
            return Ok(());
        }
        self.error(&format!(
            "Plugin {} could not be resolved because it requires framework version {}",
            descriptor.identifier, required
        ));
        Err(DependencyError::IncompatibleFramework {
            plugin_id: descriptor.identifier.clone(),
            required: required.to_string(),
            running: FRAMEWORK_VERSION.to_string(),
        }
        .into())
    }

    fn load_runtime(&self, descriptor: &PluginDescriptor) -> Result<()> {
        let id = descriptor.identifier.as_str();
        let Some(runtime_ref) = &descriptor.runtime else {
            return Ok(());
        };
        if self.state().plugins.get(id).is_some_and(|p| p.library.is_some()) {
            return Ok(());
        }

        let library = self
            .env()
            .loader
            .open(descriptor.plugin_path.as_deref(), &runtime_ref.library)
            .map_err(|e| {
                self.error(&format!("Could not load the runtime library of plugin {}: {}", id, e));
                Error::loader(id, e)
            })?;
        let runtime = match &runtime_ref.funcs {
            Some(funcs) => Some(library.runtime(funcs).map_err(|e| {
                self.error(&format!("Could not find the runtime functions of plugin {}: {}", id, e));
                Error::loader(id, e)
            })?),
            None => None,
        };

        let mut state = self.state();
        if let Some(plugin) = state.plugins.get_mut(id) {
            plugin.runtime = runtime;
            plugin.library = Some(library);
        }
        Ok(())
    }

    /// Add the import edge `importer -> provider` unless present.
    pub(crate) fn add_edge(&self, importer: &str, provider: &str) {
        let mut state = self.state();
        let added = match state.plugins.get_mut(importer) {
            Some(p) if !p.imports(provider) => {
                p.imported.push(provider.to_string());
                true
            }
            _ => false,
        };
        if added {
            if let Some(p) = state.plugins.get_mut(provider) {
                p.importing.push(importer.to_string());
            }
        }
    }

    /// Remove the import edge `importer -> provider`.
    pub(crate) fn remove_edge(&self, importer: &str, provider: &str) {
        let mut state = self.state();
        if let Some(p) = state.plugins.get_mut(importer) {
            p.imported.retain(|i| i != provider);
        }
        if let Some(p) = state.plugins.get_mut(provider) {
            p.importing.retain(|i| i != importer);
        }
    }

    fn commit_resolved(&self, id: &str, walk: &Walk, committed: &mut HashSet<String>) {
        if !walk.visited.contains(id) || !committed.insert(id.to_string()) {
            return;
        }
        let imported = self.state().plugins.get(id).map(|p| p.imported.clone()).unwrap_or_default();
        for provider in &imported {
            self.commit_resolved(provider, walk, committed);
        }
        self.debug(&format!("Plugin {} resolved", id));
        self.set_state(id, PluginState::Resolved);
    }

    fn fail_resolved(&self, walk: &Walk) {
        for id in &walk.order {
            let imported = {
                let mut state = self.state();
                match state.plugins.get_mut(id) {
                    Some(plugin) => {
                        plugin.runtime = None;
                        plugin.library = None;
                        std::mem::take(&mut plugin.imported)
                    }
                    None => continue,
                }
            };
            for provider in imported {
                let mut state = self.state();
                if let Some(p) = state.plugins.get_mut(&provider) {
                    p.importing.retain(|i| i != id);
                }
            }
        }
    }

    /// Stop a plugin together with its dependents and return all of them to
    /// Installed.
    pub(crate) fn unresolve_plugin(&self, id: &str) {
        // Unknown plugins are not reachable here: callers check first.
        let _ = self.stop_plugin(id);
        self.unresolve_rec(id);
    }

    fn unresolve_rec(&self, id: &str) {
        self.settle(id);
        let imported = {
            let mut state = self.state();
            match state.plugins.get_mut(id) {
                Some(plugin) if plugin.state >= PluginState::Resolved => std::mem::take(&mut plugin.imported),
                _ => return,
            }
        };
        for provider in imported {
            let mut state = self.state();
            if let Some(p) = state.plugins.get_mut(&provider) {
                p.importing.retain(|i| i != id);
            }
        }

        loop {
            let importer = self.state().plugins.get(id).and_then(|p| p.importing.first().cloned());
            let Some(importer) = importer else {
                break;
            };
            self.remove_edge(&importer, id);
            self.unresolve_rec(&importer);
        }

        self.destroy_instance(id);
        {
            let mut state = self.state();
            if let Some(plugin) = state.plugins.get_mut(id) {
                // runtime first: it may still reference the library
                plugin.runtime = None;
                plugin.library = None;
            }
        }
        self.debug(&format!("Plugin {} unresolved", id));
        self.set_state(id, PluginState::Installed);
    }
}
