use std::sync::Arc;

use crate::context::environment::EnvGuard;
use crate::context::info::{info_key, Teardown};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::plugin::{Plugin, PluginState};

impl EnvGuard<'_> {
    /// Install a plugin and register its extension points and extensions.
    pub(crate) fn install(&self, descriptor: &Arc<PluginDescriptor>) -> Result<()> {
        let id = descriptor.identifier.as_str();
        let conflict = {
            let state = self.state();
            if state.plugins.contains_key(id) {
                Some(format!("plugin '{}' is already installed", id))
            } else {
                descriptor
                    .ext_points
                    .iter()
                    .find_map(|ep| {
                        state
                            .ext_points
                            .get(&ep.identifier)
                            .map(|owner| format!("extension point '{}' is already installed by plugin '{}'", ep.identifier, owner))
                    })
            }
        };
        if let Some(message) = conflict {
            self.error(&format!("Plugin {} could not be installed: {}", id, message));
            return Err(Error::conflict(message));
        }

        {
            let mut state = self.state();
            let key = info_key(descriptor);
            if state.infos.contains(key) {
                state.infos.use_info(key);
            } else {
                state.infos.register("plugin descriptor", descriptor, Teardown::Drop);
            }
            for ep in &descriptor.ext_points {
                state.ext_points.insert(ep.identifier.clone(), id.to_string());
            }
            for (index, ext) in descriptor.extensions.iter().enumerate() {
                state
                    .extensions
                    .entry(ext.point_id.clone())
                    .or_default()
                    .push((id.to_string(), index));
            }
            state.plugins.insert(id.to_string(), Plugin::new(Arc::clone(descriptor)));
        }

        match &descriptor.version {
            Some(version) => self.info(&format!("Plugin {} {} was installed", id, version)),
            None => self.info(&format!("Plugin {} was installed", id)),
        }
        self.notify_state(id, PluginState::Uninstalled, PluginState::Installed);
        Ok(())
    }

    /// Stop, unresolve and remove a plugin.
    pub(crate) fn uninstall(&self, id: &str) -> Result<()> {
        if !self.state().plugins.contains_key(id) {
            self.warn(&format!("Unknown plugin {} could not be uninstalled", id));
            return Err(Error::unknown_plugin(id));
        }
        self.unresolve_plugin(id);

        let removed = {
            let mut state = self.state();
            let Some(plugin) = state.plugins.remove(id) else {
                return Ok(());
            };
            for ep in &plugin.descriptor.ext_points {
                state.ext_points.remove(&ep.identifier);
            }
            for ext in &plugin.descriptor.extensions {
                if let Some(entries) = state.extensions.get_mut(&ext.point_id) {
                    entries.retain(|(owner, _)| owner != id);
                    if entries.is_empty() {
                        state.extensions.remove(&ext.point_id);
                    }
                }
            }
            plugin
        };

        self.info(&format!("Plugin {} was uninstalled", id));
        self.notify_state(id, PluginState::Installed, PluginState::Uninstalled);
        self.state().infos.release(info_key(&removed.descriptor));
        Ok(())
    }

    /// Stop every plugin, then uninstall all of them.
    pub(crate) fn uninstall_all(&self) {
        self.stop_all();
        loop {
            let next = self.state().plugins.keys().next().cloned();
            let Some(id) = next else {
                break;
            };
            if let Err(e) = self.uninstall(&id) {
                self.error(&format!("Plugin {} could not be uninstalled: {}", id, e));
                break;
            }
        }
    }
}
