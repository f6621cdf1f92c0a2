//! Collection scanning and upgrade policy.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::environment::EnvGuard;
use crate::context::info::{info_key, Teardown};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::parser;
use crate::plugin_system::plugin::PluginState;
use crate::utils::fs::list_subdirectories;

/// Policy applied by a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFlags {
    /// Replace installed plugins with newer versions found on disk
    pub upgrade: bool,
    /// Stop every plugin before the first upgrade
    pub stop_all_on_upgrade: bool,
    /// Stop every plugin before the first new installation
    pub stop_all_on_install: bool,
    /// Start again the plugins that were active before the scan
    pub restart_active: bool,
}

impl ScanFlags {
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn stop_all_on_upgrade(mut self) -> Self {
        self.stop_all_on_upgrade = true;
        self
    }

    pub fn stop_all_on_install(mut self) -> Self {
        self.stop_all_on_install = true;
        self
    }

    pub fn restart_active(mut self) -> Self {
        self.restart_active = true;
        self
    }
}

/// Records the most serious failure of a scan while it carries on.
#[derive(Default)]
struct Outcome {
    worst: Option<Error>,
}

impl Outcome {
    fn record(&mut self, error: Error) {
        let worse = match &self.worst {
            Some(current) => error.kind() > current.kind(),
            None => true,
        };
        if worse {
            self.worst = Some(error);
        }
    }

    fn finish(self) -> Result<()> {
        match self.worst {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl EnvGuard<'_> {
    /// Install the newest plugins found in the registered collections.
    pub(crate) fn scan(&self, flags: ScanFlags) -> Result<()> {
        self.debug("Scanning plugin collections");
        let mut outcome = Outcome::default();

        let (candidates, order) = self.collect_candidates(&mut outcome);

        let to_restart: Vec<String> = if flags.restart_active {
            let state = self.state();
            state
                .started
                .iter()
                .filter(|id| matches!(state.plugin_state(id), PluginState::Active | PluginState::Starting))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let mut stopped_all = false;
        for id in &order {
            let Some(descriptor) = candidates.get(id) else {
                continue;
            };
            let installed = {
                let state = self.state();
                state.plugins.get(id).map(|p| p.descriptor.version.clone())
            };
            match installed {
                Some(installed_version) => {
                    if !flags.upgrade || descriptor.version <= installed_version {
                        continue;
                    }
                    if flags.stop_all_on_upgrade && !stopped_all {
                        self.stop_all();
                        stopped_all = true;
                    }
                    self.info(&format!("Upgrading plugin {}", id));
                    if let Err(e) = self.uninstall(id) {
                        outcome.record(e);
                        continue;
                    }
                    if let Err(e) = self.install(descriptor) {
                        outcome.record(e);
                    }
                }
                None => {
                    if flags.stop_all_on_install && !stopped_all {
                        self.stop_all();
                        stopped_all = true;
                    }
                    if let Err(e) = self.install(descriptor) {
                        outcome.record(e);
                    }
                }
            }
        }

        {
            let mut state = self.state();
            for descriptor in candidates.values() {
                state.infos.release(info_key(descriptor));
            }
        }

        for id in &to_restart {
            if self.state().plugins.contains_key(id) {
                if let Err(e) = self.start_plugin(id) {
                    outcome.record(e);
                }
            }
        }

        self.debug("Plugin collection scan finished");
        outcome.finish()
    }

    /// Load every descriptor of every collection, keeping the highest
    /// version of each identifier. Kept descriptors are registered as
    /// information objects; the caller releases them.
    fn collect_candidates(&self, outcome: &mut Outcome) -> (HashMap<String, Arc<PluginDescriptor>>, Vec<String>) {
        let collections: Vec<PathBuf> = self.state().collections.clone();
        let parser = Arc::clone(&self.env().parser);
        let mut candidates: HashMap<String, Arc<PluginDescriptor>> = HashMap::new();
        let mut order = Vec::new();

        for collection in &collections {
            let dirs = match list_subdirectories(collection) {
                Ok(dirs) => dirs,
                Err(e) => {
                    self.error(&format!("Could not read plugin collection {}: {}", collection.display(), e));
                    outcome.record(e);
                    continue;
                }
            };
            for dir in dirs {
                let descriptor = match parser::load_from_dir(parser.as_ref(), &dir) {
                    Ok(descriptor) => Arc::new(descriptor),
                    Err(e) => {
                        self.error(&format!("Could not load a plugin descriptor from {}: {}", dir.display(), e));
                        outcome.record(e);
                        continue;
                    }
                };
                let id = descriptor.identifier.clone();
                let replaced = match candidates.get(&id) {
                    Some(current) if descriptor.version <= current.version => continue,
                    Some(current) => Some(Arc::clone(current)),
                    None => None,
                };

                let mut state = self.state();
                state.infos.register("plugin descriptor", &descriptor, Teardown::Drop);
                match replaced {
                    Some(old) => state.infos.release(info_key(&old)),
                    None => order.push(id.clone()),
                }
                candidates.insert(id, descriptor);
            }
        }
        (candidates, order)
    }
}
