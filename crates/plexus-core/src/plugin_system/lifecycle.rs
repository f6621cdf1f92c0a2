//! Start and stop propagation.
//!
//! Starting a plugin resolves it, starts its imports depth first and then
//! runs its own start sequence. Stopping a plugin first stops everything
//! that imports it. Hooks run with the environment unlocked; while a hook of
//! a plugin runs, the plugin's `transition_owner` names the thread running
//! it and other threads wait for the transition to finish before touching
//! the plugin.
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use crate::context::environment::{EnvGuard, Holder, Invocation};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::traits::{InstanceData, PluginRuntime};

impl EnvGuard<'_> {
    /// Wait until no other thread is in the middle of a transition of `id`.
    pub(crate) fn settle(&self, id: &str) {
        let me = thread::current().id();
        loop {
            let busy = self
                .state()
                .plugins
                .get(id)
                .is_some_and(|p| p.transition_owner.is_some_and(|owner| owner != me));
            if !busy {
                return;
            }
            self.wait();
        }
    }

    fn begin_transition(&self, id: &str) {
        let me = thread::current().id();
        if let Some(plugin) = self.state().plugins.get_mut(id) {
            plugin.transition_owner = Some(me);
        }
    }

    fn end_transition(&self, id: &str) {
        if let Some(plugin) = self.state().plugins.get_mut(id) {
            plugin.transition_owner = None;
        }
        self.signal();
    }

    /// Start a plugin together with its imports. If a start hook fails,
    /// every plugin this call activated is stopped again.
    pub(crate) fn start_plugin(&self, id: &str) -> Result<()> {
        if !self.state().plugins.contains_key(id) {
            self.warn(&format!("Unknown plugin {} could not be started", id));
            return Err(Error::unknown_plugin(id));
        }
        self.settle(id);
        self.resolve_plugin(id)?;

        let mut importing = Vec::new();
        let mut activated = Vec::new();
        let result = self.start_rec(id, &mut importing, &mut activated);
        if result.is_err() {
            for started in activated.iter().rev() {
                self.debug(&format!("Stopping plugin {} to roll back a failed start", started));
                let _ = self.stop_plugin(started);
            }
        }
        result
    }

    fn start_rec(&self, id: &str, importing: &mut Vec<String>, activated: &mut Vec<String>) -> Result<()> {
        self.settle(id);
        let me = thread::current().id();
        let (state, owned, imported) = {
            let state = self.state();
            let Some(plugin) = state.plugins.get(id) else {
                return Err(Error::unknown_plugin(id));
            };
            (plugin.state, plugin.transition_owner == Some(me), plugin.imported.clone())
        };

        if state == PluginState::Active {
            return Ok(());
        }
        if owned {
            if state == PluginState::Stopping {
                return Err(Error::runtime(id, "plugin is being stopped"));
            }
            // Re-entered from one of the plugin's own hooks. The outer
            // start completes the transition.
            self.debug(&format!("Plugin {} is already being started", id));
            return Ok(());
        }
        if state < PluginState::Resolved {
            self.resolve_plugin(id)?;
        }
        if importing.iter().any(|i| i == id) {
            self.debug(&format!("Dependency loop detected while starting plugin {}", id));
            return Ok(());
        }

        importing.push(id.to_string());
        let mut result = Ok(());
        for provider in &imported {
            result = self.start_rec(provider, importing, activated);
            if result.is_err() {
                break;
            }
        }
        importing.pop();
        result?;

        // Imports ran hooks unlocked; the plugin may have moved meanwhile.
        self.settle(id);
        match self.state().plugin_state(id) {
            PluginState::Resolved => {}
            PluginState::Active | PluginState::Starting => return Ok(()),
            other => return Err(Error::runtime(id, format!("plugin is {} and cannot be started", other))),
        }
        self.start_runtime(id, activated)
    }

    fn start_runtime(&self, id: &str, activated: &mut Vec<String>) -> Result<()> {
        self.begin_transition(id);
        let runtime = self.state().plugins.get(id).and_then(|p| p.runtime.clone());

        let instance = match &runtime {
            Some(runtime) => match self.create_instance(id, runtime) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    self.end_transition(id);
                    return Err(e);
                }
            },
            None => None,
        };

        self.state().started.push(id.to_string());

        if let (Some(runtime), Some(instance)) = (&runtime, &instance) {
            if runtime.has_start() {
                self.debug(&format!("Starting plugin {}", id));
                self.set_state(id, PluginState::Starting);
                let started = self.invoke(Invocation::Start, || self.unlocked(|| runtime.start(instance)));
                if let Err(message) = started {
                    self.error(&format!("Plugin {} failed to start: {}", id, message));
                    self.roll_back_start(id, runtime.as_ref(), instance);
                    return Err(Error::runtime(id, message));
                }
            }
        }

        self.end_transition(id);
        self.info(&format!("Plugin {} started", id));
        self.set_state(id, PluginState::Active);
        activated.push(id.to_string());
        Ok(())
    }

    fn create_instance(&self, id: &str, runtime: &Arc<dyn PluginRuntime>) -> Result<InstanceData> {
        if let Some(existing) = self.state().plugins.get(id).and_then(|p| p.instance.clone()) {
            return Ok(existing);
        }
        let ctx = self.new_plugin_context(id);
        let created = self.invoke(Invocation::Create, || self.unlocked(|| runtime.create(&ctx)));
        match created {
            Ok(instance) => {
                if let Some(plugin) = self.state().plugins.get_mut(id) {
                    plugin.instance = Some(Arc::clone(&instance));
                }
                Ok(instance)
            }
            Err(message) => {
                self.error(&format!("Plugin {} could not create its instance: {}", id, message));
                self.retire_context(id);
                Err(Error::runtime(id, message))
            }
        }
    }

    fn roll_back_start(&self, id: &str, runtime: &dyn PluginRuntime, instance: &InstanceData) {
        self.drain_run_functions(id);
        let has_stop = runtime.has_stop();
        if has_stop {
            self.set_state(id, PluginState::Stopping);
            self.invoke(Invocation::Stop, || self.unlocked(|| runtime.stop(instance)));
        }
        self.retire_symbols(id, has_stop);
        self.destroy_instance(id);
        self.state().started.retain(|s| s != id);
        self.end_transition(id);
        self.set_state(id, PluginState::Resolved);
    }

    /// Destroy the plugin instance and invalidate its context.
    pub(crate) fn destroy_instance(&self, id: &str) {
        let taken = {
            let mut state = self.state();
            state.plugins.get_mut(id).and_then(|p| match (p.instance.take(), p.runtime.clone()) {
                (Some(instance), Some(runtime)) => Some((instance, runtime)),
                _ => None,
            })
        };
        if let Some((instance, runtime)) = taken {
            self.invoke(Invocation::Destroy, || runtime.destroy(instance));
        }
        self.retire_context(id);
    }

    fn retire_context(&self, id: &str) {
        let mut state = self.state();
        if let Some(plugin) = state.plugins.get_mut(id) {
            plugin.context_generation = None;
            plugin.instance = None;
        }
        state.holders.remove(&Holder::Plugin(id.to_string()));
        state.events.remove_owned_by(id);
    }

    /// Stop a plugin and, first, every plugin importing it.
    pub(crate) fn stop_plugin(&self, id: &str) -> Result<()> {
        if !self.state().plugins.contains_key(id) {
            self.warn(&format!("Unknown plugin {} could not be stopped", id));
            return Err(Error::unknown_plugin(id));
        }
        let mut processed = HashSet::new();
        self.stop_rec(id, &mut processed);
        Ok(())
    }

    fn stop_rec(&self, id: &str, processed: &mut HashSet<String>) {
        self.settle(id);
        if self.state().plugin_state(id) != PluginState::Active {
            return;
        }
        if !processed.insert(id.to_string()) {
            return;
        }

        let importing = self.state().plugins.get(id).map(|p| p.importing.clone()).unwrap_or_default();
        for importer in &importing {
            self.stop_rec(importer, processed);
        }

        self.settle(id);
        if self.state().plugin_state(id) == PluginState::Active {
            self.stop_runtime(id);
        }
    }

    fn stop_runtime(&self, id: &str) {
        self.begin_transition(id);
        self.drain_run_functions(id);

        let hooks = {
            let state = self.state();
            state
                .plugins
                .get(id)
                .and_then(|p| Some((p.runtime.clone()?, p.instance.clone()?)))
        };
        let mut has_stop = false;
        if let Some((runtime, instance)) = hooks {
            if runtime.has_stop() {
                has_stop = true;
                self.debug(&format!("Stopping plugin {}", id));
                self.set_state(id, PluginState::Stopping);
                self.invoke(Invocation::Stop, || self.unlocked(|| runtime.stop(&instance)));
            }
        }

        self.retire_symbols(id, has_stop);
        self.state().started.retain(|s| s != id);
        self.end_transition(id);
        self.info(&format!("Plugin {} stopped", id));
        self.set_state(id, PluginState::Resolved);
    }

    /// Stop all started plugins in reverse activation order.
    pub(crate) fn stop_all(&self) {
        loop {
            let last = self.state().started.last().cloned();
            let Some(id) = last else {
                break;
            };
            let _ = self.stop_plugin(&id);
            // A plugin still Starting after its own stop is being started by
            // this thread further up the stack; it is not ours to stop.
            let stuck = self.state().started.last() == Some(&id);
            if stuck {
                self.warn(&format!("Plugin {} could not be stopped", id));
                break;
            }
        }
    }
}
