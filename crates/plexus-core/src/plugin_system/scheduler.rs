//! Cooperative run-function queue.
//!
//! Plugins queue functions that the host runs one at a time from its own
//! loop. A function is taken off the queue before it runs, runs with the
//! environment unlocked and is appended again if it asks to run once more.
//! Stopping a plugin drops its queued functions and waits for the ones
//! currently running.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::context::environment::EnvGuard;
use crate::kernel::error::{Error, Result};
use crate::kernel::fatal::fatal;
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::traits::InstanceData;

/// A unit of work registered by a plugin. Returning `true` asks to be run
/// again.
pub type RunFunction = Arc<dyn Fn(&InstanceData) -> bool + Send + Sync>;

pub(crate) struct RunEntry {
    pub seq: u64,
    pub plugin_id: String,
    pub func: RunFunction,
}

pub(crate) struct Executing {
    pub seq: u64,
    pub plugin_id: String,
    pub thread: ThreadId,
    pub func: RunFunction,
}

impl EnvGuard<'_> {
    pub(crate) fn register_run_function(&self, plugin_id: &str, func: RunFunction) -> Result<()> {
        let mut state = self.state();
        let plugin_state = state.plugin_state(plugin_id);
        if plugin_state != PluginState::Active && plugin_state != PluginState::Starting {
            drop(state);
            self.error(&format!("Plugin {} tried to register a run function while {}", plugin_id, plugin_state));
            return Err(Error::runtime(plugin_id, "run functions can only be registered while starting or active"));
        }
        let queued = state
            .run_queue
            .iter()
            .any(|e| e.plugin_id == plugin_id && Arc::ptr_eq(&e.func, &func))
            || state
                .executing
                .iter()
                .any(|e| e.plugin_id == plugin_id && Arc::ptr_eq(&e.func, &func));
        if queued {
            return Ok(());
        }
        let seq = state.next_run_seq;
        state.next_run_seq += 1;
        state.run_queue.push_back(RunEntry {
            seq,
            plugin_id: plugin_id.to_string(),
            func,
        });
        Ok(())
    }

    /// Run the function at the head of the queue. Returns whether more
    /// functions are waiting.
    pub(crate) fn run_step(&self) -> bool {
        let (entry, instance) = {
            let mut state = self.state();
            let Some(entry) = state.run_queue.pop_front() else {
                return false;
            };
            let instance = state.plugins.get(&entry.plugin_id).and_then(|p| p.instance.clone());
            let Some(instance) = instance else {
                return !state.run_queue.is_empty();
            };
            state.executing.push(Executing {
                seq: entry.seq,
                plugin_id: entry.plugin_id.clone(),
                thread: thread::current().id(),
                func: Arc::clone(&entry.func),
            });
            (entry, instance)
        };

        let func = Arc::clone(&entry.func);
        let outcome = self.unlocked(|| panic::catch_unwind(AssertUnwindSafe(|| func(&instance))));
        let again = match outcome {
            Ok(again) => again,
            Err(_) => {
                self.error(&format!("A run function of plugin {} panicked", entry.plugin_id));
                false
            }
        };

        let more = {
            let mut state = self.state();
            state.executing.retain(|e| e.seq != entry.seq);
            // An active plugin with a transition owner is being stopped.
            let runnable = state.plugins.get(&entry.plugin_id).is_some_and(|p| match p.state {
                PluginState::Starting => true,
                PluginState::Active => p.transition_owner.is_none(),
                _ => false,
            });
            if again && runnable {
                state.run_queue.push_back(entry);
            }
            !state.run_queue.is_empty()
        };
        self.signal();
        more
    }

    /// Remove the queued functions of a plugin and wait for its running ones.
    pub(crate) fn drain_run_functions(&self, plugin_id: &str) {
        let me = thread::current().id();
        loop {
            let (running, on_this_thread) = {
                let mut state = self.state();
                state.run_queue.retain(|e| e.plugin_id != plugin_id);
                let mut running = false;
                let mut on_this_thread = false;
                for e in state.executing.iter().filter(|e| e.plugin_id == plugin_id) {
                    running = true;
                    on_this_thread |= e.thread == me;
                }
                (running, on_this_thread)
            };
            if !running {
                return;
            }
            if on_this_thread {
                fatal(format!("Plugin {} was stopped from within its own run function", plugin_id));
            }
            self.wait();
        }
    }
}
