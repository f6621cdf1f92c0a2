//! Shared state of one plugin universe and the lock protecting it.
//!
//! Every table lives in [`EnvState`] behind the environment monitor. Engine
//! code runs as methods of [`EnvGuard`], which proves the monitor is held by
//! the current thread. The inner state mutex is only ever taken by the
//! monitor owner, so it never blocks; it must not be held across hook
//! invocations or unlocked sections.
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::context::info::InfoRegistry;
use crate::context::Context;
use crate::event::{EventDispatcher, LogSeverity, PluginEvent};
use crate::kernel::fatal::fatal;
use crate::kernel::framework;
use crate::kernel::monitor::Monitor;
use crate::plugin_system::parser::DescriptorParser;
use crate::plugin_system::plugin::{Plugin, PluginState};
use crate::plugin_system::loader::NativeLoader;
use crate::plugin_system::scheduler::{Executing, RunEntry};
use crate::plugin_system::symbols::SymbolBook;

/// Who a context acts for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Holder {
    Main,
    Plugin(String),
}

impl Holder {
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Holder::Main => None,
            Holder::Plugin(id) => Some(id),
        }
    }
}

/// Kinds of callbacks during which parts of the API are off limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    Logger,
    Listener,
    Create,
    Start,
    Stop,
    Destroy,
}

impl Invocation {
    pub const ALL: [Invocation; 6] = [
        Invocation::Logger,
        Invocation::Listener,
        Invocation::Create,
        Invocation::Start,
        Invocation::Stop,
        Invocation::Destroy,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn describe(self) -> &'static str {
        match self {
            Invocation::Logger => "a logger",
            Invocation::Listener => "an event listener",
            Invocation::Create => "a plugin create function",
            Invocation::Start => "a plugin start function",
            Invocation::Stop => "a plugin stop function",
            Invocation::Destroy => "a plugin destroy function",
        }
    }
}

/// Forbidden in every kind of callback
pub(crate) const ANY: &[Invocation] = &Invocation::ALL;

pub(crate) struct EnvState {
    pub plugins: HashMap<String, Plugin>,
    /// Extension point id -> declaring plugin
    pub ext_points: HashMap<String, String>,
    /// Extension point id -> (declaring plugin, index into its descriptor's extensions)
    pub extensions: HashMap<String, Vec<(String, usize)>>,
    /// Plugins in activation order
    pub started: Vec<String>,
    pub collections: Vec<PathBuf>,
    pub run_queue: VecDeque<RunEntry>,
    pub executing: Vec<Executing>,
    pub next_run_seq: u64,
    pub events: EventDispatcher,
    pub infos: InfoRegistry,
    pub holders: HashMap<Holder, SymbolBook>,
    invocations: HashMap<ThreadId, [u32; 6]>,
    pub args: Vec<String>,
    next_context_generation: u64,
    pub destroyed: bool,
}

impl EnvState {
    fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            ext_points: HashMap::new(),
            extensions: HashMap::new(),
            started: Vec::new(),
            collections: Vec::new(),
            run_queue: VecDeque::new(),
            executing: Vec::new(),
            next_run_seq: 1,
            events: EventDispatcher::new(),
            infos: InfoRegistry::new(),
            holders: HashMap::new(),
            invocations: HashMap::new(),
            args: Vec::new(),
            next_context_generation: 1,
            destroyed: false,
        }
    }

    pub fn plugin_state(&self, id: &str) -> PluginState {
        self.plugins.get(id).map_or(PluginState::Uninstalled, |p| p.state)
    }

    pub fn next_context_generation(&mut self) -> u64 {
        let generation = self.next_context_generation;
        self.next_context_generation += 1;
        generation
    }
}

pub(crate) struct Environment {
    id: u64,
    monitor: Monitor,
    state: Mutex<EnvState>,
    pub(crate) loader: Arc<dyn NativeLoader>,
    pub(crate) parser: Arc<dyn DescriptorParser>,
}

impl Environment {
    pub fn new(loader: Arc<dyn NativeLoader>, parser: Arc<dyn DescriptorParser>) -> Arc<Self> {
        let env = Arc::new(Self {
            id: framework::next_environment_id(),
            monitor: Monitor::new(),
            state: Mutex::new(EnvState::new()),
            loader,
            parser,
        });
        framework::register_environment(&env);
        log::debug!("Environment {} created", env.id);
        env
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lock(self: &Arc<Self>) -> EnvGuard<'_> {
        self.monitor.lock();
        EnvGuard { env: self }
    }

    /// Uninstall every plugin and release the environment's resources.
    /// Destroying an already destroyed environment does nothing.
    pub fn destroy(self: &Arc<Self>) {
        {
            let guard = self.lock();
            if guard.state().destroyed {
                return;
            }
            guard.uninstall_all();

            let leaked = {
                let mut state = guard.state();
                state.destroyed = true;
                state.collections.clear();
                state.run_queue.clear();
                state.holders.clear();
                state.events = EventDispatcher::new();
                state.infos.release_all()
            };
            for (kind, usage) in leaked {
                log::warn!("Environment {} destroyed while {} was still in use ({} references)", self.id, kind, usage);
            }
        }
        framework::unregister_environment(self.id);
        log::debug!("Environment {} destroyed", self.id);
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        // Contexts dropped without destroy still leave the registry.
        framework::unregister_environment(self.id);
    }
}

/// Proof that the current thread holds the environment monitor.
/// Dropping the guard releases one level of the monitor.
pub(crate) struct EnvGuard<'a> {
    pub(crate) env: &'a Arc<Environment>,
}

impl Drop for EnvGuard<'_> {
    fn drop(&mut self) {
        self.env.monitor.unlock();
    }
}

struct Relock<'a> {
    monitor: &'a Monitor,
    depth: usize,
}

impl Drop for Relock<'_> {
    fn drop(&mut self) {
        self.monitor.restore(self.depth);
    }
}

struct InvocationExit<'g, 'a> {
    guard: &'g EnvGuard<'a>,
    kind: Invocation,
    thread: ThreadId,
}

impl Drop for InvocationExit<'_, '_> {
    fn drop(&mut self) {
        let mut state = self.guard.state();
        if let Some(counts) = state.invocations.get_mut(&self.thread) {
            counts[self.kind.index()] -= 1;
            if counts.iter().all(|c| *c == 0) {
                state.invocations.remove(&self.thread);
            }
        }
    }
}

impl<'a> EnvGuard<'a> {
    pub fn state(&self) -> MutexGuard<'_, EnvState> {
        self.env.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn env(&self) -> &'a Arc<Environment> {
        self.env
    }

    /// Run `f` with the monitor fully released, reacquiring it afterwards
    /// with the same recursion depth.
    pub fn unlocked<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = self.env.monitor.release_all();
        let _relock = Relock {
            monitor: &self.env.monitor,
            depth,
        };
        f()
    }

    /// Block until another thread signals a change.
    pub fn wait(&self) {
        self.env.monitor.wait();
    }

    /// Wake every waiting thread.
    pub fn signal(&self) {
        self.env.monitor.signal();
    }

    /// Run `f` as a callback of the given kind on the current thread.
    pub fn invoke<R>(&self, kind: Invocation, f: impl FnOnce() -> R) -> R {
        let thread = thread::current().id();
        self.state().invocations.entry(thread).or_insert([0; 6])[kind.index()] += 1;
        let _exit = InvocationExit { guard: self, kind, thread };
        f()
    }

    /// Fail fatally if the current thread is inside a forbidden callback.
    pub fn check_invocation(&self, forbidden: &[Invocation], function: &str) {
        let thread = thread::current().id();
        let violated = {
            let state = self.state();
            state
                .invocations
                .get(&thread)
                .and_then(|counts| forbidden.iter().copied().find(|kind| counts[kind.index()] > 0))
        };
        if let Some(kind) = violated {
            fatal(format!("{} called from within {}", function, kind.describe()));
        }
    }

    /// Fail fatally if the environment has been destroyed.
    pub fn check_alive(&self, function: &str) {
        if self.state().destroyed {
            fatal(format!("{} called on a context of a destroyed environment", function));
        }
    }

    /// Emit a framework message through the `log` facade and the
    /// environment's own loggers.
    pub fn log(&self, severity: LogSeverity, origin: Option<&str>, message: &str) {
        match origin {
            Some(plugin) => log::log!(severity.level(), "[{}] {}", plugin, message),
            None => log::log!(severity.level(), "{}", message),
        }
        let loggers = self.state().events.loggers_for(severity);
        for logger in loggers {
            self.invoke(Invocation::Logger, || logger(severity, message, origin));
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogSeverity::Debug, None, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogSeverity::Info, None, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogSeverity::Warning, None, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogSeverity::Error, None, message);
    }

    fn deliver_event(&self, event: &PluginEvent) {
        let listeners = self.state().events.listeners();
        for listener in listeners {
            self.invoke(Invocation::Listener, || listener(event));
        }
    }

    /// Change a plugin's state, notify listeners and wake waiting threads.
    pub fn set_state(&self, plugin_id: &str, new_state: PluginState) {
        let old_state = {
            let mut state = self.state();
            let Some(plugin) = state.plugins.get_mut(plugin_id) else {
                return;
            };
            std::mem::replace(&mut plugin.state, new_state)
        };
        self.notify_state(plugin_id, old_state, new_state);
    }

    /// Report a state change that has already been applied.
    pub fn notify_state(&self, plugin_id: &str, old_state: PluginState, new_state: PluginState) {
        if old_state != new_state {
            self.debug(&format!("Plugin {} changed state from {} to {}", plugin_id, old_state, new_state));
            self.deliver_event(&PluginEvent::new(plugin_id, old_state, new_state));
        }
        self.signal();
    }

    /// Create the context handed to a plugin's runtime.
    pub fn new_plugin_context(&self, plugin_id: &str) -> Context {
        let generation = {
            let mut state = self.state();
            let generation = state.next_context_generation();
            if let Some(plugin) = state.plugins.get_mut(plugin_id) {
                plugin.context_generation = Some(generation);
            }
            generation
        };
        Context::for_plugin(Arc::clone(self.env), plugin_id, generation)
    }
}
