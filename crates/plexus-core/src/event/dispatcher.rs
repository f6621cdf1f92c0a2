use std::fmt;
use std::sync::Arc;

use crate::event::{HandlerId, LogSeverity, PluginEvent};

/// Receives every plugin state change of an environment
pub type Listener = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

/// Receives framework log messages: severity, message and the identifier of
/// the plugin the message is attributed to (`None` for the host program)
pub type Logger = Arc<dyn Fn(LogSeverity, &str, Option<&str>) + Send + Sync>;

struct LoggerEntry {
    id: HandlerId,
    floor: LogSeverity,
    /// Plugin that registered the logger, `None` for the host program
    owner: Option<String>,
    func: Logger,
}

struct ListenerEntry {
    id: HandlerId,
    owner: Option<String>,
    func: Listener,
}

/// Listener and logger registry of one environment.
///
/// Delivery happens outside this type: callers take a snapshot of the
/// handlers and invoke them after releasing any borrow of the registry, so
/// handlers may query the environment.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<ListenerEntry>,
    loggers: Vec<LoggerEntry>,
    next_handler_id: HandlerId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .field("loggers", &self.loggers.len())
            .field("next_handler_id", &self.next_handler_id)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            next_handler_id: 1,
            ..Self::default()
        }
    }

    fn next_id(&mut self) -> HandlerId {
        // ids start at 1 even for a defaulted dispatcher
        self.next_handler_id = self.next_handler_id.max(1);
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        id
    }

    pub fn register_listener(&mut self, owner: Option<&str>, func: Listener) -> HandlerId {
        let id = self.next_id();
        self.listeners.push(ListenerEntry {
            id,
            owner: owner.map(str::to_string),
            func,
        });
        id
    }

    pub fn unregister_listener(&mut self, id: HandlerId) -> bool {
        let len_before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() < len_before
    }

    /// Register a logger, or update the floor of an already registered one
    /// when the same function is registered again by the same owner.
    pub fn register_logger(&mut self, owner: Option<&str>, floor: LogSeverity, func: Logger) -> HandlerId {
        if let Some(existing) = self
            .loggers
            .iter_mut()
            .find(|l| Arc::ptr_eq(&l.func, &func) && l.owner.as_deref() == owner)
        {
            existing.floor = floor;
            return existing.id;
        }
        let id = self.next_id();
        self.loggers.push(LoggerEntry {
            id,
            floor,
            owner: owner.map(str::to_string),
            func,
        });
        id
    }

    pub fn unregister_logger(&mut self, id: HandlerId) -> bool {
        let len_before = self.loggers.len();
        self.loggers.retain(|l| l.id != id);
        self.loggers.len() < len_before
    }

    /// Remove every handler registered by `plugin_id`. Returns how many were removed.
    pub fn remove_owned_by(&mut self, plugin_id: &str) -> usize {
        let before = self.listeners.len() + self.loggers.len();
        self.listeners.retain(|l| l.owner.as_deref() != Some(plugin_id));
        self.loggers.retain(|l| l.owner.as_deref() != Some(plugin_id));
        before - self.listeners.len() - self.loggers.len()
    }

    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|l| Arc::clone(&l.func)).collect()
    }

    /// Loggers whose floor admits `severity`, in registration order
    pub fn loggers_for(&self, severity: LogSeverity) -> Vec<Logger> {
        self.loggers
            .iter()
            .filter(|l| l.floor <= severity)
            .map(|l| Arc::clone(&l.func))
            .collect()
    }

    /// Whether any logger would receive a message of `severity`
    pub fn is_logged(&self, severity: LogSeverity) -> bool {
        self.loggers.iter().any(|l| l.floor <= severity)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn logger_count(&self) -> usize {
        self.loggers.len()
    }
}
