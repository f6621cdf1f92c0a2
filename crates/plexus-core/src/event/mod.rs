//! # Plexus Event System
//!
//! Plugin state change events and framework log messages, together with the
//! registry of listeners and loggers an environment delivers them to.
//!
//! Delivery is synchronous and serialized by the environment lock. Handlers
//! run while the lock is held, so they must return promptly and may call only
//! the parts of the context API that do not modify the environment.
pub mod dispatcher;
pub mod types;

pub use dispatcher::{EventDispatcher, Listener, Logger};
pub use types::{LogSeverity, PluginEvent};

/// Identifier returned when registering a listener or logger
pub type HandlerId = u64;
