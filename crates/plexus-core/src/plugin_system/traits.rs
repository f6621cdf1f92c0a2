use std::any::Any;
use std::sync::Arc;

use crate::context::Context;

/// Opaque per-instance data created by a plugin runtime
pub type InstanceData = Arc<dyn Any + Send + Sync>;

/// Lifecycle hooks of a plugin runtime.
///
/// Every hook runs with the environment unlocked. `create` may use the
/// plugin context it receives to define symbols, register run functions or
/// listeners later on; the context stays valid until `destroy` returns.
pub trait PluginRuntime: Send + Sync {
    /// Create the plugin instance.
    fn create(&self, ctx: &Context) -> Result<InstanceData, String>;

    /// Whether the runtime has a start hook. Without one the plugin goes
    /// directly from Resolved to Active.
    fn has_start(&self) -> bool {
        true
    }

    /// Start the instance.
    fn start(&self, _instance: &InstanceData) -> Result<(), String> {
        Ok(())
    }

    /// Whether the runtime has a stop hook.
    fn has_stop(&self) -> bool {
        true
    }

    /// Stop the instance. Every symbol the plugin resolved must be released
    /// before this returns.
    fn stop(&self, _instance: &InstanceData) {}

    /// Destroy the instance.
    fn destroy(&self, _instance: InstanceData) {}
}
