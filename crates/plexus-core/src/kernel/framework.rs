//! Process-wide registry of live environments.
//!
//! The registry is created lazily by the first environment (or an explicit
//! [`init`]) and torn down again once the last environment has been
//! destroyed. It is guarded by its own lock, the *framework lock*. A thread
//! holding the framework lock never acquires an environment lock; the
//! reverse order is fine and is what environment creation and destruction do.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::context::environment::Environment;
use crate::kernel::constants;

#[derive(Default)]
struct Registry {
    environments: HashMap<u64, Weak<Environment>>,
}

static FRAMEWORK: Mutex<Option<Registry>> = Mutex::new(None);
static NEXT_ENVIRONMENT_ID: AtomicU64 = AtomicU64::new(1);

fn framework() -> MutexGuard<'static, Option<Registry>> {
    FRAMEWORK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initializes the framework registry. Calling it is optional: creating a
/// context initializes the registry on demand.
pub fn init() {
    let mut fw = framework();
    if fw.is_none() {
        *fw = Some(Registry::default());
        log::debug!("{} {} framework initialized", constants::FRAMEWORK_NAME, constants::FRAMEWORK_VERSION);
    }
}

/// Destroys every live environment and tears the registry down.
pub fn destroy() {
    let environments: Vec<Arc<Environment>> = {
        let mut fw = framework();
        match fw.take() {
            Some(registry) => registry.environments.values().filter_map(Weak::upgrade).collect(),
            None => Vec::new(),
        }
    };
    // Framework lock released: destroying takes environment locks.
    for env in environments {
        env.destroy();
    }
    log::debug!("Framework destroyed");
}

/// Number of environments currently registered.
pub fn live_environments() -> usize {
    framework().as_ref().map_or(0, |registry| registry.environments.len())
}

/// Release version of the framework.
pub fn version() -> &'static str {
    constants::FRAMEWORK_VERSION
}

/// Canonical host type (`<arch>-<os>`) the framework was built for.
pub fn host_type() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

pub(crate) fn next_environment_id() -> u64 {
    NEXT_ENVIRONMENT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn register_environment(env: &Arc<Environment>) {
    let mut fw = framework();
    let registry = fw.get_or_insert_with(Registry::default);
    registry.environments.retain(|_, env| env.strong_count() > 0);
    registry.environments.insert(env.id(), Arc::downgrade(env));
}

pub(crate) fn is_registered(id: u64) -> bool {
    framework().as_ref().is_some_and(|registry| registry.environments.contains_key(&id))
}

pub(crate) fn unregister_environment(id: u64) {
    let mut fw = framework();
    if let Some(registry) = fw.as_mut() {
        registry.environments.remove(&id);
        if registry.environments.is_empty() {
            *fw = None;
            log::debug!("Last environment destroyed, framework registry released");
        }
    }
}
