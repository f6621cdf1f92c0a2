//! Usage tracking for the shared objects an environment hands out.
//!
//! Every descriptor and every info list returned to a caller is registered
//! here with a usage count. The environment and callers each hold counted
//! references; once the count drops to zero the entry is torn down. All
//! operations run with the environment lock held.
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::kernel::fatal::fatal;

/// Registry key: the address of the shared allocation
pub(crate) type InfoKey = usize;

pub(crate) fn info_key<T: ?Sized>(info: &Arc<T>) -> InfoKey {
    Arc::as_ptr(info) as *const () as usize
}

/// What to do when an entry's usage count reaches zero
pub(crate) enum Teardown {
    /// Only drop the registry's reference
    Drop,
    /// Additionally release the listed entries (the elements of an info list)
    Release(Vec<InfoKey>),
}

struct InfoEntry {
    kind: &'static str,
    usage: usize,
    keepalive: Arc<dyn Any + Send + Sync>,
    teardown: Teardown,
}

#[derive(Default)]
pub(crate) struct InfoRegistry {
    entries: HashMap<InfoKey, InfoEntry>,
}

impl InfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object with a usage count of one.
    pub fn register<T: Any + Send + Sync>(&mut self, kind: &'static str, info: &Arc<T>, teardown: Teardown) {
        let keepalive: Arc<dyn Any + Send + Sync> = info.clone();
        let previous = self.entries.insert(
            info_key(info),
            InfoEntry {
                kind,
                usage: 1,
                keepalive,
                teardown,
            },
        );
        if previous.is_some() {
            fatal(format!("{} registered twice for usage tracking", kind));
        }
    }

    pub fn contains(&self, key: InfoKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn usage(&self, key: InfoKey) -> Option<usize> {
        self.entries.get(&key).map(|e| e.usage)
    }

    /// Take one more reference to a registered object.
    pub fn use_info(&mut self, key: InfoKey) {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.usage += 1,
            None => fatal("reference count of an unknown object was increased"),
        }
    }

    /// Drop one reference; tears the entry down when none remain.
    pub fn release(&mut self, key: InfoKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            fatal("reference count of an unknown object was decreased");
        };
        entry.usage -= 1;
        if entry.usage > 0 {
            return;
        }
        if let Some(entry) = self.entries.remove(&key) {
            if let Teardown::Release(children) = entry.teardown {
                for child in children {
                    self.release(child);
                }
            }
            drop(entry.keepalive);
        }
    }

    /// Forget every remaining entry without tearing it down. Returns the
    /// `(kind, usage)` of each leaked entry for reporting.
    pub fn release_all(&mut self) -> Vec<(&'static str, usize)> {
        self.entries.drain().map(|(_, e)| (e.kind, e.usage)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
