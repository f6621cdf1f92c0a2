//! Reentrant monitor built from a standard mutex and condition variables.
//!
//! The owning thread may acquire the monitor recursively; it becomes
//! available to other threads only once every acquisition has been released.
//! [`Monitor::wait`] releases the monitor completely, remembering the
//! recursion depth, blocks until [`Monitor::signal`] is called and then
//! reacquires the monitor with the saved depth. `signal` wakes every waiter
//! but does not release the monitor; woken threads proceed only once the
//! signalling thread has unlocked.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::kernel::fatal::fatal;

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
    /// Incremented by every signal so waiters can tell wakeups from spurious ones
    generation: u64,
}

#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<Ownership>,
    available: Condvar,
    signalled: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Ownership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire<'a>(&'a self, mut state: MutexGuard<'a, Ownership>, me: ThreadId, depth: usize) {
        while state.owner.is_some() {
            state = self.available.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    /// Acquires the monitor, recursively if the current thread already owns it.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.inner();
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }
        self.acquire(state, me, 1);
    }

    /// Releases one level of ownership.
    pub fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self.inner();
        if state.owner != Some(me) {
            drop(state);
            fatal("monitor released by a thread that does not own it");
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.available.notify_all();
        }
    }

    /// Returns whether the calling thread currently owns the monitor.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.inner().owner == Some(thread::current().id())
    }

    /// Releases every level of ownership and returns the depth to restore.
    pub fn release_all(&self) -> usize {
        let me = thread::current().id();
        let mut state = self.inner();
        if state.owner != Some(me) {
            drop(state);
            fatal("monitor released by a thread that does not own it");
        }
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.available.notify_all();
        depth
    }

    /// Reacquires the monitor with a depth previously returned by [`Monitor::release_all`].
    pub fn restore(&self, depth: usize) {
        let me = thread::current().id();
        let state = self.inner();
        self.acquire(state, me, depth);
    }

    /// Atomically releases the monitor, blocks until signalled and reacquires
    /// it with the recursion depth it had before the call.
    pub fn wait(&self) {
        let me = thread::current().id();
        let mut state = self.inner();
        if state.owner != Some(me) {
            drop(state);
            fatal("monitor waited on by a thread that does not own it");
        }
        let depth = state.depth;
        let generation = state.generation;
        state.owner = None;
        state.depth = 0;
        self.available.notify_all();
        while state.generation == generation {
            state = self.signalled.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        self.acquire(state, me, depth);
    }

    /// Wakes every thread blocked in [`Monitor::wait`] without releasing the monitor.
    pub fn signal(&self) {
        let mut state = self.inner();
        state.generation = state.generation.wrapping_add(1);
        self.signalled.notify_all();
    }
}
