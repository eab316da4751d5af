//! Thread identity and the registry of per-thread safepoint state.
//!
//! Every OS thread that takes part in handshakes is identified by a
//! [`ThreadHandle`]. The handle is created lazily the first time a thread asks
//! for it and is marked terminated by a thread-local destructor when the
//! thread exits, so submitters can check liveness without owning the thread.
//!
//! # Examples
//!
//! ```
//! use safepoint_handshake::thread::{ThreadHandle, ThreadRegistry};
//!
//! let registry: ThreadRegistry = ThreadRegistry::new();
//! let me = ThreadHandle::current();
//!
//! let state = registry.get_or_create(&me);
//! assert!(std::sync::Arc::ptr_eq(&state, &registry.get_or_create(&me)));
//! assert_eq!(registry.len(), 1);
//! assert!(me.is_alive());
//! ```

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use dashmap::DashMap;

use crate::{
    config::HandshakeConfig,
    interfaces::threading::{FastFlagHook, NoopFastFlag},
    safepoint::SafepointState,
};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct ThreadInner {
    id: u64,
    os_thread: thread::Thread,
    alive: AtomicBool,
}

/// Marks the owning thread terminated when its thread-locals are destroyed.
struct LivenessGuard(ThreadHandle);

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.0.inner.alive.store(false, Ordering::Release);
        log::trace!("thread {} terminated", self.0.id());
    }
}

/// The calling thread's state in one registry, type-erased so a single
/// thread-local can serve registries with different context types.
struct AttachedState {
    registry: u64,
    state: Weak<dyn Any + Send + Sync>,
}

thread_local! {
    static CURRENT: LivenessGuard = LivenessGuard(ThreadHandle::for_current_os_thread());
    static ATTACHED: RefCell<Vec<AttachedState>> = const { RefCell::new(Vec::new()) };
}

/// Identity of a thread that can receive handshakes.
///
/// Cloning is cheap; all clones refer to the same thread. Equality and hashing
/// use a process-unique id, never the OS thread id, so identities are not
/// reused after a thread dies.
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
}

impl ThreadHandle {
    fn for_current_os_thread() -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
                os_thread: thread::current(),
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Handle of the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread-local destructor after the calling
    /// thread's handle has already been destroyed.
    pub fn current() -> Self {
        CURRENT.with(|guard| guard.0.clone())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.os_thread.name()
    }

    /// False once the thread has run its thread-local destructors.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// True when called on the thread this handle identifies.
    pub fn is_current(&self) -> bool {
        self.inner.os_thread.id() == thread::current().id()
    }

    /// Wake the thread if it is parked in [`std::thread::park`].
    pub fn unpark(&self) {
        self.inner.os_thread.unpark();
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ThreadHandle {}

impl Hash for ThreadHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Map from live threads to their safepoint state.
///
/// States are created on first access, from either the thread itself or a
/// submitter. Creation only touches one shard of the map; lookups of existing
/// states take a shard read lock. States of terminated threads are dropped by
/// [`ThreadRegistry::purge_terminated`], which also runs on every creation when
/// [`HandshakeConfig::purge_on_attach`] is set.
///
/// A thread looking up its own state through [`ThreadRegistry::current`] goes
/// through the map once; later lookups are served from a thread-local cache.
pub struct ThreadRegistry<C: ?Sized = ()> {
    id: u64,
    pub(crate) states: DashMap<u64, Arc<SafepointState<C>>>,
    hook: Arc<dyn FastFlagHook>,
    config: HandshakeConfig,
}

impl<C: ?Sized + 'static> ThreadRegistry<C> {
    pub fn new() -> Self {
        Self::with_hook(HandshakeConfig::default(), Arc::new(NoopFastFlag))
    }

    pub fn with_hook(config: HandshakeConfig, hook: Arc<dyn FastFlagHook>) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            states: DashMap::with_capacity(config.registry_capacity),
            hook,
            config,
        }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// State of `thread`, created on first access.
    pub fn get_or_create(&self, thread: &ThreadHandle) -> Arc<SafepointState<C>> {
        if let Some(state) = self.states.get(&thread.id()) {
            return Arc::clone(state.value());
        }

        if self.config.purge_on_attach {
            self.purge_terminated();
        }

        let state = self
            .states
            .entry(thread.id())
            .or_insert_with(|| {
                log::trace!("creating safepoint state for thread {}", thread.id());
                Arc::new(SafepointState::new(thread.clone(), Arc::clone(&self.hook)))
            });
        Arc::clone(state.value())
    }

    /// State of the calling thread, created on first use.
    ///
    /// Only the first call on each thread touches the map.
    pub fn current(&self) -> Arc<SafepointState<C>> {
        if let Some(state) = self.cached() {
            return state;
        }
        let state = self.get_or_create(&ThreadHandle::current());
        self.remember(&state);
        state
    }

    fn cached(&self) -> Option<Arc<SafepointState<C>>> {
        let erased = ATTACHED
            .try_with(|attached| {
                attached
                    .borrow()
                    .iter()
                    .find(|entry| entry.registry == self.id)
                    .and_then(|entry| entry.state.upgrade())
            })
            .ok()
            .flatten()?;
        erased.downcast::<SafepointState<C>>().ok()
    }

    fn remember(&self, state: &Arc<SafepointState<C>>) {
        let erased: Arc<dyn Any + Send + Sync> = state.clone();
        let state = Arc::downgrade(&erased);
        // Thread-locals may already be gone during thread teardown; the map
        // still works then.
        let _ = ATTACHED.try_with(|attached| {
            let mut attached = attached.borrow_mut();
            attached.retain(|entry| entry.state.strong_count() > 0);
            attached.push(AttachedState {
                registry: self.id,
                state,
            });
        });
    }

    /// State of `thread` if one was ever created.
    pub fn get(&self, thread: &ThreadHandle) -> Option<Arc<SafepointState<C>>> {
        self.states
            .get(&thread.id())
            .map(|state| Arc::clone(state.value()))
    }

    /// Drop the states of all terminated threads and return how many went.
    ///
    /// Entries still queued on a dropped state never get a poll. With
    /// [`HandshakeConfig::release_abandoned`] they are counted as arrivals with
    /// their action suppressed so requesters waiting on them are released.
    pub fn purge_terminated(&self) -> usize {
        let mut dead = Vec::new();
        self.states.retain(|_, state| {
            if state.thread().is_alive() {
                true
            } else {
                dead.push(Arc::clone(state));
                false
            }
        });

        for state in &dead {
            log::debug!("purged safepoint state of thread {}", state.thread().id());
            if self.config.release_abandoned {
                state.release_abandoned();
            }
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Snapshot of the threads that currently have state.
    pub fn threads(&self) -> Vec<ThreadHandle> {
        self.states
            .iter()
            .map(|entry| entry.value().thread().clone())
            .collect()
    }
}

impl<C: ?Sized + 'static> Default for ThreadRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for ThreadRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("id", &self.id)
            .field("threads", &self.states.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn current_handle_is_stable_per_thread() {
        let a = ThreadHandle::current();
        let b = ThreadHandle::current();
        assert_eq!(a, b);
        assert!(a.is_current());
        assert!(a.is_alive());
    }

    #[test]
    fn handles_differ_across_threads() {
        let here = ThreadHandle::current();
        let there = thread::spawn(ThreadHandle::current).join().unwrap();

        assert_ne!(here, there);
        assert!(!there.is_current());
        let ids: HashSet<_> = [here.id(), there.id()].into_iter().collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn handle_dies_with_its_thread() {
        let handle = thread::Builder::new()
            .name("short-lived".into())
            .spawn(ThreadHandle::current)
            .unwrap()
            .join()
            .unwrap();

        assert!(!handle.is_alive());
        assert_eq!(handle.name(), Some("short-lived"));
    }

    #[test]
    fn get_or_create_returns_same_state() {
        let registry: ThreadRegistry = ThreadRegistry::new();
        let me = ThreadHandle::current();

        assert!(registry.get(&me).is_none());
        let first = registry.get_or_create(&me);
        let second = registry.get_or_create(&me);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.threads(), vec![me]);
    }

    #[test]
    fn purge_drops_terminated_threads() {
        let registry: ThreadRegistry = ThreadRegistry::new();
        let dead = thread::spawn(ThreadHandle::current).join().unwrap();
        registry.get_or_create(&dead);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.purge_terminated(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn creation_purges_when_configured() {
        let registry: ThreadRegistry = ThreadRegistry::new();
        let dead = thread::spawn(ThreadHandle::current).join().unwrap();
        registry.get_or_create(&dead);

        registry.get_or_create(&ThreadHandle::current());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&dead).is_none());
    }

    #[test]
    fn creation_keeps_dead_states_when_purge_disabled() {
        let config = HandshakeConfig {
            purge_on_attach: false,
            ..HandshakeConfig::default()
        };
        let registry: ThreadRegistry = ThreadRegistry::with_hook(config, Arc::new(NoopFastFlag));
        let dead = thread::spawn(ThreadHandle::current).join().unwrap();
        registry.get_or_create(&dead);
        registry.get_or_create(&ThreadHandle::current());

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn current_is_cached_per_registry() {
        let first: ThreadRegistry = ThreadRegistry::new();
        let second: ThreadRegistry<str> = ThreadRegistry::new();

        let state = first.current();
        let other = second.current();
        assert!(state.thread().is_current());
        assert!(other.thread().is_current());

        // Served from the cache while the shard holding the entry is locked.
        let shard = first.states.get_mut(&ThreadHandle::current().id()).unwrap();
        assert!(Arc::ptr_eq(&state, &first.current()));
        drop(shard);
        assert!(Arc::ptr_eq(&other, &second.current()));
    }

    #[test]
    fn cache_does_not_outlive_registry() {
        let weak = {
            let registry: ThreadRegistry = ThreadRegistry::new();
            Arc::downgrade(&registry.current())
        };
        assert!(weak.upgrade().is_none());

        // A new registry gets a fresh state rather than a stale cached one.
        let registry: ThreadRegistry = ThreadRegistry::new();
        let state = registry.current();
        assert!(Arc::ptr_eq(&state, &registry.get(&ThreadHandle::current()).unwrap()));
    }

    #[test]
    fn concurrent_creation_yields_one_state() {
        let registry: Arc<ThreadRegistry> = Arc::new(ThreadRegistry::new());
        let target = ThreadHandle::current();

        let states: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let target = target.clone();
                thread::spawn(move || registry.get_or_create(&target))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        for state in &states {
            assert!(Arc::ptr_eq(state, &states[0]));
        }
    }
}
