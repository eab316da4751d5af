//! Submission of handshakes to sets of threads.
//!
//! The coordinator owns the thread registry. Requesters call
//! [`HandshakeCoordinator::submit_to_threads`]; target threads service their
//! entries by polling their [`SafepointState`] (cached from
//! [`HandshakeCoordinator::attach`]) or, less cheaply, through
//! [`HandshakeCoordinator::poll`].
//!
//! No global lock is involved: each target's state lock is taken and released
//! on its own, never two at a time.
//!
//! # Examples
//!
//! ```
//! use safepoint_handshake::{HandshakeCoordinator, ThreadHandle};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let coordinator: HandshakeCoordinator = HandshakeCoordinator::new();
//! let state = coordinator.attach();
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&hits);
//! let handle = coordinator
//!     .submit_to_threads(
//!         &[ThreadHandle::current()],
//!         move |_: &()| {
//!             seen.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         },
//!         || {},
//!         false,
//!     )
//!     .unwrap();
//!
//! assert!(state.is_pending());
//! state.poll(&()).unwrap();
//! handle.wait();
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use std::{fmt, sync::Arc};

use crate::{
    config::HandshakeConfig,
    error::{ActionResult, HandshakeError, PollResult},
    handshake::{Handshake, HandshakeHandle},
    interfaces::threading::{FastFlagHook, NoopFastFlag},
    safepoint::SafepointState,
    thread::{ThreadHandle, ThreadRegistry},
};

/// Entry point for submitting handshakes and servicing them.
///
/// `C` is the context handed from the poll site to every action. It is never
/// inspected here.
pub struct HandshakeCoordinator<C: ?Sized = ()> {
    registry: ThreadRegistry<C>,
}

impl<C: ?Sized + 'static> HandshakeCoordinator<C> {
    pub fn new() -> Self {
        Self::with_config(HandshakeConfig::default())
    }

    pub fn with_config(config: HandshakeConfig) -> Self {
        Self::with_hook(config, Arc::new(NoopFastFlag))
    }

    /// Coordinator whose pending-flag transitions are mirrored through `hook`.
    pub fn with_hook(config: HandshakeConfig, hook: Arc<dyn FastFlagHook>) -> Self {
        Self {
            registry: ThreadRegistry::with_hook(config, hook),
        }
    }

    pub fn registry(&self) -> &ThreadRegistry<C> {
        &self.registry
    }

    /// State of the calling thread, created on first use.
    ///
    /// After the first call on a thread the state comes from a thread-local
    /// cache without touching the registry map. Hot loops should still keep the
    /// returned `Arc` and poll it directly.
    pub fn attach(&self) -> Arc<SafepointState<C>> {
        self.registry.current()
    }

    pub fn state_of(&self, thread: &ThreadHandle) -> Arc<SafepointState<C>> {
        self.registry.get_or_create(thread)
    }

    /// Queue `action` on every thread in `threads`.
    ///
    /// Each target runs `action` once at its next poll. `on_done` runs once, on
    /// the target that arrives last. A thread listed twice receives two
    /// entries and counts as two arrivals. With no targets the handshake is
    /// complete on return and `on_done` has already run on the caller.
    ///
    /// Side-effecting handshakes are held back on threads that currently have
    /// side effects disabled.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::ThreadNotAlive`] if any target has terminated. Liveness
    /// is checked for all targets before anything is queued, so a failed
    /// submission leaves no entries behind.
    pub fn submit_to_threads<A, D>(
        &self,
        threads: &[ThreadHandle],
        action: A,
        on_done: D,
        side_effecting: bool,
    ) -> Result<HandshakeHandle<C>, HandshakeError>
    where
        A: Fn(&C) -> ActionResult + Send + Sync + 'static,
        D: FnOnce() + Send + 'static,
    {
        if let Some(dead) = threads.iter().find(|thread| !thread.is_alive()) {
            return Err(HandshakeError::ThreadNotAlive { thread: dead.id() });
        }

        let handshake = Arc::new(Handshake::new(
            Box::new(action),
            Box::new(on_done),
            side_effecting,
            threads.len(),
        ));

        if threads.is_empty() {
            if let Err(error) = handshake.complete_without_targets() {
                log::warn!("completion callback of empty handshake failed: {error}");
            }
        }

        for thread in threads {
            self.registry.get_or_create(thread).submit(&handshake);
        }
        log::trace!(
            "submitted {} handshake to {} thread(s)",
            if side_effecting { "side-effecting" } else { "side-effect free" },
            threads.len()
        );

        Ok(HandshakeHandle::new(handshake))
    }

    /// Poll the calling thread's state.
    ///
    /// Resolves the state through the thread-local cache, so an idle poll
    /// takes no lock. Polling the state returned by [`attach`](Self::attach)
    /// saves the cache lookup.
    ///
    /// # Errors
    ///
    /// The combined failure of the actions drained by this poll.
    pub fn poll(&self, context: &C) -> PollResult {
        self.attach().poll(context)
    }
}

impl<C: ?Sized + 'static> Default for HandshakeCoordinator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for HandshakeCoordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("registry", &self.registry)
            .finish()
    }
}
