//! Per-thread safepoint state
//!
//! Each thread that can receive handshakes owns one [`SafepointState`]. It
//! keeps the thread's pending entries and the flag that the thread's poll
//! sites test.
//!
//! ## Architecture
//!
//! - **Fast Path**: a single acquire load of the thread's pending flag; no lock,
//!   no counters, no logging
//! - **Slow Path**: takes the state lock once, detaches the effective entry list
//!   and drains it oldest-first outside the lock
//! - **Side effects**: while a thread has side effects disabled only handshakes
//!   submitted as side-effect free are delivered; the rest stay queued
//! - **Blocking**: a thread about to block outside its poll sites registers an
//!   [`Interrupter`] that submitters invoke when work becomes pending
//!
//! The pending flag is written only with the state lock held and is true
//! exactly when the effective list is non-empty.
//!
//! ## Usage
//!
//! ```
//! use safepoint_handshake::HandshakeCoordinator;
//!
//! let coordinator: HandshakeCoordinator = HandshakeCoordinator::new();
//! let state = coordinator.attach();
//!
//! // Hot loops poll the cached state; nothing is pending here.
//! for _ in 0..1_000 {
//!     state.poll(&()).unwrap();
//! }
//! assert_eq!(state.stats().lock_acquisitions, 0);
//! ```

pub mod interrupt;
pub mod stats;


use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    error::PollResult,
    handshake::{
        Handshake,
        entry::{EntryChain, HandshakeEntry, PendingList},
    },
    interfaces::threading::FastFlagHook,
    thread::ThreadHandle,
};

pub use interrupt::{Interrupter, ThreadUnparker};
pub use stats::SafepointStats;

use stats::StatsCounters;

struct PendingQueues<C: ?Sized> {
    side_effects_enabled: bool,
    all: PendingList<C>,
    side_effect_free: PendingList<C>,
    interrupter: Option<Arc<dyn Interrupter>>,
    interrupted: bool,
    /// Set once the owning thread died and its queue was released.
    released: bool,
}

impl<C: ?Sized> PendingQueues<C> {
    fn is_pending(&self) -> bool {
        if self.side_effects_enabled {
            !self.all.is_empty()
        } else {
            !self.side_effect_free.is_empty()
        }
    }
}

/// Handshake bookkeeping for one thread.
///
/// Submitters reach it through the registry; the owning thread normally keeps
/// the `Arc` returned by
/// [`HandshakeCoordinator::attach`](crate::HandshakeCoordinator::attach) and
/// polls it directly.
pub struct SafepointState<C: ?Sized = ()> {
    thread: ThreadHandle,
    fast_pending: CachePadded<AtomicBool>,
    queues: Mutex<PendingQueues<C>>,
    hook: Arc<dyn FastFlagHook>,
    stats: StatsCounters,
}

impl<C: ?Sized + 'static> SafepointState<C> {
    pub(crate) fn new(thread: ThreadHandle, hook: Arc<dyn FastFlagHook>) -> Self {
        Self {
            thread,
            fast_pending: CachePadded::new(AtomicBool::new(false)),
            queues: Mutex::new(PendingQueues {
                side_effects_enabled: true,
                all: PendingList::new(),
                side_effect_free: PendingList::new(),
                interrupter: None,
                interrupted: false,
                released: false,
            }),
            hook,
            stats: StatsCounters::default(),
        }
    }

    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    /// Lock-free view of the pending flag.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.fast_pending.load(Ordering::Acquire)
    }

    /// Service every pending handshake deliverable to this thread.
    ///
    /// Must be called on the owning thread. When nothing is pending this is a
    /// single atomic load.
    ///
    /// # Errors
    ///
    /// The combined failure of the actions drained in this poll. Every drained
    /// entry has arrived by the time the error is returned.
    #[inline]
    pub fn poll(&self, context: &C) -> PollResult {
        if self.fast_pending.load(Ordering::Acquire) {
            self.poll_slow(context)
        } else {
            Ok(())
        }
    }

    #[cold]
    #[inline(never)]
    fn poll_slow(&self, context: &C) -> PollResult {
        debug_assert!(
            self.thread.is_current(),
            "safepoint state polled from a thread that does not own it"
        );
        self.stats.slow_polls.fetch_add(1, Ordering::Relaxed);

        let Some(chain) = self.take() else {
            return Ok(());
        };
        log::trace!(
            "thread {} draining {} handshake(s)",
            self.thread.id(),
            chain.len()
        );
        self.stats
            .entries_performed
            .fetch_add(chain.len() as u64, Ordering::Relaxed);
        chain.drain(context)
    }

    /// Queue `handshake` for this thread.
    ///
    /// A state already released after its thread died takes no more entries;
    /// the arrival is counted on the spot with the action suppressed.
    pub(crate) fn submit(&self, handshake: &Arc<Handshake<C>>) {
        let entry = HandshakeEntry::new(Arc::clone(handshake));
        let mut queues = self.lock();
        if queues.released {
            drop(queues);
            log::debug!(
                "thread {} already released; counting handshake as arrived",
                self.thread.id()
            );
            if let Err(error) = handshake.arrive() {
                log::warn!("completion callback failed for released thread: {error}");
            }
            return;
        }
        if !entry.is_side_effecting() {
            queues.side_effect_free.push(entry.clone());
        }
        queues.all.push(entry);

        if queues.is_pending() && !self.fast_pending.load(Ordering::Relaxed) {
            self.arm(&mut queues);
        }
    }

    /// Detach the effective list. Owner only.
    pub(crate) fn take(&self) -> Option<EntryChain<C>> {
        let mut queues = self.lock();
        if !queues.is_pending() {
            return None;
        }
        debug_assert!(self.fast_pending.load(Ordering::Relaxed), "pending without flag");
        self.disarm();

        let taken = if queues.side_effects_enabled {
            queues.side_effect_free.clear();
            queues.all.detach()
        } else {
            // Side-effect-free entries also sit in the all-list; drop them
            // there so they are not delivered a second time.
            queues.all.retain_side_effecting();
            queues.side_effect_free.detach()
        };

        if queues.interrupted {
            queues.interrupted = false;
            if let Some(interrupter) = &queues.interrupter {
                interrupter.reset_interrupted();
            }
        }
        Some(taken)
    }

    /// Register `interrupter` before blocking outside poll sites. Owner only.
    ///
    /// When a handshake is already pending the interrupter is invoked at once.
    /// Returns the previously registered interrupter, to be handed back to
    /// [`clear_blocked`](Self::clear_blocked) after unblocking.
    pub fn set_blocked(&self, interrupter: Arc<dyn Interrupter>) -> Option<Arc<dyn Interrupter>> {
        self.replace_interrupter(Some(interrupter))
    }

    /// Restore the interrupter that [`set_blocked`](Self::set_blocked)
    /// returned. `None` marks the thread as no longer blocked.
    pub fn clear_blocked(&self, previous: Option<Arc<dyn Interrupter>>) {
        self.replace_interrupter(previous);
    }

    /// Run `f` with `interrupter` registered, restoring the previous one after,
    /// including when `f` panics.
    pub fn blocked<R>(&self, interrupter: Arc<dyn Interrupter>, f: impl FnOnce() -> R) -> R {
        let previous = self.set_blocked(interrupter);
        let _restore = RestoreInterrupter {
            state: self,
            previous: Some(previous),
        };
        f()
    }

    fn replace_interrupter(
        &self,
        interrupter: Option<Arc<dyn Interrupter>>,
    ) -> Option<Arc<dyn Interrupter>> {
        debug_assert!(
            self.thread.is_current(),
            "interrupters can only be registered by the owning thread"
        );
        let mut queues = self.lock();
        let previous = queues.interrupter.take();
        if queues.interrupted {
            if let Some(previous) = &previous {
                previous.reset_interrupted();
            }
            queues.interrupted = false;
        }

        if let Some(interrupter) = &interrupter {
            if queues.is_pending() {
                log::debug!(
                    "thread {} blocking with a handshake pending; interrupting",
                    self.thread.id()
                );
                interrupter.interrupt(&self.thread);
                queues.interrupted = true;
                self.stats.interrupts.fetch_add(1, Ordering::Relaxed);
            }
        }
        queues.interrupter = interrupter;
        previous
    }

    /// Enable or disable delivery of side-effecting handshakes. Owner only.
    ///
    /// Returns the previous setting.
    pub fn set_side_effects_enabled(&self, enabled: bool) -> bool {
        debug_assert!(
            self.thread.is_current(),
            "side effects can only be toggled by the owning thread"
        );
        let mut queues = self.lock();
        let previous = queues.side_effects_enabled;
        queues.side_effects_enabled = enabled;
        if previous != enabled {
            log::debug!(
                "thread {} side effects {}",
                self.thread.id(),
                if enabled { "enabled" } else { "disabled" }
            );
        }

        match (queues.is_pending(), self.fast_pending.load(Ordering::Relaxed)) {
            (true, false) => self.arm(&mut queues),
            (false, true) => self.disarm(),
            _ => {}
        }
        previous
    }

    pub fn side_effects_enabled(&self) -> bool {
        self.lock().side_effects_enabled
    }

    /// Run `f` with side effects disabled, restoring the previous setting
    /// after, including when `f` panics.
    pub fn without_side_effects<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.set_side_effects_enabled(false);
        let _restore = RestoreSideEffects {
            state: self,
            previous,
        };
        f()
    }

    /// Entries queued and not yet delivered, side-effecting ones included.
    pub fn queued(&self) -> usize {
        self.lock().all.len()
    }

    pub fn stats(&self) -> SafepointStats {
        self.stats.snapshot()
    }

    /// Release everything still queued on a terminated thread.
    pub(crate) fn release_abandoned(&self) {
        let chain = {
            let mut queues = self.lock();
            if self.fast_pending.load(Ordering::Relaxed) {
                self.disarm();
            }
            queues.side_effect_free.clear();
            queues.interrupted = false;
            queues.interrupter = None;
            queues.released = true;
            queues.all.detach()
        };
        if chain.len() > 0 {
            log::debug!(
                "releasing {} handshake(s) abandoned by thread {}",
                chain.len(),
                self.thread.id()
            );
        }
        chain.abandon();
    }

    fn lock(&self) -> MutexGuard<'_, PendingQueues<C>> {
        self.stats.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.queues.lock()
    }

    fn arm(&self, queues: &mut PendingQueues<C>) {
        self.fast_pending.store(true, Ordering::Release);
        self.hook.arm(&self.thread);
        if let Some(interrupter) = &queues.interrupter {
            log::debug!("interrupting blocked thread {}", self.thread.id());
            interrupter.interrupt(&self.thread);
            queues.interrupted = true;
            self.stats.interrupts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn disarm(&self) {
        self.fast_pending.store(false, Ordering::Release);
        self.hook.disarm(&self.thread);
    }
}

impl<C: ?Sized> fmt::Debug for SafepointState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafepointState")
            .field("thread", &self.thread)
            .field("pending", &self.fast_pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct RestoreInterrupter<'a, C: ?Sized + 'static> {
    state: &'a SafepointState<C>,
    previous: Option<Option<Arc<dyn Interrupter>>>,
}

impl<C: ?Sized + 'static> Drop for RestoreInterrupter<'_, C> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.state.clear_blocked(previous);
        }
    }
}

struct RestoreSideEffects<'a, C: ?Sized + 'static> {
    state: &'a SafepointState<C>,
    previous: bool,
}

impl<C: ?Sized + 'static> Drop for RestoreSideEffects<'_, C> {
    fn drop(&mut self) {
        self.state.set_side_effects_enabled(self.previous);
    }
}
