//! Handshake requests and their completion handles.
//!
//! A handshake request is created once per submission and shared by every target
//! thread. Each target performs it exactly once at a poll point ("arrives");
//! the thread making the last arrival runs the completion callback and wakes
//! anyone blocked in [`HandshakeHandle::wait`].
//!
//! Cancellation only suppresses the action for arrivals that have not happened
//! yet. Targets still arrive, so a cancelled handshake completes normally once
//! every target has polled.

pub(crate) mod entry;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::error::{ActionError, ActionResult, HandshakeError};

/// Action run on every target thread; receives the poll site's context.
pub type HandshakeAction<C> = Box<dyn Fn(&C) -> ActionResult + Send + Sync>;

/// Runs once, on the thread that makes the last arrival.
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

pub(crate) struct Handshake<C: ?Sized> {
    action: HandshakeAction<C>,
    on_done: Mutex<Option<CompletionCallback>>,
    side_effecting: bool,
    total: usize,
    remaining: AtomicUsize,
    cancelled: AtomicBool,
    completed: Mutex<bool>,
    completed_cv: Condvar,
}

impl<C: ?Sized> Handshake<C> {
    pub(crate) fn new(
        action: HandshakeAction<C>,
        on_done: CompletionCallback,
        side_effecting: bool,
        total: usize,
    ) -> Self {
        Self {
            action,
            on_done: Mutex::new(Some(on_done)),
            side_effecting,
            total,
            remaining: AtomicUsize::new(total),
            cancelled: AtomicBool::new(false),
            completed: Mutex::new(false),
            completed_cv: Condvar::new(),
        }
    }

    pub(crate) fn is_side_effecting(&self) -> bool {
        self.side_effecting
    }

    /// Run the action for one target thread and record its arrival.
    ///
    /// The arrival is counted whether the action succeeds, fails, panics or is
    /// suppressed by cancellation. A failure is returned only after the
    /// arrival and, for the last arrival, the completion callback.
    pub(crate) fn perform(&self, context: &C) -> ActionResult {
        let outcome = if self.cancelled.load(Ordering::Acquire) {
            Ok(())
        } else {
            panic::catch_unwind(AssertUnwindSafe(|| (self.action)(context)))
                .unwrap_or_else(|payload| Err(ActionError::from_panic(payload)))
        };

        match (outcome, self.arrive()) {
            (Err(failure), Err(callback_failure)) => {
                log::warn!("completion callback failed after action failure: {callback_failure}");
                Err(failure)
            }
            (outcome, arrival) => outcome.and(arrival),
        }
    }

    /// Count one arrival without running the action.
    pub(crate) fn arrive(&self) -> ActionResult {
        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "more arrivals than target threads");
        if previous == 1 {
            self.complete()
        } else {
            Ok(())
        }
    }

    /// Finish a handshake that had no target threads at all.
    pub(crate) fn complete_without_targets(&self) -> ActionResult {
        debug_assert_eq!(self.total, 0);
        self.complete()
    }

    fn complete(&self) -> ActionResult {
        let callback = self.on_done.lock().take();
        let result = match callback {
            Some(callback) => {
                panic::catch_unwind(AssertUnwindSafe(callback)).map_err(ActionError::from_panic)
            }
            None => Ok(()),
        };

        let mut completed = self.completed.lock();
        *completed = true;
        self.completed_cv.notify_all();
        result
    }

    fn cancel(&self) -> bool {
        if self.remaining.load(Ordering::Acquire) > 0 {
            self.cancelled.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn wait(&self) {
        let mut completed = self.completed.lock();
        while !*completed {
            self.completed_cv.wait(&mut completed);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<(), HandshakeError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return Ok(());
        };

        let mut completed = self.completed.lock();
        while !*completed {
            if self.completed_cv.wait_until(&mut completed, deadline).timed_out() && !*completed {
                return Err(HandshakeError::Timeout {
                    timeout,
                    remaining: self.remaining.load(Ordering::Acquire),
                    total: self.total,
                });
            }
        }
        Ok(())
    }
}

impl<C: ?Sized> fmt::Debug for Handshake<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("side_effecting", &self.side_effecting)
            .field("total", &self.total)
            .field("remaining", &self.remaining.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Requester-side view of a submitted handshake.
///
/// # Done versus arrived
///
/// [`is_done`](Self::is_done) is true as soon as the handshake is cancelled,
/// even if some targets have not polled yet: after cancellation no further
/// action will run. Callers that need every target to have reached a poll
/// point must use [`wait`](Self::wait) or check [`remaining`](Self::remaining),
/// which only reach completion once all targets have arrived.
pub struct HandshakeHandle<C: ?Sized = ()> {
    handshake: Arc<Handshake<C>>,
}

impl<C: ?Sized> HandshakeHandle<C> {
    pub(crate) fn new(handshake: Arc<Handshake<C>>) -> Self {
        Self { handshake }
    }

    /// Suppress the action on every target that has not arrived yet.
    ///
    /// Returns false when all targets had already arrived. Cancellation never
    /// removes pending entries: targets still arrive at their next poll and
    /// the completion callback still runs on the last one.
    pub fn cancel(&self) -> bool {
        self.handshake.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handshake.cancelled.load(Ordering::Acquire)
    }

    /// Cancelled, or every target has arrived.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.remaining() == 0
    }

    /// Targets that have not arrived yet.
    pub fn remaining(&self) -> usize {
        self.handshake.remaining.load(Ordering::Acquire)
    }

    pub fn target_count(&self) -> usize {
        self.handshake.total
    }

    pub fn is_side_effecting(&self) -> bool {
        self.handshake.side_effecting
    }

    /// Block until every target has arrived and the completion callback ran.
    pub fn wait(&self) {
        self.handshake.wait();
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. A timeout does
    /// not change the handshake.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::Timeout`] when some target has not arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), HandshakeError> {
        self.handshake.wait_timeout(timeout)
    }
}

impl<C: ?Sized> Clone for HandshakeHandle<C> {
    fn clone(&self) -> Self {
        Self {
            handshake: Arc::clone(&self.handshake),
        }
    }
}

impl<C: ?Sized> fmt::Debug for HandshakeHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandshakeHandle")
            .field(&self.handshake)
            .finish()
    }
}
