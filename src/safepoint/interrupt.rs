//! Waking threads that block outside their poll sites.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::thread::ThreadHandle;

/// Wakes a blocked thread so it can service a newly pending handshake.
///
/// `interrupt` is called by submitters while the target's safepoint lock is
/// held; it must not block. `reset_interrupted` is called on the owning thread
/// once the interruption has been consumed.
pub trait Interrupter: Send + Sync {
    fn interrupt(&self, thread: &ThreadHandle);

    fn reset_interrupted(&self);
}

/// Interrupter for threads that block in [`std::thread::park`].
///
/// # Examples
///
/// ```
/// use safepoint_handshake::safepoint::{Interrupter, ThreadUnparker};
/// use safepoint_handshake::thread::ThreadHandle;
///
/// let unparker = ThreadUnparker::new();
/// unparker.interrupt(&ThreadHandle::current());
/// assert!(unparker.is_interrupted());
///
/// // Returns at once: the interruption is already recorded.
/// unparker.park_while(|| true);
///
/// unparker.reset_interrupted();
/// assert!(!unparker.is_interrupted());
/// ```
#[derive(Default)]
pub struct ThreadUnparker {
    interrupted: AtomicBool,
}

impl ThreadUnparker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Park the calling thread while `blocked` holds and no interruption is
    /// recorded.
    pub fn park_while(&self, mut blocked: impl FnMut() -> bool) {
        while blocked() && !self.is_interrupted() {
            thread::park();
        }
    }

    /// Like [`park_while`](Self::park_while) with a deadline. Returns false if
    /// the deadline passed while still blocked and uninterrupted.
    pub fn park_while_timeout(&self, mut blocked: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while blocked() && !self.is_interrupted() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::park_timeout(deadline - now);
        }
        true
    }
}

impl Interrupter for ThreadUnparker {
    fn interrupt(&self, thread: &ThreadHandle) {
        self.interrupted.store(true, Ordering::Release);
        thread.unpark();
    }

    fn reset_interrupted(&self) {
        self.interrupted.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ThreadUnparker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadUnparker")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
