// Threading hooks supplied by the host engine.
//
// The core keeps its own pending flag per thread. Engines that compile poll
// checks into generated code usually mirror that flag into a location their
// code can test cheaply (a thread-local word, a guard page); FastFlagHook is
// where that mirroring happens.
use crate::thread::ThreadHandle;

/// Arms and disarms the engine-visible pending flag of a thread.
///
/// Both methods are called while the target thread's safepoint lock is held,
/// so they must not block and must not call back into the handshake API for
/// the same thread. The read side at the poll site must not take any lock.
pub trait FastFlagHook: Send + Sync + 'static {
    /// A handshake became pending for `thread`.
    fn arm(&self, thread: &ThreadHandle);

    /// Nothing is pending for `thread` any more.
    fn disarm(&self, thread: &ThreadHandle);
}

/// Hook for hosts that poll the core's own flag directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFastFlag;

impl FastFlagHook for NoopFastFlag {
    #[inline]
    fn arm(&self, _thread: &ThreadHandle) {}

    #[inline]
    fn disarm(&self, _thread: &ThreadHandle) {}
}
