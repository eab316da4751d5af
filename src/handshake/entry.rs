//! Per-thread pending entries and their ordered draining.
//!
//! Submission appends to the newest end of a thread's list in O(1). Draining
//! detaches the whole list and walks it from the oldest entry with a plain
//! loop, so queue depth never turns into stack depth. Oldest-first order is
//! what keeps two handshakes that rendezvous between threads from being
//! serviced in opposite orders on different threads.

use std::{fmt, mem, sync::Arc};

use crate::error::{PollError, PollResult};

use super::Handshake;

/// One (handshake, target thread) pairing.
pub(crate) struct HandshakeEntry<C: ?Sized> {
    handshake: Arc<Handshake<C>>,
}

impl<C: ?Sized> HandshakeEntry<C> {
    pub(crate) fn new(handshake: Arc<Handshake<C>>) -> Self {
        Self { handshake }
    }

    pub(crate) fn is_side_effecting(&self) -> bool {
        self.handshake.is_side_effecting()
    }
}

impl<C: ?Sized> Clone for HandshakeEntry<C> {
    fn clone(&self) -> Self {
        Self {
            handshake: Arc::clone(&self.handshake),
        }
    }
}

/// Entries queued on one thread, oldest first.
pub(crate) struct PendingList<C: ?Sized> {
    entries: Vec<HandshakeEntry<C>>,
}

impl<C: ?Sized> PendingList<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: HandshakeEntry<C>) {
        self.entries.push(entry);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take every entry, leaving the list empty.
    pub(crate) fn detach(&mut self) -> EntryChain<C> {
        EntryChain {
            entries: mem::take(&mut self.entries),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries that were delivered through the side-effect-free list.
    pub(crate) fn retain_side_effecting(&mut self) {
        self.entries.retain(HandshakeEntry::is_side_effecting);
    }
}

/// A detached run of entries, owned by the thread that will service them.
pub(crate) struct EntryChain<C: ?Sized> {
    entries: Vec<HandshakeEntry<C>>,
}

impl<C: ?Sized> EntryChain<C> {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Perform every entry in submission order and combine their failures.
    ///
    /// Every entry is performed even after a failure; the combined failure is
    /// returned once the chain is exhausted.
    pub(crate) fn drain(self, context: &C) -> PollResult {
        let mut failure = None;
        for entry in self.entries {
            if let Err(error) = entry.handshake.perform(context) {
                failure = Some(PollError::combine(failure, error));
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Count every entry as arrived without running its action.
    pub(crate) fn abandon(self) {
        for entry in self.entries {
            if let Err(error) = entry.handshake.arrive() {
                log::warn!("completion callback failed while releasing abandoned handshake: {error}");
            }
        }
    }
}

impl<C: ?Sized> fmt::Debug for EntryChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryChain")
            .field("len", &self.entries.len())
            .finish()
    }
}
