//! Cooperative thread-local handshakes.
//!
//! A requester asks a set of running threads to execute a callback. Each
//! target runs it at a poll point of its own choosing, without signals or
//! preemption. Polling costs one atomic load while nothing is pending.
//!
//! ```
//! use safepoint_handshake::{HandshakeCoordinator, ThreadHandle};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let coordinator: Arc<HandshakeCoordinator> = Arc::new(HandshakeCoordinator::new());
//! let (tx, rx) = std::sync::mpsc::channel();
//!
//! let worker = {
//!     let coordinator = Arc::clone(&coordinator);
//!     thread::spawn(move || {
//!         let state = coordinator.attach();
//!         tx.send(ThreadHandle::current()).unwrap();
//!         // Poll until the handshake shows up.
//!         while !state.is_pending() {
//!             thread::yield_now();
//!         }
//!         state.poll(&()).unwrap();
//!     })
//! };
//!
//! let target = rx.recv().unwrap();
//! let handle = coordinator
//!     .submit_to_threads(&[target], |_: &()| Ok(()), || {}, false)
//!     .unwrap();
//! handle.wait();
//! worker.join().unwrap();
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handshake;
pub mod interfaces;
pub mod pollcheck_macros;
pub mod safepoint;
pub mod thread;

pub use config::HandshakeConfig;
pub use coordinator::HandshakeCoordinator;
pub use error::{ActionError, ActionResult, HandshakeError, PollError, PollResult};
pub use handshake::{CompletionCallback, HandshakeAction, HandshakeHandle};
pub use interfaces::{FastFlagHook, NoopFastFlag};
pub use safepoint::{Interrupter, SafepointState, SafepointStats, ThreadUnparker};
pub use thread::{ThreadHandle, ThreadRegistry};
