//! Shared thread harnesses for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::{
    channel::{self, Receiver, Sender},
    thread::Scope,
};
use crossbeam_utils::Backoff;
use safepoint_handshake::{HandshakeCoordinator, PollResult, ThreadHandle};

enum Command {
    Poll,
    SetSideEffects(bool),
    Exit,
}

enum Reply {
    Polled(PollResult),
    SideEffects(bool),
}

/// A thread that only polls when told to.
pub struct ControlledThread {
    pub thread: ThreadHandle,
    commands: Sender<Command>,
    replies: Receiver<Reply>,
}

impl ControlledThread {
    pub fn spawn<'env>(scope: &Scope<'env>, coordinator: &'env HandshakeCoordinator) -> Self {
        let (command_tx, command_rx) = channel::unbounded();
        let (reply_tx, reply_rx) = channel::unbounded();
        let (handle_tx, handle_rx) = channel::bounded(1);

        scope.spawn(move |_| {
            let state = coordinator.attach();
            handle_tx.send(ThreadHandle::current()).unwrap();
            for command in command_rx {
                let reply = match command {
                    Command::Poll => Reply::Polled(state.poll(&())),
                    Command::SetSideEffects(enabled) => {
                        Reply::SideEffects(state.set_side_effects_enabled(enabled))
                    }
                    Command::Exit => break,
                };
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
        });

        Self {
            thread: handle_rx.recv().unwrap(),
            commands: command_tx,
            replies: reply_rx,
        }
    }

    pub fn poll(&self) -> PollResult {
        self.commands.send(Command::Poll).unwrap();
        match self.replies.recv().unwrap() {
            Reply::Polled(result) => result,
            Reply::SideEffects(_) => panic!("unexpected reply to poll"),
        }
    }

    pub fn set_side_effects_enabled(&self, enabled: bool) -> bool {
        self.commands.send(Command::SetSideEffects(enabled)).unwrap();
        match self.replies.recv().unwrap() {
            Reply::SideEffects(previous) => previous,
            Reply::Polled(_) => panic!("unexpected reply to side effect toggle"),
        }
    }
}

impl Drop for ControlledThread {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Exit);
    }
}

/// Threads that poll continuously until `running` is cleared.
///
/// Poll failures are counted in `failures` rather than stopping the thread.
pub fn spawn_pollers<'env>(
    scope: &Scope<'env>,
    coordinator: &'env HandshakeCoordinator,
    running: &'env AtomicBool,
    failures: &'env AtomicUsize,
    count: usize,
) -> Vec<ThreadHandle> {
    let (handle_tx, handle_rx) = channel::unbounded();

    for _ in 0..count {
        let handle_tx = handle_tx.clone();
        scope.spawn(move |_| {
            let state = coordinator.attach();
            handle_tx.send(ThreadHandle::current()).unwrap();
            let backoff = Backoff::new();
            while running.load(Ordering::Acquire) {
                if state.is_pending() {
                    backoff.reset();
                    if state.poll(&()).is_err() {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                } else {
                    backoff.snooze();
                }
            }
        });
    }

    handle_rx.iter().take(count).collect()
}
