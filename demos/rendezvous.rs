//! Rendezvous of running threads through a handshake
//!
//! Four workers spin in a computation loop that polls every few thousand
//! iterations. The main thread asks all of them to meet at a barrier, then
//! wakes a worker parked outside its loop, and finally asks every thread to
//! terminate.

use anyhow::{Context, bail};
use crossbeam::channel;
use safepoint_handshake::{
    ActionError, ActionResult, HandshakeCoordinator, PollError, SafepointState, ThreadHandle,
    ThreadUnparker, poll_loop,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 4;

fn spin(state: &SafepointState, iterations: &AtomicUsize) -> Result<(), PollError> {
    poll_loop!(state, &(), every 4_096, for _ in 0u64.. => {
        iterations.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    });
    Ok(())
}

fn main() -> anyhow::Result<()> {
    println!("Handshake Rendezvous Demo");
    println!("=========================");

    let coordinator: Arc<HandshakeCoordinator> = Arc::new(HandshakeCoordinator::new());
    let iterations = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::unbounded();

    let workers: Vec<_> = (0..WORKERS)
        .map(|id| {
            let coordinator = Arc::clone(&coordinator);
            let iterations = Arc::clone(&iterations);
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    let state = coordinator.attach();
                    tx.send(ThreadHandle::current())
                        .map_err(|_| ActionError::terminate("demo shut down"))?;
                    spin(&state, &iterations)
                })
        })
        .collect::<std::io::Result<_>>()
        .context("spawning workers")?;
    let targets: Vec<ThreadHandle> = rx.iter().take(WORKERS).collect();

    println!("\n1. Rendezvous:");
    let barrier = Arc::new(Barrier::new(WORKERS));
    let arrived = Arc::new(AtomicUsize::new(0));
    let handle = {
        let arrived = Arc::clone(&arrived);
        coordinator.submit_to_threads(
            &targets,
            move |_: &()| -> ActionResult {
                let me = ThreadHandle::current();
                println!("   {} waiting at the barrier", me.name().unwrap_or("?"));
                barrier.wait();
                arrived.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || println!("   all workers met"),
            false,
        )?
    };
    handle.wait_timeout(Duration::from_secs(10))?;
    println!(
        "   {} workers arrived after {} loop iterations",
        arrived.load(Ordering::SeqCst),
        iterations.load(Ordering::Relaxed)
    );

    println!("\n2. Waking a parked thread:");
    let parked = {
        let coordinator = Arc::clone(&coordinator);
        let (tx, rx) = channel::bounded(1);
        let parked = thread::spawn(move || -> Result<(), PollError> {
            let state = coordinator.attach();
            let unparker = Arc::new(ThreadUnparker::new());
            let idle = AtomicBool::new(true);
            let _ = tx.send(ThreadHandle::current());
            state.blocked(unparker.clone(), || {
                unparker.park_while(|| idle.load(Ordering::Acquire));
            });
            println!("   parked thread woke up, polling");
            state.poll(&())
        });
        (parked, rx.recv().context("parked thread never started")?)
    };
    coordinator
        .submit_to_threads(
            &[parked.1],
            |_: &()| -> ActionResult {
                println!("   handshake ran on the formerly parked thread");
                Ok(())
            },
            || {},
            false,
        )?
        .wait_timeout(Duration::from_secs(10))?;
    parked
        .0
        .join()
        .map_err(|_| anyhow::anyhow!("parked thread panicked"))??;

    println!("\n3. Termination:");
    let stop = coordinator.submit_to_threads(
        &targets,
        |_: &()| Err(ActionError::terminate("demo finished")),
        || {},
        false,
    )?;
    stop.wait_timeout(Duration::from_secs(10))?;

    for worker in workers {
        match worker.join() {
            Ok(Err(error)) if error.is_fatal() => println!("   worker stopped: {error}"),
            Ok(Err(error)) => bail!("worker failed: {error}"),
            Ok(Ok(())) => bail!("worker left its loop without a request"),
            Err(_) => bail!("worker panicked"),
        }
    }

    println!("\nDone.");
    Ok(())
}
