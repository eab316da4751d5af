//! Property tests for delivery order and failure combination

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use safepoint_handshake::{
    ActionError, ActionResult, HandshakeCoordinator, HandshakeHandle, PollResult, ThreadHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    Fail,
    Terminate,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        3 => Just(Outcome::Succeed),
        1 => Just(Outcome::Fail),
        1 => Just(Outcome::Terminate),
    ]
}

fn submit(
    coordinator: &HandshakeCoordinator,
    log: &Arc<Mutex<Vec<usize>>>,
    index: usize,
    outcome: Outcome,
    side_effecting: bool,
) -> HandshakeHandle {
    let log = Arc::clone(log);
    coordinator
        .submit_to_threads(
            &[ThreadHandle::current()],
            move |_: &()| -> ActionResult {
                log.lock().push(index);
                match outcome {
                    Outcome::Succeed => Ok(()),
                    Outcome::Fail => Err(ActionError::failed(format!("{index}"))),
                    Outcome::Terminate => Err(ActionError::terminate(format!("{index}"))),
                }
            },
            || {},
            side_effecting,
        )
        .unwrap()
}

fn label(error: &ActionError) -> String {
    match error {
        ActionError::Failed(source) => format!("fail {source}"),
        ActionError::ThreadTermination { reason } => format!("terminate {reason}"),
        ActionError::Panicked(message) => format!("panic {message}"),
    }
}

/// Expected (primary, suppressed) labels for outcomes delivered in order.
fn expected_failure(delivered: &[(usize, Outcome)]) -> Option<(String, Vec<String>)> {
    let mut primary: Option<String> = None;
    let mut suppressed = Vec::new();
    for &(index, outcome) in delivered {
        let (current, fatal) = match outcome {
            Outcome::Succeed => continue,
            Outcome::Fail => (format!("fail {index}"), false),
            Outcome::Terminate => (format!("terminate {index}"), true),
        };
        primary = Some(match primary.take() {
            None => current,
            Some(previous) if fatal => {
                suppressed.insert(0, previous);
                current
            }
            Some(previous) => {
                suppressed.push(current);
                previous
            }
        });
    }
    primary.map(|primary| (primary, suppressed))
}

fn observed_failure(result: PollResult) -> Option<(String, Vec<String>)> {
    result
        .err()
        .map(|error| (label(error.primary()), error.suppressed().iter().map(label).collect()))
}

proptest! {
    #[test]
    fn single_poll_runs_everything_in_order(outcomes in prop::collection::vec(outcome(), 0..24)) {
        let coordinator: HandshakeCoordinator = HandshakeCoordinator::new();
        let state = coordinator.attach();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = outcomes
            .iter()
            .enumerate()
            .map(|(index, &outcome)| submit(&coordinator, &log, index, outcome, index % 2 == 0))
            .collect();

        let delivered: Vec<_> = outcomes.iter().copied().enumerate().collect();
        let result = state.poll(&());

        prop_assert_eq!(log.lock().clone(), (0..outcomes.len()).collect::<Vec<_>>());
        prop_assert_eq!(observed_failure(result), expected_failure(&delivered));
        prop_assert!(handles.iter().all(HandshakeHandle::is_done));
        prop_assert!(!state.is_pending());
    }

    #[test]
    fn deferred_work_keeps_relative_order(
        entries in prop::collection::vec((outcome(), any::<bool>()), 0..24)
    ) {
        let coordinator: HandshakeCoordinator = HandshakeCoordinator::new();
        let state = coordinator.attach();
        let log = Arc::new(Mutex::new(Vec::new()));

        state.set_side_effects_enabled(false);
        for (index, &(outcome, side_effecting)) in entries.iter().enumerate() {
            submit(&coordinator, &log, index, outcome, side_effecting);
        }

        let (free, effecting): (Vec<_>, Vec<_>) = entries
            .iter()
            .enumerate()
            .map(|(index, &(outcome, side_effecting))| (index, outcome, side_effecting))
            .partition(|&(_, _, side_effecting)| !side_effecting);
        let free: Vec<_> = free.into_iter().map(|(index, outcome, _)| (index, outcome)).collect();
        let effecting: Vec<_> = effecting
            .into_iter()
            .map(|(index, outcome, _)| (index, outcome))
            .collect();

        let first = state.poll(&());
        prop_assert_eq!(
            log.lock().clone(),
            free.iter().map(|&(index, _)| index).collect::<Vec<_>>()
        );
        prop_assert_eq!(observed_failure(first), expected_failure(&free));
        prop_assert_eq!(state.queued(), effecting.len());

        log.lock().clear();
        state.set_side_effects_enabled(true);
        let second = state.poll(&());
        prop_assert_eq!(
            log.lock().clone(),
            effecting.iter().map(|&(index, _)| index).collect::<Vec<_>>()
        );
        prop_assert_eq!(observed_failure(second), expected_failure(&effecting));
        prop_assert_eq!(state.queued(), 0);
    }
}
