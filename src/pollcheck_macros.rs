//! Loop helpers that insert safepoint polls
//!
//! Long-running loops in host code must reach a poll point regularly or
//! handshakes targeting the thread are never serviced. These macros poll a
//! [`SafepointState`](crate::SafepointState) every `N` iterations and
//! propagate a poll failure with `?`, so the enclosing function must return a
//! `Result` whose error type converts from [`PollError`](crate::PollError).

/// Loop with a poll every `N` iterations (and before the first one).
///
/// # Panics
///
/// Panics when `N` is zero.
///
/// # Examples
///
/// ```
/// use safepoint_handshake::{poll_loop, HandshakeCoordinator, PollError};
///
/// fn sum(coordinator: &HandshakeCoordinator) -> Result<u64, PollError> {
///     let state = coordinator.attach();
///     let mut total = 0;
///     poll_loop!(state, &(), every 1_000, for i in 0..10_000u64 => {
///         total += i;
///     });
///     Ok(total)
/// }
///
/// let coordinator = HandshakeCoordinator::new();
/// assert_eq!(sum(&coordinator).unwrap(), (0..10_000).sum());
/// ```
#[macro_export]
macro_rules! poll_loop {
    ($state:expr, $context:expr, every $n:expr, for $var:pat in $iter:expr => { $($body:tt)* }) => {
        {
            let _poll_state = &$state;
            let _poll_every: usize = $n;
            assert!(_poll_every > 0, "poll_loop! interval must be at least 1");
            let mut _poll_counter: usize = 0;
            for $var in $iter {
                if _poll_counter % _poll_every == 0 {
                    _poll_state.poll($context)?;
                }
                _poll_counter += 1;
                $($body)*
            }
        }
    };

    ($state:expr, $context:expr, every $n:expr, while $cond:expr => { $($body:tt)* }) => {
        {
            let _poll_state = &$state;
            let _poll_every: usize = $n;
            assert!(_poll_every > 0, "poll_loop! interval must be at least 1");
            let mut _poll_counter: usize = 0;
            while $cond {
                if _poll_counter % _poll_every == 0 {
                    _poll_state.poll($context)?;
                }
                _poll_counter += 1;
                $($body)*
            }
        }
    };
}
