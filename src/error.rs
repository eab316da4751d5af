//! Error types for handshake submission, waiting and poll processing.

use std::{any::Any, error::Error, fmt, time::Duration};

use thiserror::Error;

/// Boxed error produced by a handshake action.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors reported to the thread that submitted or waits on a handshake.
///
/// # Examples
///
/// ```
/// use safepoint_handshake::error::HandshakeError;
/// use std::time::Duration;
///
/// let dead = HandshakeError::ThreadNotAlive { thread: 7 };
/// assert_eq!(dead.to_string(), "thread 7 is not alive");
///
/// let timeout = HandshakeError::Timeout {
///     timeout: Duration::from_millis(5),
///     remaining: 1,
///     total: 2,
/// };
/// assert!(timeout.to_string().contains("1/2"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// A submission targeted a thread that already terminated.
    #[error("thread {thread} is not alive")]
    ThreadNotAlive { thread: u64 },
    /// A timed wait elapsed before every target thread arrived.
    #[error("timed out after {timeout:?} with {remaining}/{total} threads still to arrive")]
    Timeout {
        timeout: Duration,
        remaining: usize,
        total: usize,
    },
}

/// Failure of a single handshake action on one thread.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The action returned an error.
    #[error("handshake action failed: {0}")]
    Failed(#[source] BoxError),
    /// The action panicked. The panic was contained at the poll site.
    #[error("handshake action panicked: {0}")]
    Panicked(String),
    /// The action asks the polling thread to terminate. Takes precedence over
    /// every other failure drained in the same poll.
    #[error("thread termination requested: {reason}")]
    ThreadTermination { reason: String },
}

impl ActionError {
    /// Wrap an arbitrary error as an ordinary action failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        ActionError::Failed(error.into())
    }

    /// Build the fatal thread-termination signal.
    pub fn terminate(reason: impl Into<String>) -> Self {
        ActionError::ThreadTermination {
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::ThreadTermination { .. })
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ActionError::Panicked(message)
    }
}

/// Combined failure of every action drained during one poll.
///
/// The primary cause is the first failure, unless a later action produced
/// [`ActionError::ThreadTermination`], in which case the latest termination
/// signal is primary and everything before it is suppressed. A superseded
/// primary moves to the front of the suppressed list, ahead of the causes it
/// had suppressed.
#[derive(Debug)]
pub struct PollError {
    primary: ActionError,
    suppressed: Vec<ActionError>,
}

impl PollError {
    pub fn new(primary: ActionError) -> Self {
        Self {
            primary,
            suppressed: Vec::new(),
        }
    }

    /// Fold the next failure into a running combined failure.
    pub fn combine(current: Option<PollError>, next: ActionError) -> PollError {
        match current {
            None => PollError::new(next),
            Some(current) if next.is_fatal() => {
                let mut suppressed = Vec::with_capacity(current.suppressed.len() + 1);
                suppressed.push(current.primary);
                suppressed.extend(current.suppressed);
                PollError {
                    primary: next,
                    suppressed,
                }
            }
            Some(mut current) => {
                current.suppressed.push(next);
                current
            }
        }
    }

    pub fn primary(&self) -> &ActionError {
        &self.primary
    }

    pub fn suppressed(&self) -> &[ActionError] {
        &self.suppressed
    }

    /// True when the polling thread was asked to terminate.
    pub fn is_fatal(&self) -> bool {
        self.primary.is_fatal()
    }

    pub fn into_parts(self) -> (ActionError, Vec<ActionError>) {
        (self.primary, self.suppressed)
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        match self.suppressed.len() {
            0 => Ok(()),
            1 => write!(f, " (1 suppressed failure)"),
            n => write!(f, " ({n} suppressed failures)"),
        }
    }
}

impl Error for PollError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.primary)
    }
}

impl From<ActionError> for PollError {
    fn from(primary: ActionError) -> Self {
        PollError::new(primary)
    }
}

/// Result of servicing pending handshakes at a poll point.
pub type PollResult = Result<(), PollError>;

/// Result returned by a handshake action.
pub type ActionResult = Result<(), ActionError>;
