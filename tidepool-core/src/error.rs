//! Errors of the tidepool client.
use thiserror::Error;

/// Status returned by sampling operations and the transports they consume.
///
/// The taxonomy is shared between the in-process and the networked transport
/// so that consumers can handle failures uniformly. Only [`Unavailable`] is
/// transient; a sampler observing it reopens its stream on the next dispatch.
/// Every other kind is fatal for the sampler that observed it.
///
/// [`Unavailable`]: TidepoolError::Unavailable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TidepoolError {
    /// The operation was aborted by the user or by queue closure.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The rate limiter did not release a sample before the deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The configured sample cap has been reached. Normal termination.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A value or tensor failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid for the current iteration mode.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Timesteps were consumed before a bulk fetch; data would be dropped.
    #[error("data loss: {0}")]
    DataLoss(String),

    /// An invariant of the engine was violated.
    #[error("internal: {0}")]
    Internal(String),

    /// The transport is temporarily unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other transport failure. Fatal.
    #[error("transport: {0}")]
    Transport(String),
}

impl TidepoolError {
    /// True for the only transient kind.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TidepoolError::Unavailable(_))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, TidepoolError::DeadlineExceeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TidepoolError::Cancelled(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, TidepoolError::OutOfRange(_))
    }
}

/// Result alias used across the tidepool crates.
pub type Result<T> = std::result::Result<T, TidepoolError>;
