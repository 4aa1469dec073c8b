use std::time::Duration;

use thiserror::Error;

/// Failures of the coordination store transport itself, below the level of
/// the locking protocol.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable or returned a transport-level error.
    #[error("coordination store unavailable: {0}")]
    Transport(#[from] redis::RedisError),

    /// A counter key holds a value that does not parse as an integer.
    #[error("value at {key:?} is not an integer")]
    InvalidInteger { key: String },
}

/// Errors surfaced to protocol participants.
///
/// Contention never raises by itself; it becomes [`Error::AcquireTimeout`]
/// only once a primitive acquire has polled past its deadline. A cohort gate
/// found expired at release time is logged, not raised; losing an interior
/// mutex, on the other hand, means the critical section outlived its TTL
/// budget and is always fatal for the current operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A primitive acquire could not complete within its deadline. The entry
    /// protocol rolls back any counter increment made before the failure.
    #[error("could not acquire lock {key:?} within {timeout:?}")]
    AcquireTimeout { key: String, timeout: Duration },

    /// A scoped release found a foreign or absent value where this
    /// participant's owner token was expected.
    #[error("lock {key:?} was lost before release")]
    LockLost { key: String },

    /// The coordination store failed underneath the protocol.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A counter went negative, or a non-first entrant found its cohort gate
    /// unset. Indicates tampering or a crashed participant whose state was
    /// never reconciled.
    #[error("protocol invariant violated for {resource:?}: {detail}")]
    InvariantViolation { resource: String, detail: String },

    /// The calling thread is already inside a critical section for this
    /// resource. The protocol is not reentrant; without this check the
    /// caller would deadlock on its own gate.
    #[error("re-entrant access to {resource:?}")]
    Reentrant { resource: String },
}

impl Error {
    pub(crate) fn invariant(resource: &str, detail: impl Into<String>) -> Error {
        Error::InvariantViolation {
            resource: resource.to_string(),
            detail: detail.into(),
        }
    }
}
