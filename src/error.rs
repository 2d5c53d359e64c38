//! Crate-wide error type.
//!
//! Every component (cache, bus, hybrid, lock, queue, jobs) shares one closed
//! set of error kinds instead of a per-module error enum, because a lock
//! timeout and a queue dequeue timeout are the same kind of failure from a
//! caller's point of view. This mirrors how several `*Error` enums
//! (`QueueError`, `SchedulerError`, `WorkerError`) each wrap the same
//! handful of concerns in `thiserror`.

use thiserror::Error;

/// The closed set of error kinds surfaced by every `warden` component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Null/empty key, null collections, non-positive page size, or a
    /// cross-type numeric operation. Raised synchronously at the boundary
    /// with no side effects.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation that requires a particular state was attempted from an
    /// incompatible one (e.g. completing an already-resolved queue entry).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A list operation targeted a non-list key, or a numeric operation
    /// targeted a key whose stored payload isn't a compatible number.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Encoding or decoding through the `Serializer` failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A dequeue/acquire window elapsed without success.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A `CancellationToken` fired before the operation completed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The underlying bus or remote cache failed after permitted retries.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for [`CoreError::InvalidState`].
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Shorthand for [`CoreError::TypeMismatch`].
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Shorthand for [`CoreError::Serialization`].
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Shorthand for [`CoreError::Timeout`].
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Shorthand for [`CoreError::Cancelled`].
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Shorthand for [`CoreError::Transport`].
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Result alias used throughout the crate's public API.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_matching_variants() {
        assert!(matches!(
            CoreError::invalid_argument("x"),
            CoreError::InvalidArgument(_)
        ));
        assert!(matches!(CoreError::timeout("x"), CoreError::Timeout(_)));
    }
}
