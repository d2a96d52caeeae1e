//! Error taxonomy for namespace resolution and locking.

use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification of an [`NsError`], used by callers to decide between retrying,
/// reporting a business outcome, or unwinding the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input: a bad path, name, or mode.
    Argument,
    /// A broken internal invariant. The transaction is poisoned and must abort.
    Program,
    /// The target already exists.
    Exists,
    /// The target does not exist.
    NotExists,
    /// A recoverable conflict. The caller may retry the enclosing operation.
    Conflict,
    /// The external namespace store failed.
    Store,
}

/// Errors returned by the lock and cache manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NsError {
    /// The path is not a well-formed absolute path.
    #[error("path is invalid: {path:?}")]
    PathIsInvalid {
        /// The offending path.
        path: String,
    },

    /// The root directory was passed where a named entry is required.
    #[error("operation is not permitted on the root directory")]
    PathIsRoot,

    /// A path component (or the final entry) does not exist.
    #[error("path does not exist: {path:?}")]
    PathNotExists {
        /// The path, up to and including the missing component.
        path: String,
    },

    /// The final entry already exists.
    #[error("path already exists: {path:?}")]
    PathExists {
        /// The conflicting path.
        path: String,
    },

    /// The transaction already holds an incompatible lock on a component of this path.
    #[error("path lock conflict within the same transaction: {path:?}")]
    PathLockConflict {
        /// The path, up to and including the conflicting component.
        path: String,
    },

    /// A path component is longer than the configured maximum.
    #[error("invalid entry name {name:?} (max {max_len} bytes)")]
    InvalidName {
        /// The offending name.
        name: String,
        /// The configured maximum name length.
        max_len: usize,
    },

    /// The id cannot be given to a new entry: it is a reserved sentinel or the root's id.
    #[error("node id {id} is reserved")]
    InvalidId {
        /// The offending id.
        id: u64,
    },

    /// No cache slot could be reclaimed for a lock that must be taken.
    #[error("lock cache partition {partition} is exhausted")]
    CacheExhausted {
        /// Index of the exhausted partition.
        partition: usize,
    },

    /// The transaction staged more cache mutations than permitted.
    #[error("staging log overflow: more than {limit} staged mutations")]
    StagingOverflow {
        /// The configured limit.
        limit: usize,
    },

    /// The execution context tried to hold more lock sessions than permitted.
    #[error("held-lock stack overflow: more than {limit} sessions")]
    HeldLocksOverflow {
        /// The configured limit.
        limit: usize,
    },

    /// The transaction was poisoned by an earlier fatal error.
    #[error("transaction was poisoned by an earlier error and can only be aborted")]
    Poisoned,

    /// The service was shut down and accepts no new transactions.
    #[error("namespace lock service is shut down")]
    ShutDown,

    /// A broken internal invariant, e.g. releasing a lock that is not held.
    #[error("program error: {0}")]
    Program(String),

    /// The external namespace store failed.
    #[error("namespace store error: {0}")]
    Store(#[from] StoreError),
}

impl NsError {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PathIsInvalid { .. }
            | Self::PathIsRoot
            | Self::InvalidName { .. }
            | Self::InvalidId { .. } => ErrorClass::Argument,
            Self::PathNotExists { .. } => ErrorClass::NotExists,
            Self::PathExists { .. } => ErrorClass::Exists,
            Self::PathLockConflict { .. } | Self::CacheExhausted { .. } => ErrorClass::Conflict,
            Self::StagingOverflow { .. }
            | Self::HeldLocksOverflow { .. }
            | Self::Poisoned
            | Self::ShutDown
            | Self::Program(_) => ErrorClass::Program,
            Self::Store(_) => ErrorClass::Store,
        }
    }

    /// Whether this error leaves the transaction unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Program | ErrorClass::Store)
    }

    pub(crate) fn program(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(%msg, "lock manager invariant violated, this is a programming bug");
        Self::Program(msg)
    }
}

/// Convenience alias used throughout the crate.
pub type NsResult<T> = Result<T, NsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_recoverable() {
        let err = NsError::PathLockConflict {
            path: "/a".to_owned(),
        };
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(!err.is_fatal());
    }

    #[test]
    fn staging_overflow_is_fatal() {
        let err = NsError::StagingOverflow { limit: 4 };
        assert_eq!(err.class(), ErrorClass::Program);
        assert!(err.is_fatal());
    }

    #[test]
    fn root_rejection_is_an_argument_error() {
        assert_eq!(NsError::PathIsRoot.class(), ErrorClass::Argument);
    }
}
