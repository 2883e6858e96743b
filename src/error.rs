use crate::key::Key;
use crate::processor::EVersion;
use std::io;
use std::path::PathBuf;

/// Boxed application error carried through [`Error::Other`] and
/// [`Error::Transient`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a [`Store`](crate::Store) implementation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Filesystem or other I/O failure.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or group file could not be encoded or decoded.
    #[error("malformed store data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transaction read an entity group that another writer changed before
    /// the transaction committed.
    #[error("transaction collided with a concurrent commit to entity group {group}")]
    Contention {
        /// Root key of the contended group.
        group: Key,
    },

    /// A group file's content does not match its recorded hash.
    #[error("group file {} failed its integrity check", path.display())]
    Corrupt {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// A thread panicked while holding the store's internal lock.
    #[error("store lock poisoned by a panicking writer")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the failed operation from scratch may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Contention { .. } | StoreError::Poisoned
        )
    }
}

/// Errors returned by [`process_batch`](crate::process_batch) and by
/// [`Processor`](crate::Processor) implementations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The entity's EVersion changed between loading its state and
    /// re-checking it inside the transaction. Retry the whole batch.
    #[error("concurrent modification: state loaded at EVersion {expected}, found {actual}")]
    ConcurrentModification {
        expected: EVersion,
        actual: EVersion,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Application error the caller may retry.
    #[error(transparent)]
    Transient(BoxError),

    /// Any other application error, returned verbatim.
    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// Wrap an application error.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Error::Other(err.into())
    }

    /// Wrap an application error and tag it as retryable.
    pub fn transient(err: impl Into<BoxError>) -> Self {
        Error::Transient(err.into())
    }

    /// Whether the caller's retry policy should retry the operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventbox::{EVersion, Error};
    ///
    /// let err = Error::ConcurrentModification {
    ///     expected: EVersion(3),
    ///     actual: EVersion(4),
    /// };
    /// assert!(err.is_transient());
    /// assert!(!Error::other("bad config").is_transient());
    /// assert!(Error::transient("backend busy").is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ConcurrentModification { .. } | Error::Transient(_) => true,
            Error::Store(err) => err.is_transient(),
            Error::Other(_) => false,
        }
    }
}
