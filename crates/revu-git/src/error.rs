//! Error types for revu-git.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during git operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No repository at the given path.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Reference not found.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// Object not found or not of the expected type.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A ref moved since it was read (compare-and-swap failure).
    #[error("lock failure on {refname}: expected {expected}, found {actual}")]
    LockFailure {
        /// The ref that failed.
        refname: String,
        /// Expected old value (`0000..` for "must not exist").
        expected: String,
        /// Actual current value.
        actual: String,
    },

    /// Another writer holds the lock on a ref.
    #[error("ref is locked by another writer: {0}")]
    Locked(String),

    /// The same ref was staged twice in one transaction.
    #[error("duplicate ref update for {0}")]
    DuplicateRefUpdate(String),

    /// An object exceeds the configured size limit for in-core merges.
    #[error("object {oid} is too large to merge ({size} bytes, limit {limit})")]
    ObjectTooLarge {
        /// The offending blob.
        oid: String,
        /// Its size.
        size: usize,
        /// Configured limit.
        limit: u64,
    },

    /// Unknown merge strategy name.
    #[error("unknown merge strategy: {0}")]
    UnknownMergeStrategy(String),

    /// Invalid object id string.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Underlying git2 error.
    #[error("git error: {0}")]
    Git2(#[from] git2::Error),
}

impl Error {
    /// Whether this error means a concurrent writer won a race on a ref.
    #[must_use]
    pub fn is_lock_failure(&self) -> bool {
        match self {
            Self::LockFailure { .. } | Self::Locked(_) => true,
            Self::Git2(e) => matches!(
                e.code(),
                git2::ErrorCode::Locked | git2::ErrorCode::Modified
            ),
            _ => false,
        }
    }
}
