//! Error types for revu-core.

use std::path::PathBuf;

use crate::model::ChangeId;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used by callers to decide whether to
/// retry and how to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Precondition failed; user-actionable, never retried.
    Conflict,
    /// A ref moved under us; retried by [`RetryHelper`](crate::update::RetryHelper).
    Contention,
    /// Commit or policy validation rejected the update.
    Validation,
    /// I/O or repository failure.
    Infrastructure,
    /// The acting user lacks a permission.
    Auth,
    /// A change, patch set, ref or object does not exist.
    NotFound,
    /// Malformed input.
    BadRequest,
}

/// Errors that can occur in revu-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Site directory has not been initialized.
    #[error("site not initialized at {0} - run `revu init` first")]
    NotInitialized(PathBuf),

    /// Site directory already initialized.
    #[error("site already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    /// Project repository does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Project repository already exists.
    #[error("project already exists: {0}")]
    ProjectExists(String),

    /// Change does not exist.
    #[error("change {0} not found")]
    ChangeNotFound(ChangeId),

    /// Something other than a change was not found.
    #[error("{0}")]
    NotFound(String),

    /// A precondition on the change state failed.
    #[error("{0}")]
    Conflict(String),

    /// The request cannot be processed in the current state.
    #[error("{0}")]
    Unprocessable(String),

    /// A merge produced conflicts and conflicts were not allowed.
    #[error("The change could not be rebased due to a conflict during merge.\n\nmerge conflict(s):\n{}", .paths.join("\n"))]
    MergeConflict {
        /// Sorted unmerged paths.
        paths: Vec<String>,
    },

    /// Retries were exhausted on ref contention.
    #[error("update failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The contention error from the final attempt.
        last: Box<Error>,
    },

    /// Commit validation rejected the update.
    #[error("commit validation failed: {0}")]
    Validation(String),

    /// Permission denied.
    #[error("{0}")]
    AuthDenied(String),

    /// Invalid user input.
    #[error("{0}")]
    BadRequest(String),

    /// Stored metadata could not be interpreted.
    #[error("corrupt metadata for change {change}: {message}")]
    CorruptNotes {
        /// The change whose notes are unreadable.
        change: ChangeId,
        /// What went wrong.
        message: String,
    },

    /// Cache file could not be decoded.
    #[error("cache codec error: {0}")]
    CacheCodec(String),

    /// Notification runtime failure.
    #[error("notification error: {0}")]
    Notify(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("toml error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Git operation error.
    #[error("git error: {0}")]
    Git(#[from] revu_git::Error),
}

impl From<revu_git::git2::Error> for Error {
    fn from(e: revu_git::git2::Error) -> Self {
        Self::Git(e.into())
    }
}

impl Error {
    /// Map this error onto the error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_)
            | Self::Unprocessable(_)
            | Self::MergeConflict { .. }
            | Self::RetryExhausted { .. }
            | Self::ProjectExists(_)
            | Self::AlreadyInitialized(_) => ErrorKind::Conflict,
            Self::Git(e) if e.is_lock_failure() => ErrorKind::Contention,
            Self::Validation(_) => ErrorKind::Validation,
            Self::AuthDenied(_) => ErrorKind::Auth,
            Self::ChangeNotFound(_) | Self::NotFound(_) | Self::ProjectNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Git(revu_git::Error::RefNotFound(_) | revu_git::Error::ObjectNotFound(_)) => {
                ErrorKind::NotFound
            }
            Self::Git(revu_git::Error::InvalidObjectId(_)) => ErrorKind::BadRequest,
            Self::NotInitialized(_)
            | Self::CorruptNotes { .. }
            | Self::CacheCodec(_)
            | Self::Notify(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::TomlSer(_)
            | Self::Git(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether the error is a transient ref race worth retrying.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }
}
