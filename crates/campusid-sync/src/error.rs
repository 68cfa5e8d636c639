//! Synchronization error types.

use campusid_directory::DirectoryError;
use thiserror::Error;

/// Error raised by synchronization and external password operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external source could not be reached.
    #[error("external source unavailable: {0}")]
    Unavailable(String),

    /// The target user does not exist in the external source.
    #[error("user missing in external source")]
    UserMissing,

    /// The acting user's credentials were rejected by the external source.
    #[error("actor credentials rejected by external source")]
    BadActorCreds,

    /// The sync configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A directory operation failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Anything else that broke mid-pass.
    #[error("sync failed: {0}")]
    Internal(String),
}

impl SyncError {
    /// Lift a directory error from the external source, folding transient
    /// failures into [`SyncError::Unavailable`] so callers never mistake an
    /// outage for a credential problem.
    #[must_use]
    pub fn from_external(err: DirectoryError) -> Self {
        if err.is_transient() {
            SyncError::Unavailable(err.to_string())
        } else {
            SyncError::Directory(err)
        }
    }
}
