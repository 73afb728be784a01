//! Error types for Tidedrive.

use thiserror::Error;

/// Common error type for Tidedrive operations.
///
/// Every user-visible failure carries a stable machine-readable kind
/// (see [`DriveError::kind`]) plus a human-readable message.
#[derive(Error, Debug)]
pub enum DriveError {
    /// Node, user, or parent absent (or not visible to the requester).
    #[error("{0} not found")]
    NotFound(String),

    /// Resolved access level is insufficient for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Duplicate collaborator, duplicate root, or conflicting concurrent write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed name/path, file used as a folder container, invalid pattern.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Blob store PUT/GET failed or timed out.
    #[error("upstream storage failure: {0}")]
    UpstreamStorage(String),

    /// Structural invariant violated unexpectedly (e.g. parent/child mismatch).
    ///
    /// Should never surface in correct operation, but is reported rather
    /// than silently tolerated.
    #[error("internal error: {0}")]
    Internal(String),

    /// Database error.
    ///
    /// This is a generic database error that wraps errors from sqlx.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DriveError {
    /// Stable machine-readable kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveError::NotFound(_) => "not_found",
            DriveError::PermissionDenied(_) => "permission_denied",
            DriveError::Conflict(_) => "conflict",
            DriveError::InvalidArgument(_) => "invalid_argument",
            DriveError::UpstreamStorage(_) => "upstream_storage_failure",
            DriveError::Internal(_) => "internal",
            DriveError::Database(_) => "database",
            DriveError::Io(_) => "io",
            DriveError::Config(_) => "config",
        }
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for DriveError {
    fn from(e: sqlx::Error) -> Self {
        DriveError::Database(e.to_string())
    }
}

/// Result type alias for Tidedrive operations.
pub type Result<T> = std::result::Result<T, DriveError>;
