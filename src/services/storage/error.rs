//! Error taxonomy shared by every storage driver.

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or invalid backend settings. Fatal to driver construction,
    /// never retried.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// Key absent on a read/stat operation. Recoverable; callers treat it
    /// as "nothing to do" where that is semantically valid.
    #[error("object `{0}` not found")]
    NotFound(String),

    #[error("upload of `{key}` failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("download of `{key}` failed: {reason}")]
    Download { key: String, reason: String },

    /// Local-disk failure (disk full, permission denied). Surfaced
    /// immediately, no retries.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Rejected before any backend call was attempted.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("file size {size} bytes exceeds maximum allowed {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// The provider cannot perform this operation (e.g. presigned uploads
    /// on the local filesystem driver).
    #[error("operation `{0}` is not supported by this storage provider")]
    Unsupported(&'static str),

    /// A deadline elapsed. Treated as failure, never as partial success.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other backend failure.
    #[error("storage operation failed: {0}")]
    Operation(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn upload(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn download(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Download {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            opendal::ErrorKind::Unsupported => Self::Unsupported("presign"),
            opendal::ErrorKind::ConfigInvalid => Self::Configuration(err.to_string()),
            _ => Self::Operation(err.to_string()),
        }
    }
}
