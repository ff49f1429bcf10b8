//! SIP Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use sipkit_metadata::error::{Error as MetadataError, ErrorKind as MetadataErrorKind};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A SIP error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for SIP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path does not exist
    #[display("path not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A filename pattern could not be compiled
    #[display("invalid filename pattern: {_0}")]
    InvalidPattern(#[error(not(source))] String),
    /// Descriptive metadata could not be loaded, parsed or rendered
    #[display("metadata error: {_0}")]
    Metadata(MetadataErrorKind),
    /// No SIP with this id belongs to the rule
    #[display("unknown SIP: {_0}")]
    UnknownSip(#[error(not(source))] String),
    /// The SIP has no metadata document at this index
    #[display("no metadata document at index {_0}")]
    NoSuchDocument(#[error(not(source))] usize),
    /// The scheduler worker has shut down
    #[display("rule scheduler is no longer running")]
    SchedulerClosed,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
impl ErrorKind {
    /// Convert a metadata error into a SIP error, keeping the metadata crate's
    /// frame as a child in the error tree.
    #[track_caller]
    pub fn metadata(err: MetadataError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Metadata(inner))
    }

    pub(crate) fn from_io(e: IoError, path: &Path) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(e),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Metadata(kind) => kind.is_retryable(),
            _ => false,
        }
    }
}
