//! Export Error Types

use derive_more::{Display, Error};
use sipkit_metadata::error::{Error as MetadataError, ErrorKind as MetadataErrorKind};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// An export error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

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
    /// A metadata document could not be read
    #[display("metadata error: {_0}")]
    Metadata(MetadataErrorKind),
    /// The zip archive could not be written
    #[display("unable to write archive: {}", _0.display())]
    Archive(#[error(not(source))] PathBuf),
    /// Not a known package format
    #[display("unknown export format: {_0}")]
    UnknownFormat(#[error(not(source))] String),
    /// The blocking export task panicked or was aborted
    #[display("export task failed")]
    Task,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
impl ErrorKind {
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
            Self::Io(_) | Self::Archive(_) => true,
            Self::Metadata(kind) => kind.is_retryable(),
            _ => false,
        }
    }
}
