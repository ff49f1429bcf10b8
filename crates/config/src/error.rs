//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The merged configuration could not be deserialized
    #[display("invalid configuration")]
    Invalid,
    /// A configured value is out of range
    #[display("invalid value for {_0}")]
    InvalidValue(#[error(not(source))] String),
    /// The template directory could not be read
    #[display("unable to read template directory: {}", _0.display())]
    Templates(#[error(not(source))] PathBuf),
}
impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Templates(_))
    }
}
