//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The catalog has no template registered under this identifier.
    #[display("template not found in catalog: {_0}")]
    TemplateNotFound(#[error(not(source))] String),
    /// The template could not be compiled or rendered.
    #[display("issue with template compilation or rendering")]
    Template,
    /// The document is not well-formed XML.
    #[display("malformed XML")]
    MalformedXml,
    /// A path query could not be parsed.
    #[display("invalid path query: {_0}")]
    InvalidQuery(#[error(not(source))] String),
    /// The document is well-formed but does not conform to the expected schema.
    #[display("document does not conform to schema: {_0}")]
    SchemaViolation(#[error(not(source))] String),
    /// The metadata source file could not be read.
    #[display("unable to read metadata source: {}", _0.display())]
    Source(#[error(not(source))] PathBuf),
    /// Stored content is not valid base64.
    #[display("metadata content is not valid base64")]
    Encoding,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}
