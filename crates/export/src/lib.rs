//! Serializing SIP previews into archival packages.
//!
//! An [`Exporter`] walks an ordered list of SIPs and writes one package per
//! SIP, either as a zipped BagIt bag or as an E-ARK style directory. Events
//! are streamed as packages finish, and a [`Progress`] snapshot can be polled
//! at any time through a watch channel.

mod bagit;
mod eark;
pub mod error;
mod exporter;
mod format;
mod package;
mod progress;

pub use crate::exporter::{ExportEvent, ExportItem, ExportSummary, Exporter, Unsuccessful};
pub use crate::format::ExportFormat;
pub use crate::progress::{Action, Progress};
