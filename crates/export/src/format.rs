use crate::error::{Error, ErrorKind, Result};
use crate::package::PackageJob;
use crate::{bagit, eark};
use derive_more::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// On-disk package format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ExportFormat {
    /// A zipped BagIt bag per SIP.
    #[default]
    #[display("bagit")]
    BagIt,
    /// An E-ARK style directory with `METS.xml` per SIP.
    #[display("eark")]
    EArk,
}
impl ExportFormat {
    pub(crate) fn build(self, job: PackageJob) -> Result<PathBuf> {
        match self {
            Self::BagIt => bagit::build(job),
            Self::EArk => eark::build(job),
        }
    }
}
impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bagit" | "bag" => Ok(Self::BagIt),
            "eark" | "e-ark" => Ok(Self::EArk),
            _ => exn::bail!(ErrorKind::UnknownFormat(s.to_string())),
        }
    }
}
