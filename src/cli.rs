//! Command-line arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use sipkit_sip::{Grouping, MetadataSource};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sipkit", version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON by extension).
    #[arg(long, short, global = true, env = "SIPKIT_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Group the selected paths into SIPs and export them.
    Create(CreateArgs),
    /// List the metadata templates in the catalog.
    Templates,
    /// Print the field values of a metadata document.
    Fields {
        path: PathBuf,
        /// Template type the document was written with.
        #[arg(long, short)]
        template: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupingKind {
    /// Everything in one SIP.
    Single,
    /// One SIP per file.
    File,
    /// One SIP per folder down to `--level`.
    Folder,
    /// One SIP per selected path.
    Selection,
    /// Mirror the directory structure.
    Structure,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Files and directories to package.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,
    #[arg(long, short, value_enum, default_value_t = GroupingKind::File)]
    pub grouping: GroupingKind,
    /// Folder depth for `--grouping folder`; the selected paths are level 0.
    #[arg(long, default_value_t = 1)]
    pub level: usize,
    /// Paths to leave out.
    #[arg(long)]
    pub ignore: Vec<PathBuf>,
    /// Render this template for every SIP.
    #[arg(long, conflicts_with_all = ["metadata_file", "metadata_dir", "same_directory"])]
    pub template: Option<String>,
    /// Attach this metadata file to every SIP.
    #[arg(long, conflicts_with_all = ["metadata_dir", "same_directory"])]
    pub metadata_file: Option<PathBuf>,
    /// Attach the file in this directory named like each SIP.
    #[arg(long, conflicts_with = "same_directory")]
    pub metadata_dir: Option<PathBuf>,
    /// Attach files next to the content matching the template's filename pattern.
    #[arg(long, requires = "metadata_type")]
    pub same_directory: bool,
    /// Template type of attached metadata files.
    #[arg(long)]
    pub metadata_type: Option<String>,
    /// Classification id the SIPs attach to.
    #[arg(long, short)]
    pub destination: Option<String>,
    /// `bagit` or `eark`; defaults to the configured format.
    #[arg(long, short)]
    pub format: Option<String>,
    /// Output directory; defaults to the configured directory.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
    /// Only list the SIPs that would be exported.
    #[arg(long)]
    pub dry_run: bool,
}
impl CreateArgs {
    pub fn grouping(&self) -> Grouping {
        match self.grouping {
            GroupingKind::Single => Grouping::SingleSip,
            GroupingKind::File => Grouping::PerFile,
            GroupingKind::Folder => Grouping::PerFolder { level: self.level },
            GroupingKind::Selection => Grouping::PerSelection(self.sources.iter().cloned().collect()),
            GroupingKind::Structure => Grouping::Structure,
        }
    }

    pub fn metadata(&self) -> MetadataSource {
        let template_type = self.metadata_type.clone();
        if let Some(template_type) = &self.template {
            MetadataSource::Template { template_type: template_type.clone() }
        } else if let Some(path) = &self.metadata_file {
            MetadataSource::SingleFile { path: path.clone(), template_type }
        } else if let Some(directory) = &self.metadata_dir {
            MetadataSource::DiffDirectory { directory: directory.clone(), template_type }
        } else if self.same_directory
            && let Some(template_type) = template_type
        {
            MetadataSource::SameDirectory { template_type }
        } else {
            MetadataSource::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn create(args: &[&str]) -> CreateArgs {
        let cli = Cli::try_parse_from([&["sipkit", "create"][..], args].concat()).unwrap();
        match cli.command {
            Command::Create(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[rstest]
    #[case(&["a"], Grouping::PerFile)]
    #[case(&["a", "-g", "single"], Grouping::SingleSip)]
    #[case(&["a", "-g", "folder"], Grouping::PerFolder { level: 1 })]
    #[case(&["a", "-g", "folder", "--level", "3"], Grouping::PerFolder { level: 3 })]
    #[case(&["a", "-g", "structure"], Grouping::Structure)]
    fn test_grouping(#[case] args: &[&str], #[case] expected: Grouping) {
        assert_eq!(create(args).grouping(), expected);
    }

    #[test]
    fn test_selection_holds_sources() {
        let args = create(&["a", "b", "--grouping", "selection"]);
        let Grouping::PerSelection(selection) = args.grouping() else { panic!("not a selection") };
        let expected: BTreeSet<PathBuf> = [PathBuf::from("a"), PathBuf::from("b")].into_iter().collect();
        assert_eq!(selection, expected);
    }

    #[rstest]
    #[case(&["a"], "None")]
    #[case(&["a", "--template", "dc"], "Template")]
    #[case(&["a", "--metadata-file", "m.xml"], "SingleFile")]
    #[case(&["a", "--metadata-dir", "meta", "--metadata-type", "ead"], "DiffDirectory")]
    #[case(&["a", "--same-directory", "--metadata-type", "dc"], "SameDirectory")]
    fn test_metadata(#[case] args: &[&str], #[case] variant: &str) {
        assert!(format!("{:?}", create(args).metadata()).starts_with(variant));
    }

    #[rstest]
    #[case(&["a", "--template", "dc", "--metadata-file", "m.xml"])]
    #[case(&["a", "--same-directory"])]
    #[case(&[])]
    fn test_invalid(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from([&["sipkit", "create"][..], args].concat()).is_err());
    }
}
