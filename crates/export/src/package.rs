//! Helpers shared by the package formats.

use crate::error::{ErrorKind, Result};
use crate::progress::Reporter;
use sha2::{Digest, Sha256};
use sipkit_metadata::Catalog;
use sipkit_sip::{SipPreview, TreeNode};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::debug;

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour].[minute].[second].[subsecond digits:3]");
const BUFFER_SIZE: usize = 64 * 1024;

/// Everything a format needs to write one package.
pub(crate) struct PackageJob {
    pub sip: SipPreview,
    pub parent: Option<String>,
    pub output: PathBuf,
    pub catalog: Arc<dyn Catalog>,
    pub language: Option<String>,
    pub reporter: Reporter,
}
impl PackageJob {
    /// The package title. A non-empty metadata field whose id ends in
    /// `title` wins over the SIP's own title.
    pub fn title(&mut self) -> String {
        let autofill = self.sip.autofill(self.language.clone());
        for metadata in &mut self.sip.metadata {
            match metadata.values(self.catalog.as_ref(), &autofill) {
                Ok(values) => {
                    let title = values.iter().find(|v| v.id.to_lowercase().ends_with("title") && !v.is_empty());
                    if let Some(title) = title {
                        return title.as_str().to_string();
                    }
                },
                Err(error) => debug!(sip = %self.sip.id, ?error, "no values for title lookup"),
            }
        }
        self.sip.title.clone()
    }
}

/// `<timestamp> <name>`, with characters that cannot appear in a file name
/// replaced.
pub(crate) fn package_name(name: &str, at: OffsetDateTime) -> String {
    let stamp = at.format(TIMESTAMP).unwrap_or_else(|_| at.unix_timestamp().to_string());
    let name: String =
        name.chars().map(|c| if matches!(c, '/' | '\\' | ':') || c.is_control() { '_' } else { c }).collect();
    format!("{stamp} {name}")
}

/// A path in `output` named `base` (plus `extension`) that does not exist yet.
pub(crate) fn unique_path(output: &Path, base: &str, extension: &str) -> PathBuf {
    let mut candidate = output.join(format!("{base}{extension}"));
    let mut counter = 2;
    while candidate.exists() {
        candidate = output.join(format!("{base} ({counter}){extension}"));
        counter += 1;
    }
    candidate
}

/// Reserves `name` in `taken`, suffixing the stem on collision.
pub(crate) fn unique_name(taken: &mut BTreeSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, format!(".{extension}")),
        _ => (name, String::new()),
    };
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}-{counter}{extension}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// A content file and where it lands relative to its package folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub source: PathBuf,
    pub relative: PathBuf,
}

/// Every file below `nodes`, relative to the directory holding each root
/// node, so the selected structure is kept. Roots sharing a name are
/// suffixed so that no two entries land on the same path.
pub(crate) fn entries(nodes: &[TreeNode]) -> Vec<Entry> {
    let mut taken = BTreeSet::new();
    let mut entries = Vec::new();
    for node in nodes {
        let root = node.path();
        let name = root.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let top = PathBuf::from(unique_name(&mut taken, &name));
        for file in node.files() {
            let relative = match file.strip_prefix(root) {
                Ok(rest) if !rest.as_os_str().is_empty() => top.join(rest),
                _ => top.clone(),
            };
            entries.push(Entry { source: file.to_path_buf(), relative });
        }
    }
    entries
}

/// A relative path with `/` separators, as written into manifests.
pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Size and SHA-256 of a written file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Written {
    pub sha256: String,
    pub size: u64,
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ErrorKind::from_io(e, parent))?;
    }
    Ok(())
}

/// Copies `source` to `target`, hashing on the way.
pub(crate) fn copy_hashed(source: &Path, target: &Path) -> Result<Written> {
    create_parent(target)?;
    let mut reader = File::open(source).map_err(|e| ErrorKind::from_io(e, source))?;
    let file = File::create(target).map_err(|e| ErrorKind::from_io(e, target))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; BUFFER_SIZE];
    let mut size = 0;
    loop {
        let read = reader.read(&mut buffer).map_err(|e| ErrorKind::from_io(e, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read]).map_err(|e| ErrorKind::from_io(e, target))?;
        size += read as u64;
    }
    writer.flush().map_err(|e| ErrorKind::from_io(e, target))?;
    Ok(Written { sha256: hex::encode(hasher.finalize()), size })
}

pub(crate) fn write_hashed(target: &Path, contents: &[u8]) -> Result<Written> {
    create_parent(target)?;
    fs::write(target, contents).map_err(|e| ErrorKind::from_io(e, target))?;
    Ok(Written { sha256: hex::encode(Sha256::digest(contents)), size: contents.len() as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[test]
    fn test_package_name() {
        let at = datetime!(2024-03-05 07:08:09.123456 UTC);
        assert_eq!(package_name("Box 1", at), "2024-03-05 07.08.09.123 Box 1");
        assert_eq!(package_name("a/b:c", at), "2024-03-05 07.08.09.123 a_b_c");
    }

    #[rstest]
    #[case(&[], "dc.xml", "dc.xml")]
    #[case(&["dc.xml"], "dc.xml", "dc-2.xml")]
    #[case(&["dc.xml"], "ead.xml", "ead.xml")]
    #[case(&["dc.xml", "dc-2.xml"], "dc.xml", "dc-3.xml")]
    #[case(&["README"], "README", "README-2")]
    fn test_unique_name(#[case] taken: &[&str], #[case] name: &str, #[case] expected: &str) {
        let mut set: BTreeSet<String> = taken.iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_name(&mut set, name), expected);
        assert!(set.contains(expected));
    }

    #[test]
    fn test_entries_keep_structure() {
        let mut dir = TreeNode::directory("/in/box");
        let mut inner = TreeNode::directory("/in/box/inner");
        inner.add(TreeNode::file("/in/box/inner/b.txt"));
        dir.add(TreeNode::file("/in/box/a.txt"));
        dir.add(inner);
        let entries = entries(&[dir, TreeNode::file("/other/c.txt")]);
        let relative: Vec<String> = entries.iter().map(|entry| slash_path(&entry.relative)).collect();
        assert_eq!(relative, vec!["box/a.txt", "box/inner/b.txt", "c.txt"]);
    }

    #[test]
    fn test_entries_with_same_root_name() {
        let mut first = TreeNode::directory("/x/photos");
        first.add(TreeNode::file("/x/photos/p.txt"));
        let mut second = TreeNode::directory("/y/photos");
        second.add(TreeNode::file("/y/photos/p.txt"));
        let entries = entries(&[first, second, TreeNode::file("/z/photos")]);
        let relative: Vec<String> = entries.iter().map(|entry| slash_path(&entry.relative)).collect();
        assert_eq!(relative, vec!["photos/p.txt", "photos-2/p.txt", "photos-3"]);
        assert_eq!(entries[1].source, PathBuf::from("/y/photos/p.txt"));
    }

    #[test]
    fn test_copy_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.txt");
        fs::write(&source, "abc").unwrap();
        let written = copy_hashed(&source, &dir.path().join("out/nested/in.txt")).unwrap();
        assert_eq!(written.size, 3);
        assert_eq!(written.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(fs::read_to_string(dir.path().join("out/nested/in.txt")).unwrap(), "abc");
        assert!(copy_hashed(&dir.path().join("missing"), &dir.path().join("x")).is_err());
    }
}
