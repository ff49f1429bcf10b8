//! BagIt packages, zipped.
//!
//! ```text
//! <timestamp> <name>.zip
//! └── <timestamp> <name>/
//!     ├── bagit.txt
//!     ├── bag-info.txt
//!     ├── manifest-sha256.txt
//!     ├── tagmanifest-sha256.txt
//!     ├── data/[<rep>/]...
//!     ├── documentation/...
//!     └── metadata/...
//! ```
//!
//! The representation folder is only added below `data/` when the SIP has
//! more than one representation. A failed package leaves nothing behind.

use crate::error::{ErrorKind, Result};
use crate::package::{
    PackageJob, Written, copy_hashed, entries, package_name, slash_path, unique_name, unique_path, write_hashed,
};
use crate::progress::Action;
use exn::ResultExt;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const BAGIT_TXT: &str = "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n";

/// Files written so far, relative to the bag root, with their checksums.
#[derive(Default)]
struct Bag {
    payload: Vec<(String, Written)>,
    tags: Vec<(String, Written)>,
}
impl Bag {
    fn oxum(&self) -> String {
        let bytes: u64 = self.payload.iter().map(|(_, written)| written.size).sum();
        format!("{bytes}.{}", self.payload.len())
    }

    fn manifest(entries: &[(String, Written)]) -> String {
        entries.iter().map(|(path, written)| format!("{}  {path}\n", written.sha256)).collect()
    }

    fn files(&self) -> impl Iterator<Item = &str> {
        self.payload.iter().chain(self.tags.iter()).map(|(path, _)| path.as_str())
    }
}

#[instrument(skip_all, fields(sip = %job.sip.id))]
pub(crate) fn build(mut job: PackageJob) -> Result<PathBuf> {
    let now = OffsetDateTime::now_utc();
    let name = package_name(&job.sip.name, now);
    let archive = unique_path(&job.output, &name, ".zip");
    let root = unique_path(&job.output, &name, "");
    let result = write_bag(&mut job, &root, now).and_then(|bag| {
        job.reporter.action(Action::Compressing);
        compress(&root, &bag, &archive)
    });
    // The bag directory only ever exists as a staging area.
    if root.exists()
        && let Err(error) = fs::remove_dir_all(&root)
    {
        warn!(path = %root.display(), %error, "unable to remove bag directory");
    }
    if result.is_err()
        && archive.exists()
        && let Err(error) = fs::remove_file(&archive)
    {
        warn!(path = %archive.display(), %error, "unable to remove partial archive");
    }
    result.map(|()| archive)
}

fn write_bag(job: &mut PackageJob, root: &Path, now: OffsetDateTime) -> Result<Bag> {
    fs::create_dir_all(root).map_err(|e| ErrorKind::from_io(e, root))?;
    let mut bag = Bag::default();

    job.reporter.action(Action::CopyingContent);
    let nested = job.sip.representations.len() > 1;
    for rep in &job.sip.representations {
        let data = match nested {
            true => PathBuf::from("data").join(&rep.name),
            false => PathBuf::from("data"),
        };
        for entry in entries(&rep.files) {
            let relative = data.join(&entry.relative);
            let written = copy_hashed(&entry.source, &root.join(&relative))?;
            bag.payload.push((slash_path(&relative), written));
        }
    }
    for entry in entries(&job.sip.documentation) {
        let relative = Path::new("documentation").join(&entry.relative);
        let written = copy_hashed(&entry.source, &root.join(&relative))?;
        bag.tags.push((slash_path(&relative), written));
    }

    job.reporter.action(Action::WritingMetadata);
    let mut taken = BTreeSet::new();
    for metadata in &mut job.sip.metadata {
        let content = metadata.content().map_err(ErrorKind::metadata)?;
        let relative = Path::new("metadata").join(unique_name(&mut taken, &metadata.file_name()));
        let written = write_hashed(&root.join(&relative), content.as_bytes())?;
        bag.tags.push((slash_path(&relative), written));
    }

    job.reporter.action(Action::WritingManifests);
    let title = job.title();
    let date = now.format(format_description!("[year]-[month]-[day]")).unwrap_or_default();
    let mut info = format!("id: {}\n", job.sip.id);
    if let Some(parent) = &job.parent {
        info.push_str(&format!("parent: {parent}\n"));
    }
    info.push_str(&format!("title: {title}\n"));
    info.push_str(&format!("level: {}\n", job.sip.description_level));
    info.push_str(&format!("Bagging-Date: {date}\n"));
    info.push_str(&format!("Payload-Oxum: {}\n", bag.oxum()));

    let manifest = Bag::manifest(&bag.payload);
    for (name, contents) in
        [("bagit.txt", BAGIT_TXT), ("bag-info.txt", info.as_str()), ("manifest-sha256.txt", manifest.as_str())]
    {
        let written = write_hashed(&root.join(name), contents.as_bytes())?;
        bag.tags.push((name.to_string(), written));
    }
    let tag_manifest = Bag::manifest(&bag.tags);
    let written = write_hashed(&root.join("tagmanifest-sha256.txt"), tag_manifest.as_bytes())?;
    bag.tags.push(("tagmanifest-sha256.txt".to_string(), written));
    debug!(payload = bag.payload.len(), tags = bag.tags.len(), "bag written");
    Ok(bag)
}

/// Zips the bag with its directory name as the single top-level entry.
fn compress(root: &Path, bag: &Bag, archive: &Path) -> Result<()> {
    let prefix = root.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    let file = File::create(archive).map_err(|e| ErrorKind::from_io(e, archive))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files: Vec<&str> = bag.files().collect();
    files.sort_unstable();
    for relative in files {
        zip.start_file(format!("{prefix}/{relative}"), options)
            .or_raise(|| ErrorKind::Archive(archive.to_path_buf()))?;
        let source = root.join(relative);
        let mut reader = File::open(&source).map_err(|e| ErrorKind::from_io(e, &source))?;
        io::copy(&mut reader, &mut zip).map_err(|e| ErrorKind::from_io(e, archive))?;
    }
    zip.finish().or_raise(|| ErrorKind::Archive(archive.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Progress, Reporter};
    use sipkit_metadata::MemoryCatalog;
    use sipkit_metadata::models::CreatorSource;
    use sipkit_sip::{SipKind, SipPreview, SipRepresentation, TreeNode};
    use std::io::Read;
    use std::sync::Arc;
    use tokio::sync::watch;
    use zip::ZipArchive;

    fn job(sip: SipPreview, output: &Path) -> PackageJob {
        PackageJob {
            sip,
            parent: Some("fonds-7".to_string()),
            output: output.to_path_buf(),
            catalog: Arc::new(MemoryCatalog::new()),
            language: None,
            reporter: Reporter::new(Arc::new(watch::Sender::new(Progress::default()))),
        }
    }

    fn read(archive: &mut ZipArchive<File>, name: &str) -> String {
        let mut text = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_bag_layout() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let letters = input.path().join("letters");
        fs::create_dir_all(letters.join("1920")).unwrap();
        fs::write(letters.join("a.txt"), "abc").unwrap();
        fs::write(letters.join("1920/b.txt"), "hello").unwrap();
        let mut node = TreeNode::directory(&letters);
        let mut year = TreeNode::directory(letters.join("1920"));
        year.add(TreeNode::file(letters.join("1920/b.txt")));
        node.add(TreeNode::file(letters.join("a.txt")));
        node.add(year);

        let catalog = MemoryCatalog::new();
        let mut sip = SipPreview::new("letters", SipKind::Sip, node.into_children()).with_source(&letters);
        sip.description_level = "file".into();
        let autofill = sip.autofill(None);
        let dc = sipkit_metadata::models::DescriptiveMetadata::from_template(
            &catalog,
            "dc",
            &autofill,
            CreatorSource::Template,
        )
        .unwrap();
        sip.metadata.push(dc);

        let archive = build(job(sip.clone(), output.path())).unwrap();
        let name = archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(" letters.zip"), "{name}");
        let entries: Vec<_> = fs::read_dir(output.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "bag directory was not removed");

        let prefix = name.trim_end_matches(".zip").to_string();
        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(read(&mut zip, &format!("{prefix}/data/1920/b.txt")), "hello");
        assert!(read(&mut zip, &format!("{prefix}/bagit.txt")).starts_with("BagIt-Version: 0.97"));
        let info = read(&mut zip, &format!("{prefix}/bag-info.txt"));
        assert!(info.contains(&format!("id: {}\n", sip.id)));
        assert!(info.contains("parent: fonds-7\n"));
        assert!(info.contains("title: letters\n"));
        assert!(info.contains("level: file\n"));
        assert!(info.contains("Payload-Oxum: 8.2\n"));
        let manifest = read(&mut zip, &format!("{prefix}/manifest-sha256.txt"));
        assert!(manifest.contains("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  data/a.txt\n"));
        let tags = read(&mut zip, &format!("{prefix}/tagmanifest-sha256.txt"));
        assert!(tags.contains("  metadata/dc.xml\n"));
        assert!(tags.contains("  bag-info.txt\n"));
    }

    #[test]
    fn test_title_field_overrides() {
        let output = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::empty().with_template(
            "note",
            r#"{# field name="title" xpath="/*:note/*:title" #}<note><title>{{ title }}</title></note>"#,
        );
        let mut sip = SipPreview::new("box", SipKind::Sip, vec![]);
        let mut metadata = sipkit_metadata::models::DescriptiveMetadata::from_template(
            &catalog,
            "note",
            &sip.autofill(None),
            CreatorSource::Template,
        )
        .unwrap();
        metadata.set_content("<note><title>Letters to Anna</title></note>");
        sip.metadata.push(metadata);
        let mut job = job(sip, output.path());
        job.catalog = Arc::new(catalog);
        let archive = build(job).unwrap();
        let prefix = archive.file_stem().unwrap().to_string_lossy().into_owned();
        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert!(read(&mut zip, &format!("{prefix}/bag-info.txt")).contains("title: Letters to Anna\n"));
    }

    #[test]
    fn test_roots_with_same_name() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let mut roots = Vec::new();
        for (parent, text) in [("x", "first"), ("y", "second")] {
            let photos = input.path().join(parent).join("photos");
            fs::create_dir_all(&photos).unwrap();
            fs::write(photos.join("p.txt"), text).unwrap();
            let mut node = TreeNode::directory(&photos);
            node.add(TreeNode::file(photos.join("p.txt")));
            roots.push(node);
        }
        let sip = SipPreview::new("photos", SipKind::Sip, roots);

        let archive = build(job(sip, output.path())).unwrap();
        let prefix = archive.file_stem().unwrap().to_string_lossy().into_owned();
        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(read(&mut zip, &format!("{prefix}/data/photos/p.txt")), "first");
        assert_eq!(read(&mut zip, &format!("{prefix}/data/photos-2/p.txt")), "second");
        assert!(read(&mut zip, &format!("{prefix}/bag-info.txt")).contains("Payload-Oxum: 11.2\n"));
    }

    #[test]
    fn test_failure_leaves_no_residue() {
        let output = tempfile::tempdir().unwrap();
        let mut sip = SipPreview::new("broken", SipKind::Sip, vec![]);
        sip.representations = vec![
            SipRepresentation::new("rep1", vec![]),
            SipRepresentation::new("rep2", vec![TreeNode::file("/definitely/missing/file.txt")]),
        ];
        let error = build(job(sip, output.path())).unwrap_err();
        assert!(matches!(&*error, ErrorKind::NotFound(_)));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }
}
