//! E-ARK style packages: one directory per SIP with a root `METS.xml`.
//!
//! ```text
//! <timestamp> <name>/
//! ├── METS.xml
//! ├── metadata/descriptive/{dc,ead,ead3,custom}.xml
//! ├── representations/<rep>/data/...
//! └── documentation/...
//! ```

use crate::error::{ErrorKind, Result};
use crate::package::{
    PackageJob, Written, copy_hashed, entries, package_name, slash_path, unique_name, unique_path, write_hashed,
};
use crate::progress::Action;
use sipkit_metadata::xml::{Document, NodeId};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument};

const METS_NS: &str = "http://www.loc.gov/METS/";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const CSIP_PROFILE: &str = "https://earkcsip.dilcis.eu/profile/E-ARK-CSIP.xml";
const AGENT_NAME: &str = "sipkit";

struct Described {
    href: String,
    mets_type: &'static str,
    written: Written,
}

struct Group {
    label: String,
    files: Vec<(String, Written)>,
}

#[instrument(skip_all, fields(sip = %job.sip.id))]
pub(crate) fn build(mut job: PackageJob) -> Result<PathBuf> {
    let now = OffsetDateTime::now_utc();
    let root = unique_path(&job.output, &package_name(&job.sip.name, now), "");
    fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;

    job.reporter.action(Action::CopyingContent);
    let mut groups = Vec::new();
    for rep in &job.sip.representations {
        let data = Path::new("representations").join(&rep.name).join("data");
        let mut files = Vec::new();
        for entry in entries(&rep.files) {
            let relative = data.join(&entry.relative);
            files.push((slash_path(&relative), copy_hashed(&entry.source, &root.join(&relative))?));
        }
        groups.push(Group { label: format!("Representations/{}", rep.name), files });
    }
    if !job.sip.documentation.is_empty() {
        let mut files = Vec::new();
        for entry in entries(&job.sip.documentation) {
            let relative = Path::new("documentation").join(&entry.relative);
            files.push((slash_path(&relative), copy_hashed(&entry.source, &root.join(&relative))?));
        }
        groups.push(Group { label: "Documentation".to_string(), files });
    }

    job.reporter.action(Action::WritingMetadata);
    let mut described = Vec::new();
    let mut taken = BTreeSet::new();
    for metadata in &mut job.sip.metadata {
        let content = metadata.content().map_err(ErrorKind::metadata)?;
        let name = unique_name(&mut taken, metadata.metadata_type.file_name());
        let relative = Path::new("metadata").join("descriptive").join(name);
        let written = write_hashed(&root.join(&relative), content.as_bytes())?;
        let mets_type = metadata.metadata_type.mets_type();
        described.push(Described { href: slash_path(&relative), mets_type, written });
    }

    job.reporter.action(Action::WritingManifests);
    let title = job.title();
    let mets = mets(&job, &title, now, &described, &groups);
    let target = root.join("METS.xml");
    fs::write(&target, mets).map_err(|e| ErrorKind::from_io(e, &target))?;
    debug!(groups = groups.len(), documents = described.len(), "E-ARK package written");
    Ok(root)
}

fn element(doc: &mut Document, parent: NodeId, name: &str, attributes: &[(&str, &str)]) -> NodeId {
    let id = doc.append_element(parent, name);
    for (key, value) in attributes {
        doc.set_attribute(id, *key, *value);
    }
    id
}

fn checksum_attributes(doc: &mut Document, id: NodeId, written: &Written) {
    doc.set_attribute(id, "SIZE", written.size.to_string());
    doc.set_attribute(id, "CHECKSUM", written.sha256.as_str());
    doc.set_attribute(id, "CHECKSUMTYPE", "SHA-256");
}

fn mets(job: &PackageJob, title: &str, now: OffsetDateTime, described: &[Described], groups: &[Group]) -> String {
    let created = now.format(&Rfc3339).unwrap_or_default();
    let sip_id = job.sip.id.to_string();
    let mut doc = Document::new("mets:mets");
    let root = doc.root();
    for (key, value) in [
        ("xmlns:mets", METS_NS),
        ("xmlns:xlink", XLINK_NS),
        ("OBJID", sip_id.as_str()),
        ("LABEL", title),
        ("TYPE", "Mixed"),
        ("PROFILE", CSIP_PROFILE),
    ] {
        doc.set_attribute(root, key, value);
    }

    let header = element(&mut doc, root, "mets:metsHdr", &[("CREATEDATE", created.as_str()), ("RECORDSTATUS", "NEW")]);
    let agent = element(
        &mut doc,
        header,
        "mets:agent",
        &[("ROLE", "CREATOR"), ("TYPE", "OTHER"), ("OTHERTYPE", "SOFTWARE")],
    );
    let name = element(&mut doc, agent, "mets:name", &[]);
    doc.set_text(name, AGENT_NAME);

    let mut dmd_ids = Vec::new();
    for (index, document) in described.iter().enumerate() {
        let id = format!("dmd-{}", index + 1);
        let section = element(&mut doc, root, "mets:dmdSec", &[("ID", id.as_str()), ("CREATED", created.as_str())]);
        let reference = element(
            &mut doc,
            section,
            "mets:mdRef",
            &[
                ("LOCTYPE", "URL"),
                ("MDTYPE", document.mets_type),
                ("MIMETYPE", "text/xml"),
                ("xlink:type", "simple"),
                ("xlink:href", document.href.as_str()),
            ],
        );
        checksum_attributes(&mut doc, reference, &document.written);
        dmd_ids.push(id);
    }

    let file_section = element(&mut doc, root, "mets:fileSec", &[]);
    let mut group_files = Vec::new();
    let mut counter = 0;
    for group in groups {
        let grp = element(&mut doc, file_section, "mets:fileGrp", &[("USE", group.label.as_str())]);
        let mut ids = Vec::new();
        for (href, written) in &group.files {
            counter += 1;
            let id = format!("file-{counter}");
            let attributes = [("ID", id.as_str()), ("MIMETYPE", "application/octet-stream")];
            let file = element(&mut doc, grp, "mets:file", &attributes);
            checksum_attributes(&mut doc, file, written);
            let location = [("LOCTYPE", "URL"), ("xlink:type", "simple"), ("xlink:href", href.as_str())];
            element(&mut doc, file, "mets:FLocat", &location);
            ids.push(id);
        }
        group_files.push((group.label.as_str(), ids));
    }

    let map = element(&mut doc, root, "mets:structMap", &[("TYPE", "PHYSICAL"), ("LABEL", "CSIP")]);
    let top = element(&mut doc, map, "mets:div", &[("ID", "struct-root"), ("LABEL", sip_id.as_str())]);
    if !dmd_ids.is_empty() {
        doc.set_attribute(top, "DMDID", dmd_ids.join(" "));
    }
    for (label, ids) in group_files {
        let div = element(&mut doc, top, "mets:div", &[("LABEL", label)]);
        for id in ids {
            element(&mut doc, div, "mets:fptr", &[("FILEID", id.as_str())]);
        }
    }
    if let Some(parent) = &job.parent {
        let div = element(&mut doc, top, "mets:div", &[("LABEL", "parent")]);
        let pointer = [
            ("LOCTYPE", "OTHER"),
            ("OTHERLOCTYPE", "SIPID"),
            ("xlink:type", "simple"),
            ("xlink:href", parent.as_str()),
        ];
        element(&mut doc, div, "mets:mptr", &pointer);
    }
    doc.to_pretty_xml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Progress, Reporter};
    use sipkit_metadata::MemoryCatalog;
    use sipkit_metadata::models::{CreatorSource, DescriptiveMetadata};
    use sipkit_metadata::xml::PathQuery;
    use sipkit_sip::{SipKind, SipPreview, TreeNode};
    use std::sync::Arc;
    use tokio::sync::watch;

    fn query(doc: &Document, query: &str) -> Vec<String> {
        let query: PathQuery = query.parse().unwrap();
        query.select(doc).iter().filter_map(|target| doc.value_of(target)).collect()
    }

    #[test]
    fn test_package_layout() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("scan.tif"), "tif").unwrap();
        fs::write(input.path().join("notes.txt"), "notes").unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let mut sip = SipPreview::new(
            "scans",
            SipKind::Sip,
            vec![TreeNode::file(input.path().join("scan.tif")), TreeNode::file(input.path().join("notes.txt"))],
        );
        assert!(sip.move_to_documentation(&input.path().join("notes.txt")));
        for template in ["dc", "ead", "dc"] {
            let autofill = sip.autofill(None);
            let metadata = DescriptiveMetadata::from_template(catalog.as_ref(), template, &autofill, CreatorSource::Template);
            sip.metadata.push(metadata.unwrap());
        }

        let job = PackageJob {
            sip: sip.clone(),
            parent: Some("uuid-parent".to_string()),
            output: output.path().to_path_buf(),
            catalog,
            language: None,
            reporter: Reporter::new(Arc::new(watch::Sender::new(Progress::default()))),
        };
        let root = build(job).unwrap();
        assert_eq!(fs::read_to_string(root.join("representations/rep1/data/scan.tif")).unwrap(), "tif");
        assert_eq!(fs::read_to_string(root.join("documentation/notes.txt")).unwrap(), "notes");
        for name in ["dc.xml", "ead.xml", "dc-2.xml"] {
            assert!(root.join("metadata/descriptive").join(name).is_file(), "{name}");
        }

        let mets = Document::parse(&fs::read_to_string(root.join("METS.xml")).unwrap()).unwrap();
        assert_eq!(query(&mets, "/*:mets/@OBJID"), vec![sip.id.to_string()]);
        assert_eq!(query(&mets, "/*:mets/*:dmdSec/*:mdRef/@MDTYPE"), vec!["DC", "EAD", "DC"]);
        assert_eq!(query(&mets, "/*:mets/*:fileSec/*:fileGrp/@USE"), vec!["Representations/rep1", "Documentation"]);
        assert_eq!(query(&mets, "/*:mets/*:fileSec/*:fileGrp/*:file/@CHECKSUM"), vec![sha256("tif"), sha256("notes")]);
        assert_eq!(query(&mets, "/*:mets/*:structMap/*:div/*:div/*:mptr/@xlink:href"), vec!["uuid-parent"]);
    }

    fn sha256(text: &str) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(text.as_bytes()))
    }
}
