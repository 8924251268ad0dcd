//! Attachment normalization.
//!
//! Runs first in the pipeline: locates the filespec entries the typesetting
//! engine wrote for each attachment, repairs duplicate placeholder entries,
//! writes the canonical filespec fields and populates the checksum-indexed
//! filespec registry that later stages resolve against.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info, instrument, warn};

use crate::attachments::FilespecRegistry;
use crate::config::EnhancerConfig;
use crate::document::session::{resolve, stream_bytes, text_string};
use crate::document::{AnnotationIndex, Session};
use crate::error::{AttachmentError, Result, StructureError};
use crate::hash_utils::{decode_digest, verify_hash, HashAlgorithm};
use crate::types::{AttachmentDescriptor, RenderProducer};
use crate::utils::pdf_date;

/// Outcome of one normalization stage
#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub groups: usize,
    pub entries_normalized: usize,
    pub placeholders_repointed: usize,
    /// Non-fatal conditions: attachments left without registry entries
    pub warnings: Vec<String>,
    /// One record per group, consumed by the link promoter
    pub records: Vec<GroupRecord>,
}

/// Normalized state of one attachment group
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub unique_name: String,
    /// Lowercase hex MD5 checksum; `None` when the group was demoted to
    /// warning status and takes no part in checksum linkage
    pub checksum: Option<String>,
    pub filespec_ids: Vec<ObjectId>,
    pub description: Option<String>,
}

/// One discovered filespec occurrence for an attachment group
#[derive(Debug, Clone)]
struct FilespecEntry {
    filespec_id: ObjectId,
    stream_id: ObjectId,
    description: String,
}

pub struct AttachmentNormalizer<'a> {
    config: &'a EnhancerConfig,
}

impl<'a> AttachmentNormalizer<'a> {
    pub fn new(config: &'a EnhancerConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all)]
    pub async fn run(
        &self,
        session: &mut Session,
        annotations: &AnnotationIndex,
        descriptors: &[AttachmentDescriptor],
        registry: &mut FilespecRegistry,
    ) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();

        let groups = group_by_unique_name(descriptors);
        report.groups = groups.len();
        if groups.is_empty() {
            return Ok(report);
        }

        // Strategy selection is deferred until a group actually needs
        // discovery, so attachment-free documents never hit it.
        let producer_string = session.producer().unwrap_or_default();
        let producer = RenderProducer::recognize(&producer_string)?;
        info!(producer = ?producer, groups = groups.len(), "normalizing attachments");

        // Discovery runs for every group before anything is written:
        // `write_canonical` renames filespecs to their original filenames,
        // and a rename could shadow a later group's unique name.
        let mut discovered = Vec::with_capacity(groups.len());
        for (unique_name, group) in &groups {
            let entries = self.discover(session, annotations, producer, unique_name)?;

            if entries.is_empty() {
                return Err(AttachmentError::EntriesNotFound(unique_name.clone()).into());
            }
            if entries.len() > group.len() {
                return Err(AttachmentError::Ambiguous {
                    name: unique_name.clone(),
                    entries: entries.len(),
                    descriptors: group.len(),
                }
                .into());
            }
            discovered.push(entries);
        }

        for ((unique_name, group), mut entries) in groups.iter().zip(discovered) {
            if entries.len() > 1 {
                report.placeholders_repointed +=
                    self.correct_placeholders(session, unique_name, &mut entries)?;
            }

            let canonical = group[0];
            self.verify_content(session, &entries[0], canonical)?;
            for entry in &entries {
                self.write_canonical(session, entry, canonical)?;
                report.entries_normalized += 1;
            }

            let checksum = self.register_group(&entries[0], group, registry, &mut report);
            report.records.push(GroupRecord {
                unique_name: unique_name.clone(),
                checksum,
                filespec_ids: entries.iter().map(|e| e.filespec_id).collect(),
                description: canonical.description.clone(),
            });
        }

        info!(
            normalized = report.entries_normalized,
            repointed = report.placeholders_repointed,
            warnings = report.warnings.len(),
            "attachment normalization complete"
        );
        Ok(report)
    }

    /// Locates the filespec entries the engine recorded for one group.
    fn discover(
        &self,
        session: &Session,
        annotations: &AnnotationIndex,
        producer: RenderProducer,
        unique_name: &str,
    ) -> Result<Vec<FilespecEntry>> {
        let doc = &session.doc;
        let filespec_ids: Vec<ObjectId> = if producer.uses_associated_files() {
            annotations.af_filespecs(doc)?.to_vec()
        } else {
            let mut ids = Vec::new();
            for annot_id in annotations.file_attachment_annotations(doc)?.iter() {
                let annot = doc.get_dictionary(*annot_id)?;
                if let Ok(fs) = annot.get(b"FS").and_then(Object::as_reference) {
                    ids.push(fs);
                }
            }
            ids
        };

        let mut entries = Vec::new();
        for fs_id in filespec_ids {
            let filespec = doc.get_dictionary(fs_id)?;
            if filespec_name(doc, filespec).as_deref() != Some(unique_name) {
                continue;
            }
            entries.push(FilespecEntry {
                filespec_id: fs_id,
                stream_id: embedded_stream_id(doc, filespec, unique_name)?,
                description: filespec
                    .get(b"Desc")
                    .ok()
                    .and_then(text_string)
                    .unwrap_or_default(),
            });
        }
        debug!(group = unique_name, entries = entries.len(), "discovered filespec entries");
        Ok(entries)
    }

    /// Splits a multi-entry group into real and placeholder entries, checks
    /// their invariants and re-points every placeholder at the one real
    /// stream. The placeholders' empty streams become unreachable.
    fn correct_placeholders(
        &self,
        session: &mut Session,
        unique_name: &str,
        entries: &mut [FilespecEntry],
    ) -> Result<usize> {
        let sentinel = &self.config.placeholder_desc_prefix;
        let (dummies, reals): (Vec<usize>, Vec<usize>) = (0..entries.len())
            .partition(|&i| entries[i].description.starts_with(sentinel.as_str()));

        let real_stream = match reals.split_first() {
            None => return Err(AttachmentError::Inconsistent(unique_name.to_string()).into()),
            Some((first, rest)) => {
                let stream = entries[*first].stream_id;
                if rest.iter().any(|&i| entries[i].stream_id != stream) {
                    return Err(AttachmentError::Inconsistent(unique_name.to_string()).into());
                }
                stream
            }
        };
        if stream_len(&session.doc, real_stream)? == 0 {
            return Err(AttachmentError::Empty(unique_name.to_string()).into());
        }

        for &i in &dummies {
            if stream_len(&session.doc, entries[i].stream_id)? != 0 {
                return Err(AttachmentError::Inconsistent(unique_name.to_string()).into());
            }
            repoint_embedded_stream(&mut session.doc, entries[i].filespec_id, real_stream)?;
            entries[i].stream_id = real_stream;
            debug!(group = unique_name, "re-pointed placeholder entry at real stream");
        }
        Ok(dummies.len())
    }

    /// Checks the group's stream content against the manifest digest.
    /// Digests with an algorithm this crate cannot compute are left to the
    /// warning path in `register_group`.
    fn verify_content(
        &self,
        session: &Session,
        entry: &FilespecEntry,
        descriptor: &AttachmentDescriptor,
    ) -> Result<()> {
        let declared = descriptor
            .hash
            .as_ref()
            .and_then(|hash| HashAlgorithm::parse(&hash.algorithm).map(|algo| (algo, hash)));
        let (algo, hash) = match declared {
            Some(declared) => declared,
            None => return Ok(()),
        };
        let content = match session.doc.get_object(entry.stream_id)? {
            Object::Stream(stream) => stream_bytes(stream),
            _ => return Err(StructureError::MissingObject("embedded file stream".into()).into()),
        };
        if !verify_hash(&content, &hash.value, algo) {
            return Err(AttachmentError::ChecksumMismatch {
                name: descriptor.unique_name.clone(),
                algorithm: algo.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Writes the canonical filename, relationship, description and stream
    /// parameters onto one entry.
    fn write_canonical(
        &self,
        session: &mut Session,
        entry: &FilespecEntry,
        descriptor: &AttachmentDescriptor,
    ) -> Result<()> {
        let actual = stream_len(&session.doc, entry.stream_id)?;
        if actual != descriptor.size {
            return Err(AttachmentError::SizeMismatch {
                name: descriptor.unique_name.clone(),
                expected: descriptor.size,
                actual,
            }
            .into());
        }

        let filespec = dictionary_mut(&mut session.doc, entry.filespec_id)?;
        filespec.set("Type", Object::Name(b"Filespec".to_vec()));
        filespec.set("F", Object::string_literal(descriptor.original_name.as_str()));
        filespec.set("UF", text_object(&descriptor.original_name));
        match &descriptor.description {
            Some(desc) => filespec.set("Desc", text_object(desc)),
            None => {
                filespec.remove(b"Desc");
            }
        }
        match descriptor.relationship.pdf_name() {
            Some(name) => filespec.set("AFRelationship", Object::Name(name.as_bytes().to_vec())),
            None => {
                filespec.remove(b"AFRelationship");
            }
        }

        self.write_params(session, entry.stream_id, descriptor)?;

        if let Some(xml) = &descriptor.metadata_xml {
            let meta_id = session.doc.add_object(Object::Stream(Stream::new(
                dictionary! {"Type" => "Metadata", "Subtype" => "XML"},
                xml.clone().into_bytes(),
            )));
            let stream = stream_mut(&mut session.doc, entry.stream_id)?;
            stream.dict.set("Metadata", Object::Reference(meta_id));
        }
        Ok(())
    }

    /// Fills the embedded stream's `/Params`: size, timestamps and — for an
    /// MD5 digest — the binary checksum.
    fn write_params(
        &self,
        session: &mut Session,
        stream_id: ObjectId,
        descriptor: &AttachmentDescriptor,
    ) -> Result<()> {
        let checksum_bytes = descriptor.hash.as_ref().and_then(|hash| {
            let algo = HashAlgorithm::parse(&hash.algorithm)?;
            algo.supports_checksum_param()
                .then(|| decode_digest(&hash.value, algo))
                .flatten()
        });

        let stream = stream_mut(&mut session.doc, stream_id)?;
        let mut params = match stream.dict.get(b"Params") {
            Ok(Object::Dictionary(existing)) => existing.clone(),
            _ => Dictionary::new(),
        };
        params.set("Size", Object::Integer(descriptor.size as i64));
        if let Some(modified) = &descriptor.modified {
            params.set("ModDate", Object::string_literal(pdf_date(modified)));
        }
        if let Some(created) = &descriptor.created {
            params.set("CreationDate", Object::string_literal(pdf_date(created)));
        }
        if let Some(bytes) = checksum_bytes {
            params.set("CheckSum", Object::String(bytes, StringFormat::Hexadecimal));
        }
        stream.dict.set("Params", Object::Dictionary(params));
        Ok(())
    }

    /// Records the group in the registry, once per owning message. Missing
    /// or non-MD5 hashes demote the group to a warning: it keeps its
    /// normalized filespec but takes no part in checksum-based linkage.
    fn register_group(
        &self,
        first_entry: &FilespecEntry,
        group: &[&AttachmentDescriptor],
        registry: &mut FilespecRegistry,
        report: &mut NormalizeReport,
    ) -> Option<String> {
        let canonical = group[0];
        let supported = canonical
            .hash
            .as_ref()
            .and_then(|hash| HashAlgorithm::parse(&hash.algorithm))
            .filter(|algo| algo.supports_checksum_param())
            .and_then(|_| canonical.checksum());

        match supported {
            Some(checksum) => {
                for descriptor in group {
                    registry.insert(&checksum, &descriptor.message_id, first_entry.filespec_id);
                }
                Some(checksum)
            }
            None => {
                let reason = match &canonical.hash {
                    Some(hash) => format!("unsupported hash algorithm '{}'", hash.algorithm),
                    None => "no content hash".to_string(),
                };
                warn!(group = %canonical.unique_name, %reason, "attachment excluded from checksum linkage");
                report
                    .warnings
                    .push(format!("{}: {}", canonical.unique_name, reason));
                None
            }
        }
    }
}

/// Groups descriptors by unique name, preserving first-seen order.
fn group_by_unique_name(
    descriptors: &[AttachmentDescriptor],
) -> Vec<(String, Vec<&AttachmentDescriptor>)> {
    let mut groups: Vec<(String, Vec<&AttachmentDescriptor>)> = Vec::new();
    for descriptor in descriptors {
        match groups.iter_mut().find(|(name, _)| *name == descriptor.unique_name) {
            Some((_, group)) => group.push(descriptor),
            None => groups.push((descriptor.unique_name.clone(), vec![descriptor])),
        }
    }
    groups
}

/// `/UF` (preferred) or `/F` of a filespec, decoded.
pub fn filespec_name(doc: &Document, filespec: &Dictionary) -> Option<String> {
    for key in [b"UF".as_slice(), b"F".as_slice()] {
        if let Ok(obj) = filespec.get(key) {
            if let Some(name) = resolve(doc, obj).ok().and_then(|o| text_string(o)) {
                return Some(name);
            }
        }
    }
    None
}

/// The embedded stream a filespec points at via `/EF /F`.
fn embedded_stream_id(doc: &Document, filespec: &Dictionary, name: &str) -> Result<ObjectId> {
    let ef = filespec
        .get(b"EF")
        .ok()
        .and_then(|obj| resolve(doc, obj).ok())
        .and_then(|obj| obj.as_dict().ok())
        .ok_or_else(|| StructureError::MissingObject(format!("/EF of filespec '{}'", name)))?;
    ef.get(b"F")
        .or_else(|_| ef.get(b"UF"))
        .and_then(Object::as_reference)
        .map_err(|_| StructureError::MissingObject(format!("embedded stream of '{}'", name)).into())
}

fn repoint_embedded_stream(
    doc: &mut Document,
    filespec_id: ObjectId,
    stream_id: ObjectId,
) -> Result<()> {
    let filespec = dictionary_mut(doc, filespec_id)?;
    let ef = match filespec.get_mut(b"EF") {
        Ok(Object::Dictionary(ef)) => ef,
        _ => return Err(StructureError::MissingObject("/EF dictionary".into()).into()),
    };
    for key in [b"F".as_slice(), b"UF".as_slice()] {
        if ef.has(key) {
            ef.set(key, Object::Reference(stream_id));
        }
    }
    Ok(())
}

fn stream_len(doc: &Document, stream_id: ObjectId) -> Result<u64> {
    match doc.get_object(stream_id)? {
        Object::Stream(stream) => Ok(stream_bytes(stream).len() as u64),
        _ => Err(StructureError::MissingObject("embedded file stream".into()).into()),
    }
}

fn stream_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Stream> {
    match doc.get_object_mut(id)? {
        Object::Stream(stream) => Ok(stream),
        _ => Err(StructureError::MissingObject("stream object".into()).into()),
    }
}

fn dictionary_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary> {
    Ok(doc.get_object_mut(id)?.as_dict_mut()?)
}

/// Text object for a Unicode-capable field: plain literal for ASCII,
/// UTF-16BE with BOM otherwise.
fn text_object(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Literal)
    }
}
