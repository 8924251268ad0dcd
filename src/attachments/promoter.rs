//! Link-to-attachment promotion.
//!
//! The typesetting engine marks each attachment occurrence with a named
//! destination (`<marker><checksum>…`) and a plain navigation link. This
//! stage rewrites each such link in place into a visible file-attachment
//! annotation carrying the filespec, and strips the navigation action.

use chrono::Utc;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use crate::attachments::GroupRecord;
use crate::config::EnhancerConfig;
use crate::document::name_tree::{dests_root, find_by_prefix};
use crate::document::session::{resolve, text_string};
use crate::document::{AnnotationIndex, Session};
use crate::error::{AttachmentError, Result, StructureError};
use crate::utils::pdf_date;

#[derive(Debug, Default)]
pub struct PromoteReport {
    pub promoted: usize,
}

pub struct LinkPromoter<'a> {
    config: &'a EnhancerConfig,
}

impl<'a> LinkPromoter<'a> {
    pub fn new(config: &'a EnhancerConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all)]
    pub async fn run(
        &self,
        session: &mut Session,
        annotations: &AnnotationIndex,
        records: &[GroupRecord],
    ) -> Result<PromoteReport> {
        let mut report = PromoteReport::default();
        let groups: Vec<&GroupRecord> =
            records.iter().filter(|r| r.checksum.is_some()).collect();
        if groups.is_empty() {
            return Ok(report);
        }

        let links = link_destinations(&session.doc, annotations)?;
        let mut appearance: Option<ObjectId> = None;

        for record in groups {
            let checksum = record.checksum.as_deref().unwrap_or_default();
            let prefix = format!("{}{}", self.config.attachment_dest_prefix, checksum);

            let destinations = {
                let catalog = session.catalog()?;
                match dests_root(&session.doc, catalog)? {
                    Some(root) => find_by_prefix(&session.doc, root, prefix.as_bytes())?,
                    None => Vec::new(),
                }
            };
            if destinations.len() != record.filespec_ids.len() {
                return Err(AttachmentError::DestinationCountMismatch {
                    name: record.unique_name.clone(),
                    found: destinations.len(),
                    expected: record.filespec_ids.len(),
                }
                .into());
            }

            for ((dest_name, _), fs_id) in destinations.iter().zip(&record.filespec_ids) {
                let annot_id = links
                    .iter()
                    .find(|(target, _)| target == dest_name)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| {
                        StructureError::DestinationNotFound(
                            String::from_utf8_lossy(dest_name).into_owned(),
                        )
                    })?;
                let ap = *appearance
                    .get_or_insert_with(|| paperclip_appearance(&mut session.doc));
                self.promote(session, annot_id, *fs_id, dest_name, record, ap)?;
                report.promoted += 1;
            }
        }

        info!(promoted = report.promoted, "promoted links to file attachments");
        Ok(report)
    }

    /// Rewrites one link annotation into a file-attachment annotation.
    fn promote(
        &self,
        session: &mut Session,
        annot_id: ObjectId,
        fs_id: ObjectId,
        dest_name: &[u8],
        record: &GroupRecord,
        appearance: ObjectId,
    ) -> Result<()> {
        let annot = session.doc.get_object_mut(annot_id)?.as_dict_mut()?;
        annot.set("Subtype", Object::Name(b"FileAttachment".to_vec()));
        annot.set(
            "Name",
            Object::Name(self.config.annotation_icon.clone().into_bytes()),
        );
        annot.set(
            "NM",
            Object::String(dest_name.to_vec(), lopdf::StringFormat::Literal),
        );
        let contents = record
            .description
            .clone()
            .unwrap_or_else(|| record.unique_name.clone());
        annot.set("Contents", Object::string_literal(contents));
        annot.set(
            "T",
            Object::string_literal(self.config.annotation_author.as_str()),
        );
        annot.set("M", Object::string_literal(pdf_date(&Utc::now())));
        annot.set("FS", Object::Reference(fs_id));
        annot.set(
            "AP",
            Object::Dictionary(dictionary! {"N" => Object::Reference(appearance)}),
        );
        // annotation flags: Print
        annot.set("F", Object::Integer(4));

        for key in [
            b"A".as_slice(),
            b"Dest".as_slice(),
            b"H".as_slice(),
            b"BS".as_slice(),
            b"PA".as_slice(),
            b"StructParent".as_slice(),
        ] {
            annot.remove(key);
        }
        debug!(annot = ?annot_id, filespec = ?fs_id, "rewrote link into file attachment");
        Ok(())
    }
}

/// (destination name, annotation id) for every link annotation that
/// navigates to a named destination.
fn link_destinations(
    doc: &Document,
    annotations: &AnnotationIndex,
) -> Result<Vec<(Vec<u8>, ObjectId)>> {
    let mut out = Vec::new();
    for annot_id in annotations.link_annotations(doc)?.iter() {
        let annot = doc.get_dictionary(*annot_id)?;
        if let Some(name) = link_target(doc, annot) {
            out.push((name, *annot_id));
        }
    }
    Ok(out)
}

/// Named-destination target of a link: either a GoTo action's `/D` or a
/// direct `/Dest` entry.
fn link_target(doc: &Document, annot: &lopdf::Dictionary) -> Option<Vec<u8>> {
    if let Ok(action) = annot.get(b"A") {
        let action = resolve(doc, action).ok()?.as_dict().ok()?;
        let is_goto = matches!(action.get(b"S"), Ok(Object::Name(name)) if name == b"GoTo");
        if is_goto {
            return dest_name(resolve(doc, action.get(b"D").ok()?).ok()?);
        }
        return None;
    }
    dest_name(resolve(doc, annot.get(b"Dest").ok()?).ok()?)
}

fn dest_name(obj: &Object) -> Option<Vec<u8>> {
    match obj {
        Object::String(_, _) => text_string(obj).map(String::into_bytes),
        Object::Name(name) => Some(name.clone()),
        _ => None,
    }
}

/// Small fixed paperclip appearance shared by every promoted annotation.
fn paperclip_appearance(doc: &mut Document) -> ObjectId {
    let content: &[u8] = b"0.75 w 1 J 1 j\n\
        7 17 m 7 6 l 7 3.8 8.8 2 11 2 c 13.2 2 15 3.8 15 6 c 15 16 l\n\
        15 17.7 13.7 19 12 19 c 10.3 19 9 17.7 9 16 c 9 7 l\n\
        9 5.9 9.9 5 11 5 c 12.1 5 13 5.9 13 7 c 13 16 l S\n";
    doc.add_object(Object::Stream(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(20),
                Object::Integer(20),
            ],
            "Resources" => dictionary! {},
        },
        content.to_vec(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_name_accepts_strings_and_names() {
        let s = Object::string_literal("EmbeddedFile_cafe");
        assert_eq!(dest_name(&s).unwrap(), b"EmbeddedFile_cafe".to_vec());
        let n = Object::Name(b"EmbeddedFile_cafe".to_vec());
        assert_eq!(dest_name(&n).unwrap(), b"EmbeddedFile_cafe".to_vec());
        assert!(dest_name(&Object::Integer(1)).is_none());
    }
}
