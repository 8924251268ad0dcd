//! Lazily memoized annotation and filespec scans.
//!
//! The scans walk every page (or the whole catalog) once; each result is
//! computed on first access behind a mutex-guarded check-then-populate so
//! concurrent first accesses still run the scan exactly once. The caches
//! hold object ids only — mutation goes through the document afterwards.

use std::sync::Arc;

use lopdf::{Document, Object, ObjectId};
use parking_lot::Mutex;
use tracing::debug;

use crate::document::session::resolve;
use crate::error::Result;

#[derive(Default)]
pub struct AnnotationIndex {
    links: Mutex<Option<Arc<Vec<ObjectId>>>>,
    file_attachments: Mutex<Option<Arc<Vec<ObjectId>>>>,
    af_filespecs: Mutex<Option<Arc<Vec<ObjectId>>>>,
}

impl AnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `/Link` annotations across the document, in page order.
    pub fn link_annotations(&self, doc: &Document) -> Result<Arc<Vec<ObjectId>>> {
        let mut slot = self.links.lock();
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let scanned = Arc::new(scan_annotations(doc, b"Link")?);
        *slot = Some(Arc::clone(&scanned));
        Ok(scanned)
    }

    /// All `/FileAttachment` annotations across the document, in page order.
    pub fn file_attachment_annotations(&self, doc: &Document) -> Result<Arc<Vec<ObjectId>>> {
        let mut slot = self.file_attachments.lock();
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let scanned = Arc::new(scan_annotations(doc, b"FileAttachment")?);
        *slot = Some(Arc::clone(&scanned));
        Ok(scanned)
    }

    /// Filespec objects referenced from the catalog `/AF` list.
    pub fn af_filespecs(&self, doc: &Document) -> Result<Arc<Vec<ObjectId>>> {
        let mut slot = self.af_filespecs.lock();
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let scanned = Arc::new(scan_af_list(doc)?);
        *slot = Some(Arc::clone(&scanned));
        Ok(scanned)
    }
}

fn scan_annotations(doc: &Document, subtype: &[u8]) -> Result<Vec<ObjectId>> {
    let mut found = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let page = doc.get_dictionary(page_id)?;
        let annots = match page.get(b"Annots") {
            Ok(obj) => resolve(doc, obj)?.as_array()?.clone(),
            Err(_) => continue,
        };
        for entry in &annots {
            let annot_id = match entry.as_reference() {
                Ok(id) => id,
                Err(_) => {
                    debug!("skipping inline annotation entry");
                    continue;
                }
            };
            let annot = doc.get_dictionary(annot_id)?;
            if matches!(annot.get(b"Subtype"), Ok(Object::Name(name)) if name == subtype) {
                found.push(annot_id);
            }
        }
    }
    debug!(
        subtype = %String::from_utf8_lossy(subtype),
        count = found.len(),
        "scanned annotations"
    );
    Ok(found)
}

fn scan_af_list(doc: &Document) -> Result<Vec<ObjectId>> {
    let root_id = match doc.trailer.get(b"Root").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => return Ok(Vec::new()),
    };
    let catalog = doc.get_dictionary(root_id)?;
    let array = match catalog.get(b"AF") {
        Ok(obj) => resolve(doc, obj)?.as_array()?.clone(),
        Err(_) => return Ok(Vec::new()),
    };
    Ok(array
        .iter()
        .filter_map(|entry| entry.as_reference().ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn doc_with_annots() -> Document {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let link = doc.add_object(dictionary! {"Type" => "Annot", "Subtype" => "Link"});
        let file_attachment =
            doc.add_object(dictionary! {"Type" => "Annot", "Subtype" => "FileAttachment"});
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Annots" => vec![Object::Reference(link), Object::Reference(file_attachment)],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn separates_links_from_file_attachments() {
        let doc = doc_with_annots();
        let index = AnnotationIndex::new();
        assert_eq!(index.link_annotations(&doc).unwrap().len(), 1);
        assert_eq!(index.file_attachment_annotations(&doc).unwrap().len(), 1);
    }

    #[test]
    fn scan_runs_once_and_is_memoized() {
        let doc = doc_with_annots();
        let index = AnnotationIndex::new();
        let first = index.link_annotations(&doc).unwrap();
        let second = index.link_annotations(&doc).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_af_list_is_empty() {
        let doc = doc_with_annots();
        let index = AnnotationIndex::new();
        assert!(index.af_filespecs(&doc).unwrap().is_empty());
    }
}
