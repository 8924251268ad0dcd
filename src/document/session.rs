//! The open document session owning the lopdf object graph.
//!
//! The session is the single writer for the whole pass. `finalize` consumes
//! it and is the only code path that materializes output; when any stage
//! fails, the session is dropped and the partially mutated in-memory state
//! goes with it.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use crate::error::{Result, StructureError};

/// Cap on reference chains when dereferencing, against cyclic graphs
const MAX_DEREF_DEPTH: usize = 32;

pub struct Session {
    pub doc: Document,
    root_id: ObjectId,
}

impl Session {
    /// Opens the base document for edit.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let doc = Document::load(path.as_ref())?;
        let root_id = locate_root(&doc)?;
        info!(path = %path.as_ref().display(), objects = doc.objects.len(), "opened document");
        Ok(Self { doc, root_id })
    }

    /// Wraps an already loaded document. Used by tests that build synthetic
    /// documents in memory.
    pub fn from_document(doc: Document) -> Result<Self> {
        let root_id = locate_root(&doc)?;
        Ok(Self { doc, root_id })
    }

    pub fn catalog(&self) -> Result<&Dictionary> {
        Ok(self.doc.get_dictionary(self.root_id)?)
    }

    pub fn catalog_mut(&mut self) -> Result<&mut Dictionary> {
        Ok(self.doc.get_object_mut(self.root_id)?.as_dict_mut()?)
    }

    /// The document info dictionary, if any.
    pub fn info(&self) -> Option<&Dictionary> {
        let obj = self.doc.trailer.get(b"Info").ok()?;
        resolve(&self.doc, obj).ok()?.as_dict().ok()
    }

    /// Object id of the info dictionary, creating an empty one when the
    /// trailer has none (or carries it inline).
    pub fn ensure_info(&mut self) -> Result<ObjectId> {
        match self.doc.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => Ok(*id),
            Ok(Object::Dictionary(dict)) => {
                let dict = dict.clone();
                let id = self.doc.add_object(Object::Dictionary(dict));
                self.doc.trailer.set("Info", Object::Reference(id));
                Ok(id)
            }
            _ => {
                let id = self.doc.add_object(Object::Dictionary(Dictionary::new()));
                self.doc.trailer.set("Info", Object::Reference(id));
                Ok(id)
            }
        }
    }

    /// The `/Info /Producer` string, used to pick the attachment discovery
    /// strategy.
    pub fn producer(&self) -> Option<String> {
        let info = self.info()?;
        text_string(info.get(b"Producer").ok()?)
    }

    /// The catalog-wide associated-files list as object ids, in order.
    /// Missing `/AF` yields an empty list; inline (non-reference) entries
    /// are skipped.
    pub fn af_list(&self) -> Result<Vec<ObjectId>> {
        let catalog = self.catalog()?;
        let array = match catalog.get(b"AF") {
            Ok(obj) => resolve(&self.doc, obj)?.as_array()?.clone(),
            Err(_) => return Ok(Vec::new()),
        };
        let mut ids = Vec::with_capacity(array.len());
        for entry in &array {
            match entry.as_reference() {
                Ok(id) => ids.push(id),
                Err(_) => debug!("skipping inline entry in /AF list"),
            }
        }
        Ok(ids)
    }

    /// Replaces the catalog `/AF` list. Any previously referenced array
    /// object becomes unreachable and is swept at finalization.
    pub fn set_af_list(&mut self, ids: &[ObjectId]) -> Result<()> {
        let array: Vec<Object> = ids.iter().map(|id| Object::Reference(*id)).collect();
        self.catalog_mut()?.set("AF", Object::Array(array));
        Ok(())
    }

    /// Sweeps unreachable objects and writes the enhanced document.
    ///
    /// Consumes the session: this is the only exit that publishes output.
    pub fn finalize<P: AsRef<Path>>(mut self, output: P) -> Result<()> {
        let swept = self.doc.prune_objects();
        info!(
            swept = swept.len(),
            remaining = self.doc.objects.len(),
            output = %output.as_ref().display(),
            "finalizing document"
        );
        self.doc.save(output.as_ref())?;
        Ok(())
    }
}

fn locate_root(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| StructureError::MissingObject("catalog".into()).into())
}

/// Follows reference chains to the underlying object, bounded against
/// cycles.
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Result<&'a Object> {
    for _ in 0..MAX_DEREF_DEPTH {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id)?,
            _ => return Ok(obj),
        }
    }
    Err(StructureError::MissingObject("reference chain too deep".into()).into())
}

/// Decoded bytes of an embedded stream; falls back to the raw content when
/// the stream carries no filter lopdf can decode.
pub fn stream_bytes(stream: &Stream) -> Vec<u8> {
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}

/// Best-effort text decode of a PDF string object.
pub fn text_string(obj: &Object) -> Option<String> {
    let bytes = obj.as_str().ok()?;
    if bytes.starts_with(&[0xFE, 0xFF]) {
        // UTF-16BE text string
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&utf16).ok()
    } else {
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}
