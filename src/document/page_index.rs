//! Bi-keyed page lookup over the base document.
//!
//! Built once after the document is opened; read everywhere afterwards.
//! The only later mutation of a page dictionary is the `/DPart` back-link
//! the hierarchy builder writes, which goes through the document, not
//! through this index.

use std::collections::{BTreeMap, HashMap};

use lopdf::{Document, ObjectId};

use crate::error::{Result, StructureError};

#[derive(Debug, Clone)]
pub struct PageIndex {
    by_number: BTreeMap<u32, ObjectId>,
    by_id: HashMap<ObjectId, u32>,
}

impl PageIndex {
    pub fn new(doc: &Document) -> Result<Self> {
        let by_number = doc.get_pages();
        if by_number.is_empty() {
            return Err(StructureError::MissingObject("page tree".into()).into());
        }
        let by_id = by_number.iter().map(|(n, id)| (*id, *n)).collect();
        Ok(Self { by_number, by_id })
    }

    /// Page object for a 1-based page number
    pub fn id_of(&self, number: u32) -> Result<ObjectId> {
        self.by_number
            .get(&number)
            .copied()
            .ok_or_else(|| StructureError::MissingPage(number).into())
    }

    /// 1-based page number for a page object
    pub fn number_of(&self, id: ObjectId) -> Option<u32> {
        self.by_id.get(&id).copied()
    }

    /// Number of the document's last page
    pub fn last_page(&self) -> u32 {
        // new() rejects empty page trees
        *self.by_number.keys().next_back().unwrap_or(&0)
    }

    pub fn page_count(&self) -> usize {
        self.by_number.len()
    }

    /// Page objects for an inclusive 1-based range, in order
    pub fn range(&self, start: u32, end: u32) -> Result<Vec<ObjectId>> {
        (start..=end).map(|n| self.id_of(n)).collect()
    }
}
