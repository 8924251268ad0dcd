//! Checksum-indexed filespec registry.
//!
//! Owned by one enhancement pass and discarded with it. Within one message
//! a checksum always resolves to the same filespec; across messages the
//! same checksum resolves independently — attachments are disambiguated
//! per message, never deduplicated globally.

use std::collections::HashMap;

use lopdf::ObjectId;

use crate::error::{AttachmentError, Result};

#[derive(Debug, Default)]
pub struct FilespecRegistry {
    entries: HashMap<(String, String), ObjectId>,
}

impl FilespecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a filespec for (checksum, message id). Re-inserting an
    /// existing key is redundant, not an error; the first mapping wins.
    pub fn insert(&mut self, checksum: &str, message_id: &str, filespec: ObjectId) {
        self.entries
            .entry((checksum.to_ascii_lowercase(), message_id.to_string()))
            .or_insert(filespec);
    }

    pub fn get(&self, checksum: &str, message_id: &str) -> Option<ObjectId> {
        self.entries
            .get(&(checksum.to_ascii_lowercase(), message_id.to_string()))
            .copied()
    }

    /// Resolution scoped to one message; missing entries are fatal for the
    /// hierarchy builder.
    pub fn resolve(&self, checksum: &str, message_id: &str) -> Result<ObjectId> {
        self.get(checksum, message_id).ok_or_else(|| {
            AttachmentError::Unresolved {
                checksum: checksum.to_string(),
                message_id: message_id.to_string(),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_checksum_in_two_messages_stays_distinct() {
        let mut registry = FilespecRegistry::new();
        registry.insert("deadbeef", "msg-1", (10, 0));
        registry.insert("deadbeef", "msg-2", (20, 0));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("deadbeef", "msg-1").unwrap(), (10, 0));
        assert_eq!(registry.resolve("deadbeef", "msg-2").unwrap(), (20, 0));
    }

    #[test]
    fn duplicate_insert_is_redundant() {
        let mut registry = FilespecRegistry::new();
        registry.insert("cafe", "msg-1", (10, 0));
        registry.insert("cafe", "msg-1", (99, 0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("cafe", "msg-1").unwrap(), (10, 0));
    }

    #[test]
    fn lookup_is_case_insensitive_on_checksums() {
        let mut registry = FilespecRegistry::new();
        registry.insert("DEADBEEF", "msg-1", (10, 0));
        assert_eq!(registry.resolve("deadbeef", "msg-1").unwrap(), (10, 0));
    }

    #[test]
    fn unknown_key_fails_resolution() {
        let registry = FilespecRegistry::new();
        assert!(registry.resolve("deadbeef", "msg-1").is_err());
    }
}
