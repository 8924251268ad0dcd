//! Attachment descriptors supplied by the upstream mailbox-parsing stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Why a file is attached to the archive.
///
/// Fixed vocabulary; serialized in kebab-case in the manifest and mapped to
/// the corresponding `/AFRelationship` name in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    Source,
    Data,
    Alternative,
    Supplement,
    EncryptedPayload,
    FormData,
    Schema,
    Unspecified,
    MailAttachment,
}

impl Relationship {
    /// PDF name written as `/AFRelationship`. `Unspecified` has no name:
    /// the key is removed instead.
    pub fn pdf_name(self) -> Option<&'static str> {
        match self {
            Relationship::Source => Some("Source"),
            Relationship::Data => Some("Data"),
            Relationship::Alternative => Some("Alternative"),
            Relationship::Supplement => Some("Supplement"),
            Relationship::EncryptedPayload => Some("EncryptedPayload"),
            Relationship::FormData => Some("FormData"),
            Relationship::Schema => Some("Schema"),
            Relationship::Unspecified => None,
            Relationship::MailAttachment => Some("Mail_Attachment"),
        }
    }
}

/// Content hash of an attachment as declared in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    /// Algorithm name, e.g. "MD5" or "SHA-256"
    pub algorithm: String,
    /// Lowercase hex digest
    pub value: String,
}

/// One physical embedded-file occurrence, as described by the upstream
/// pipeline. Several descriptors may share a `unique_name` when the same
/// logical attachment was emitted more than once by the typesetting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Stable name grouping repeated occurrences of one logical attachment;
    /// this is the filename the typesetting engine wrote into the filespec.
    pub unique_name: String,

    /// The attachment's original filename, restored during normalization.
    pub original_name: String,

    pub relationship: Relationship,

    /// Declared MIME subtype, e.g. "application/pdf"
    pub subtype: String,

    /// Content hash; absent or non-MD5 hashes demote the attachment to
    /// warning status (no checksum parameter, no DPart linkage).
    pub hash: Option<FileHash>,

    /// Exact byte size of the decoded attachment content
    pub size: u64,

    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,

    pub description: Option<String>,

    /// Per-file XMP metadata, stored as a metadata stream on the embedded
    /// file when present.
    pub metadata_xml: Option<String>,

    /// Id of the message this occurrence belongs to; matches the `Id` of a
    /// DPart leaf.
    pub message_id: String,
}

impl AttachmentDescriptor {
    /// Lowercase hex checksum, when the descriptor carries a hash
    pub fn checksum(&self) -> Option<String> {
        self.hash.as_ref().map(|h| h.value.to_ascii_lowercase())
    }
}

/// Parses the JSON attachment manifest emitted by the upstream stage.
pub fn parse_manifest(json: &str) -> Result<Vec<AttachmentDescriptor>> {
    serde_json::from_str(json)
        .map_err(|e| crate::error::Error::Config(format!("attachment manifest: {}", e)))
}
