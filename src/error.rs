//! Error types and handling for the archival PDF enhancer

use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Custom result type for enhancer operations
pub type Result<T> = StdResult<T, Error>;

/// Core error type for one enhancement pass.
///
/// Every variant here is fatal: the pass aborts and no output file is
/// published. Non-fatal conditions (an attachment with a missing or
/// unsupported hash) are reported as warnings, not errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("DPart tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("document structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("configuration error: {0}")]
    Config(String),
}

// -------------------- Sub-error categories --------------------

/// Errors raised while parsing or traversing the DPart tree model
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TreeError {
    #[error("recursion limit of {limit} exceeded at depth {depth}")]
    RecursionLimit { depth: usize, limit: usize },

    #[error("DPart fragment has no root element")]
    MissingRoot,

    #[error("malformed DPart fragment: {0}")]
    Parse(String),
}

/// Errors raised while normalizing, indexing or promoting attachments
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AttachmentError {
    #[error("unsupported producer '{0}': cannot select an attachment discovery strategy")]
    UnsupportedProducer(String),

    #[error("attachment '{name}' is ambiguous: {entries} filespec entries for {descriptors} descriptors")]
    Ambiguous {
        name: String,
        entries: usize,
        descriptors: usize,
    },

    #[error("no filespec entries found for attachment '{0}'")]
    EntriesNotFound(String),

    #[error("attachment '{0}' has real entries referencing different streams")]
    Inconsistent(String),

    #[error("attachment '{0}' references an empty stream")]
    Empty(String),

    #[error("attachment '{name}' content does not match its declared {algorithm} digest")]
    ChecksumMismatch { name: String, algorithm: String },

    #[error("attachment '{name}' size mismatch: descriptor says {expected} bytes, stream holds {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("attachment '{name}': found {found} destinations for {expected} filespec entries")]
    DestinationCountMismatch {
        name: String,
        found: usize,
        expected: usize,
    },

    #[error("no filespec registered for checksum '{checksum}' in message '{message_id}'")]
    Unresolved {
        checksum: String,
        message_id: String,
    },
}

/// Errors raised against the document object graph itself
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StructureError {
    #[error("missing required object: {0}")]
    MissingObject(String),

    #[error("root DPart node carries no XMP metadata")]
    MissingMetadata,

    #[error("named destination not found: {0}")]
    DestinationNotFound(String),

    #[error("page {0} not present in the page index")]
    MissingPage(u32),
}
