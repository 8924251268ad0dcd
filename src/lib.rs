//! Archival enhancement for rendered email-archive PDFs.
//!
//! Takes the PDF a typesetting engine produced from an email archive,
//! together with the exporter's part-tree XML and attachment manifest, and
//! turns it into a preservation-grade document: canonical embedded
//! attachments, a rebuilt embedded-files index, file-attachment annotations
//! at every occurrence, a document part hierarchy mapping folders and
//! messages onto page ranges, and reconciled document metadata.

// Configuration and core pipeline
pub mod config;
pub mod error;
pub mod hash_utils;
pub mod pipeline;
pub mod types;
pub mod utils;

// Document access layer
pub mod document;

// Stage 1-3: attachment normalization, link promotion, index rebuild
pub mod attachments;

// Stage 4: part hierarchy and metadata
pub mod dpart;

// Stage 5: compliance fixups
pub mod fixups;

pub use config::EnhancerConfig;
pub use error::{Error, Result};
pub use pipeline::{EnhanceReport, Enhancer};
