// Type definitions shared across the enhancement pipeline

pub mod attachment;
pub mod producer;

pub use attachment::{parse_manifest, AttachmentDescriptor, FileHash, Relationship};
pub use producer::RenderProducer;
