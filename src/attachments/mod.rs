// Attachment handling: normalization, the checksum-indexed filespec
// registry, the embedded-files name-tree rebuild and link promotion.

pub mod index_rebuilder;
pub mod normalizer;
pub mod promoter;
pub mod registry;

pub use index_rebuilder::IndexRebuilder;
pub use normalizer::{AttachmentNormalizer, GroupRecord, NormalizeReport};
pub use promoter::LinkPromoter;
pub use registry::FilespecRegistry;
