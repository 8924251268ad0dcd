// The DPart side of the enhancer: the in-memory folder/message tree model,
// XMP/info metadata merging, and the hierarchy builder that materializes
// the tree into the document's object graph.

pub mod builder;
pub mod tree;
pub mod xmp;

pub use builder::DPartBuilder;
pub use tree::{DPartNode, DPartTree, NodeId};
