// Document-level services: the open session, the page index, name-tree
// access and the lazily built annotation caches.

pub mod annotations;
pub mod name_tree;
pub mod page_index;
pub mod session;

pub use annotations::AnnotationIndex;
pub use page_index::PageIndex;
pub use session::Session;
