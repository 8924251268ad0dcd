//! Recognized typesetting engines and their attachment recording style

use crate::error::{AttachmentError, Result};

/// The typesetting engine that rendered the base document.
///
/// The engines record embedded files differently, so the attachment
/// normalizer selects its discovery strategy from this value. Matching is
/// done against the `/Info /Producer` string; anything unrecognized fails
/// fast rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderProducer {
    /// Apache FOP: one document-wide associated-files list on the catalog
    ApacheFop,
    /// RenderX XEP: per-page file-attachment annotations
    RenderXep,
}

impl RenderProducer {
    /// Maps a free-text producer string to a recognized engine.
    pub fn recognize(producer: &str) -> Result<Self> {
        let upper = producer.to_ascii_uppercase();
        if upper.contains("FOP") {
            Ok(RenderProducer::ApacheFop)
        } else if upper.contains("XEP") {
            Ok(RenderProducer::RenderXep)
        } else {
            Err(AttachmentError::UnsupportedProducer(producer.to_string()).into())
        }
    }

    /// True when attachments live in the catalog `/AF` list rather than in
    /// per-page annotations.
    pub fn uses_associated_files(self) -> bool {
        matches!(self, RenderProducer::ApacheFop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_fop() {
        let p = RenderProducer::recognize("Apache FOP Version 2.8").unwrap();
        assert_eq!(p, RenderProducer::ApacheFop);
        assert!(p.uses_associated_files());
    }

    #[test]
    fn recognizes_xep() {
        let p = RenderProducer::recognize("RenderX XEP 4.30").unwrap();
        assert_eq!(p, RenderProducer::RenderXep);
        assert!(!p.uses_associated_files());
    }

    #[test]
    fn rejects_unknown_producer() {
        assert!(RenderProducer::recognize("Prince 15").is_err());
    }
}
