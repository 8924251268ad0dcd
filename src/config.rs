//! Configuration for an enhancement pass

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for one enhancement pass.
///
/// The defaults match the naming conventions the upstream typesetting
/// stage emits; they only need overriding when that stage is reconfigured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Maximum DPart tree depth accepted from upstream XML. Traversals and
    /// the hierarchy builder fail with a recursion-limit error beyond this.
    pub max_tree_depth: usize,

    /// `/Desc` prefix marking a placeholder filespec entry whose empty
    /// stream must be re-pointed at the real one.
    pub placeholder_desc_prefix: String,

    /// Named-destination prefix for attachment anchors; the full convention
    /// is `<prefix><lowercase hex checksum>` with an optional suffix per
    /// occurrence.
    pub attachment_dest_prefix: String,

    /// `/T` written on promoted file-attachment annotations.
    pub annotation_author: String,

    /// `/Name` (icon) written on promoted file-attachment annotations.
    pub annotation_icon: String,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 100,
            placeholder_desc_prefix: "dummy:".into(),
            attachment_dest_prefix: "EmbeddedFile_".into(),
            annotation_author: "eapdf".into(),
            annotation_icon: "Paperclip".into(),
        }
    }
}

impl EnhancerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tree_depth == 0 {
            return Err(Error::Config("max_tree_depth must be at least 1".into()));
        }
        if self.placeholder_desc_prefix.is_empty() {
            return Err(Error::Config(
                "placeholder_desc_prefix must not be empty".into(),
            ));
        }
        if self.attachment_dest_prefix.is_empty() {
            return Err(Error::Config(
                "attachment_dest_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}
