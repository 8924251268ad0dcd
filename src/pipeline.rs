//! The enhancement pipeline.
//!
//! One `Enhancer` drives one pass over a rendered archive: attachments are
//! normalized first so every later stage sees canonical filespecs, links
//! are promoted while the navigation destinations still exist, the
//! embedded-files index is rebuilt from the normalized state, the part
//! hierarchy goes in last among the structural stages, and the compliance
//! fixups run over the finished graph. Output is written only when every
//! stage succeeded.

use std::path::Path;

use tracing::{info, instrument};

use crate::attachments::{
    AttachmentNormalizer, FilespecRegistry, IndexRebuilder, LinkPromoter, NormalizeReport,
};
use crate::attachments::index_rebuilder::RebuildReport;
use crate::attachments::promoter::PromoteReport;
use crate::config::EnhancerConfig;
use crate::document::{AnnotationIndex, PageIndex, Session};
use crate::dpart::builder::BuildReport;
use crate::dpart::{DPartBuilder, DPartTree};
use crate::fixups::{ComplianceFixups, FixupReport};
use crate::types::{parse_manifest, AttachmentDescriptor};
use crate::error::Result;

/// Per-stage counters for one completed pass.
#[derive(Debug, Default)]
pub struct EnhanceReport {
    pub normalize: NormalizeReport,
    pub promote: PromoteReport,
    pub rebuild: RebuildReport,
    pub hierarchy: BuildReport,
    pub fixups: FixupReport,
}

pub struct Enhancer {
    config: EnhancerConfig,
}

impl Enhancer {
    pub fn new(config: EnhancerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnhancerConfig {
        &self.config
    }

    /// Runs the full pass and writes the enhanced document.
    #[instrument(skip_all, fields(input = %input.as_ref().display()))]
    pub async fn enhance(
        &self,
        input: impl AsRef<Path>,
        tree_xml: &str,
        manifest_json: &str,
        output: impl AsRef<Path>,
    ) -> Result<EnhanceReport> {
        let tree = DPartTree::from_xml(tree_xml, self.config.max_tree_depth)?;
        let descriptors = parse_manifest(manifest_json)?;

        let mut session = Session::open(input)?;
        let report = self.run_stages(&mut session, &tree, &descriptors).await?;
        session.finalize(output)?;
        Ok(report)
    }

    /// Runs every stage against an open session without writing output.
    /// The command-line dry-run mode and the integration tests drive this
    /// directly.
    pub async fn run_stages(
        &self,
        session: &mut Session,
        tree: &DPartTree,
        descriptors: &[AttachmentDescriptor],
    ) -> Result<EnhanceReport> {
        let pages = PageIndex::new(&session.doc)?;
        let annotations = AnnotationIndex::new();
        let mut registry = FilespecRegistry::new();

        let normalize = AttachmentNormalizer::new(&self.config)
            .run(session, &annotations, descriptors, &mut registry)
            .await?;
        let promote = LinkPromoter::new(&self.config)
            .run(session, &annotations, &normalize.records)
            .await?;
        let rebuild = IndexRebuilder::new().run(session).await?;
        let hierarchy = DPartBuilder::new()
            .run(session, tree, &registry, &pages)
            .await?;

        let use_attachments_pane =
            hierarchy.leaves == 1 && hierarchy.attachments_linked > 0;
        let fixups = ComplianceFixups::new()
            .run(session, use_attachments_pane)
            .await?;

        info!(
            messages = hierarchy.leaves,
            attachments = normalize.groups,
            promoted = promote.promoted,
            indexed = rebuild.index_entries,
            "enhancement pass complete"
        );
        Ok(EnhanceReport {
            normalize,
            promote,
            rebuild,
            hierarchy,
            fixups,
        })
    }
}
