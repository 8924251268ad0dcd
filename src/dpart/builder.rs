//! Materializes the DPart tree into the document's object graph.
//!
//! One `/DPart` dictionary per tree node, wired through `/DPartRoot` on the
//! catalog; leaves claim inclusive page ranges derived from their navigation
//! destinations, and every covered page gets a `/DPart` back-link. The root
//! node's XMP packet is reconciled with `/Info` and installed as the
//! document metadata stream.

use std::collections::HashMap;

use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use crate::attachments::FilespecRegistry;
use crate::document::name_tree::destination_page;
use crate::document::{PageIndex, Session};
use crate::dpart::tree::{DPartTree, NodeId};
use crate::dpart::xmp;
use crate::error::{Result, StructureError, TreeError};

/// DPM keys whose values are name objects rather than text strings
const NAME_VALUED_KEYS: [&str; 2] = ["ContentSetType", "Subtype"];

#[derive(Debug, Default)]
pub struct BuildReport {
    pub nodes: usize,
    pub leaves: usize,
    pub attachments_linked: usize,
    pub pages_linked: usize,
}

pub struct DPartBuilder;

impl DPartBuilder {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all)]
    pub async fn run(
        &self,
        session: &mut Session,
        tree: &DPartTree,
        registry: &FilespecRegistry,
        pages: &PageIndex,
    ) -> Result<BuildReport> {
        self.install_document_metadata(session, tree)?;

        let ranges = leaf_page_ranges(session, tree, pages)?;

        // Ids are allocated up front so parent and child references can be
        // written in one pass.
        let node_ids: Vec<ObjectId> = (0..tree.len())
            .map(|_| session.doc.new_object_id())
            .collect();
        let dpart_root_id = session.doc.new_object_id();

        let mut report = BuildReport {
            nodes: tree.len(),
            leaves: ranges.len(),
            ..BuildReport::default()
        };
        self.write_node(
            session,
            tree,
            registry,
            pages,
            &node_ids,
            &ranges,
            tree.root(),
            dpart_root_id,
            0,
            &mut report,
        )?;

        session.doc.objects.insert(
            dpart_root_id,
            Object::Dictionary(dictionary! {
                "Type" => "DPartRoot",
                "DPartRootNode" => Object::Reference(node_ids[tree.root()]),
            }),
        );
        session
            .catalog_mut()?
            .set("DPartRoot", Object::Reference(dpart_root_id));

        info!(
            nodes = report.nodes,
            leaves = report.leaves,
            attachments = report.attachments_linked,
            pages = report.pages_linked,
            "built document part hierarchy"
        );
        Ok(report)
    }

    /// Reconciles the root node's XMP packet with `/Info` and installs the
    /// patched packet as the catalog metadata stream. A root without a
    /// packet is a hard error: the archive-level record would be empty.
    fn install_document_metadata(&self, session: &mut Session, tree: &DPartTree) -> Result<()> {
        let packet = tree
            .node(tree.root())
            .xmp
            .clone()
            .ok_or(StructureError::MissingMetadata)?;

        let fields = xmp::parse_packet(&packet)?;
        let info_id = session.ensure_info()?;
        let merged = xmp::merge_with_info(&fields, session.doc.get_dictionary(info_id)?);
        xmp::apply_to_info(&merged, session.doc.get_object_mut(info_id)?.as_dict_mut()?);

        let patched = xmp::rewrite_packet(&packet, &merged)?;
        let stream_id = session.doc.add_object(metadata_stream(patched));
        session
            .catalog_mut()?
            .set("Metadata", Object::Reference(stream_id));
        debug!("installed reconciled document metadata");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_node(
        &self,
        session: &mut Session,
        tree: &DPartTree,
        registry: &FilespecRegistry,
        pages: &PageIndex,
        node_ids: &[ObjectId],
        ranges: &HashMap<NodeId, (u32, u32)>,
        node_id: NodeId,
        parent_object: ObjectId,
        depth: usize,
        report: &mut BuildReport,
    ) -> Result<()> {
        if depth > tree.max_depth() {
            return Err(TreeError::RecursionLimit {
                depth,
                limit: tree.max_depth(),
            }
            .into());
        }

        let node = tree.node(node_id);
        let mut dict = dictionary! {
            "Type" => "DPart",
            "Parent" => Object::Reference(parent_object),
        };

        if !node.children.is_empty() {
            let refs: Vec<Object> = node
                .children
                .iter()
                .map(|&c| Object::Reference(node_ids[c]))
                .collect();
            dict.set("DParts", Object::Array(vec![Object::Array(refs)]));
        }

        if !node.dpm.is_empty() {
            dict.set("DPM", Object::Dictionary(dpm_dictionary(&node.dpm)));
        }

        if !node.attachment_checksums.is_empty() {
            let message_id = node.id.as_deref().unwrap_or_default();
            let mut af = Vec::with_capacity(node.attachment_checksums.len());
            for checksum in &node.attachment_checksums {
                af.push(Object::Reference(registry.resolve(checksum, message_id)?));
            }
            report.attachments_linked += af.len();
            dict.set("AF", Object::Array(af));
        }

        if node_id != tree.root() {
            if let Some(packet) = &node.xmp {
                let stream_id = session.doc.add_object(metadata_stream(packet.clone()));
                dict.set("Metadata", Object::Reference(stream_id));
            }
        }

        if let Some(&(start, end)) = ranges.get(&node_id) {
            dict.set("Start", Object::Reference(pages.id_of(start)?));
            // End is only defined for ranges spanning more than one page
            if end > start {
                dict.set("End", Object::Reference(pages.id_of(end)?));
            }
            for page_id in pages.range(start, end)? {
                let page = session.doc.get_object_mut(page_id)?.as_dict_mut()?;
                page.set("DPart", Object::Reference(node_ids[node_id]));
                report.pages_linked += 1;
            }
        }

        session
            .doc
            .objects
            .insert(node_ids[node_id], Object::Dictionary(dict));

        for &child in &node.children {
            self.write_node(
                session,
                tree,
                registry,
                pages,
                node_ids,
                ranges,
                child,
                node_ids[node_id],
                depth + 1,
                report,
            )?;
        }
        Ok(())
    }
}

impl Default for DPartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Inclusive 1-based page range per leaf: a leaf starts at the page its
/// navigation destination points to and ends just before the next leaf's
/// start, the last leaf taking everything to the end of the document.
fn leaf_page_ranges(
    session: &Session,
    tree: &DPartTree,
    pages: &PageIndex,
) -> Result<HashMap<NodeId, (u32, u32)>> {
    let catalog = session.catalog()?.clone();
    let leaves = tree.leaves()?;

    let mut starts = Vec::with_capacity(leaves.len());
    for &leaf in &leaves {
        let anchor = tree.node(leaf).id.as_deref().ok_or_else(|| {
            StructureError::MissingObject("leaf DPart node without an Id".into())
        })?;
        let page_id = destination_page(&session.doc, &catalog, anchor)?;
        let number = pages.number_of(page_id).ok_or_else(|| {
            StructureError::MissingObject(format!("page of destination '{}'", anchor))
        })?;
        starts.push(number);
    }

    let mut ranges = HashMap::with_capacity(leaves.len());
    for (i, &leaf) in leaves.iter().enumerate() {
        let start = starts[i];
        let end = match starts.get(i + 1) {
            Some(&next) if next > start => next - 1,
            Some(_) => {
                return Err(StructureError::MissingObject(format!(
                    "destination pages out of order at leaf {}",
                    i + 1
                ))
                .into())
            }
            None => pages.last_page(),
        };
        ranges.insert(leaf, (start, end));
    }
    Ok(ranges)
}

fn dpm_dictionary(entries: &[(String, String)]) -> Dictionary {
    let mut dpm = Dictionary::new();
    for (key, value) in entries {
        let object = if NAME_VALUED_KEYS.contains(&key.as_str()) {
            Object::Name(value.clone().into_bytes())
        } else {
            Object::string_literal(value.as_str())
        };
        dpm.set(key.as_bytes(), object);
    }
    dpm
}

fn metadata_stream(packet: String) -> Object {
    Object::Stream(Stream::new(
        dictionary! {
            "Type" => "Metadata",
            "Subtype" => "XML",
        },
        packet.into_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Document;

    const ROOT_PACKET: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
        <rdf:RDF xmlns:rdf="r" xmlns:dc="d" xmlns:pdf="p">
          <rdf:Description>
            <dc:title><rdf:Alt><rdf:li>Mailbox</rdf:li></rdf:Alt></dc:title>
            <pdf:Keywords>email</pdf:Keywords>
          </rdf:Description>
        </rdf:RDF></x:xmpmeta>"#;

    /// Five pages, four message destinations at pages 1, 3, 4 and 5.
    fn archive_doc() -> Document {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_ids: Vec<ObjectId> = (0..5)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                })
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => 5,
            }),
        );

        let dest = |page: ObjectId| {
            Object::Array(vec![
                Object::Reference(page),
                "XYZ".into(),
                Object::Null,
                Object::Null,
                Object::Null,
            ])
        };
        let mut names = Vec::new();
        for (name, page) in [
            ("Msg1", page_ids[0]),
            ("Msg2", page_ids[2]),
            ("Msg3", page_ids[3]),
            ("Msg4", page_ids[4]),
        ] {
            names.push(Object::string_literal(name));
            names.push(dest(page));
        }
        let dests_id = doc.add_object(dictionary! { "Names" => names });

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "Names" => dictionary! { "Dests" => Object::Reference(dests_id) },
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn archive_tree() -> DPartTree {
        let xml = format!(
            r#"<DPart DPM_ContentSetType="EmailArchive">
                 <metadata>{}</metadata>
                 <DPart DPM_Subject="inbox">
                   <DPart Id="Msg1"/>
                   <DPart Id="Msg2" AttachmentCheckSums="deadbeef cafebabe"/>
                 </DPart>
                 <DPart DPM_Subject="sent">
                   <DPart Id="Msg3"/>
                   <DPart Id="Msg4"/>
                 </DPart>
               </DPart>"#,
            ROOT_PACKET
        );
        DPartTree::from_xml(&xml, 100).unwrap()
    }

    async fn built_session() -> (Session, DPartTree) {
        let mut session = Session::from_document(archive_doc()).unwrap();
        let tree = archive_tree();
        let pages = PageIndex::new(&session.doc).unwrap();
        let mut registry = FilespecRegistry::new();
        for checksum in ["deadbeef", "cafebabe"] {
            let fs = session
                .doc
                .add_object(Object::Dictionary(dictionary! {"Type" => "Filespec"}));
            registry.insert(checksum, "Msg2", fs);
        }
        let report = DPartBuilder::new()
            .run(&mut session, &tree, &registry, &pages)
            .await
            .unwrap();
        assert_eq!(report.nodes, 7);
        assert_eq!(report.leaves, 4);
        assert_eq!(report.attachments_linked, 2);
        assert_eq!(report.pages_linked, 5);
        (session, tree)
    }

    fn dpart_root_node(session: &Session) -> ObjectId {
        let root_ref = session.catalog().unwrap().get(b"DPartRoot").unwrap();
        let root = session
            .doc
            .get_dictionary(root_ref.as_reference().unwrap())
            .unwrap();
        root.get(b"DPartRootNode")
            .unwrap()
            .as_reference()
            .unwrap()
    }

    fn leaf_dicts(session: &Session) -> Vec<Dictionary> {
        let root = session
            .doc
            .get_dictionary(dpart_root_node(session))
            .unwrap();
        let folders = root.get(b"DParts").unwrap().as_array().unwrap()[0]
            .as_array()
            .unwrap()
            .clone();
        let mut out = Vec::new();
        for folder in folders {
            let folder = session
                .doc
                .get_dictionary(folder.as_reference().unwrap())
                .unwrap();
            for leaf in folder.get(b"DParts").unwrap().as_array().unwrap()[0]
                .as_array()
                .unwrap()
            {
                out.push(
                    session
                        .doc
                        .get_dictionary(leaf.as_reference().unwrap())
                        .unwrap()
                        .clone(),
                );
            }
        }
        out
    }

    #[tokio::test]
    async fn leaves_claim_contiguous_page_ranges() {
        let (session, _) = built_session().await;
        let pages = PageIndex::new(&session.doc).unwrap();
        let leaves = leaf_dicts(&session);
        assert_eq!(leaves.len(), 4);

        let range_of = |dict: &Dictionary| {
            let start = pages
                .number_of(dict.get(b"Start").unwrap().as_reference().unwrap())
                .unwrap();
            let end = match dict.get(b"End") {
                Ok(obj) => pages.number_of(obj.as_reference().unwrap()).unwrap(),
                Err(_) => start,
            };
            (start, end)
        };
        assert_eq!(range_of(&leaves[0]), (1, 2));
        assert_eq!(range_of(&leaves[1]), (3, 3));
        assert_eq!(range_of(&leaves[2]), (4, 4));
        assert_eq!(range_of(&leaves[3]), (5, 5));

        // multi-page leaves carry End, single-page leaves omit it
        assert!(leaves[0].get(b"End").is_ok());
        assert!(leaves[1].get(b"End").is_err());
    }

    #[tokio::test]
    async fn every_page_points_back_at_its_leaf() {
        let (session, _) = built_session().await;
        let pages = PageIndex::new(&session.doc).unwrap();
        for n in 1..=5 {
            let page = session.doc.get_dictionary(pages.id_of(n).unwrap()).unwrap();
            assert!(page.get(b"DPart").unwrap().as_reference().is_ok());
        }
        // Pages 1 and 2 both belong to the first message.
        let first = session
            .doc
            .get_dictionary(pages.id_of(1).unwrap())
            .unwrap()
            .get(b"DPart")
            .unwrap()
            .as_reference()
            .unwrap();
        let second = session
            .doc
            .get_dictionary(pages.id_of(2).unwrap())
            .unwrap()
            .get(b"DPart")
            .unwrap()
            .as_reference()
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn root_parent_is_the_dpart_root() {
        let (session, _) = built_session().await;
        let root_ref = session
            .catalog()
            .unwrap()
            .get(b"DPartRoot")
            .unwrap()
            .as_reference()
            .unwrap();
        let root_node = session
            .doc
            .get_dictionary(dpart_root_node(&session))
            .unwrap();
        assert_eq!(
            root_node.get(b"Parent").unwrap().as_reference().unwrap(),
            root_ref
        );
    }

    #[tokio::test]
    async fn dpm_names_and_strings_are_typed() {
        let (session, _) = built_session().await;
        let root_node = session
            .doc
            .get_dictionary(dpart_root_node(&session))
            .unwrap();
        let dpm = root_node.get(b"DPM").unwrap().as_dict().unwrap();
        assert_eq!(
            dpm.get(b"ContentSetType").unwrap().as_name().unwrap(),
            b"EmailArchive"
        );

        let folders = root_node.get(b"DParts").unwrap().as_array().unwrap()[0]
            .as_array()
            .unwrap();
        let folder = session
            .doc
            .get_dictionary(folders[0].as_reference().unwrap())
            .unwrap();
        let dpm = folder.get(b"DPM").unwrap().as_dict().unwrap();
        assert!(dpm.get(b"Subject").unwrap().as_str().is_ok());
    }

    #[tokio::test]
    async fn attachments_are_linked_on_their_message() {
        let (session, _) = built_session().await;
        let leaves = leaf_dicts(&session);
        let af = leaves[1].get(b"AF").unwrap().as_array().unwrap();
        assert_eq!(af.len(), 2);
        assert!(leaves[0].get(b"AF").is_err());
    }

    #[tokio::test]
    async fn document_metadata_carries_merged_values() {
        let (session, _) = built_session().await;
        let metadata_id = session
            .catalog()
            .unwrap()
            .get(b"Metadata")
            .unwrap()
            .as_reference()
            .unwrap();
        let stream = match session.doc.get_object(metadata_id).unwrap() {
            Object::Stream(s) => s,
            other => panic!("expected metadata stream, got {:?}", other),
        };
        let packet = String::from_utf8(stream.content.clone()).unwrap();
        assert!(packet.contains("Mailbox"));

        let info = session.info().unwrap();
        assert_eq!(
            crate::document::session::text_string(info.get(b"Title").unwrap()).unwrap(),
            "Mailbox"
        );
    }

    #[tokio::test]
    async fn missing_root_packet_is_fatal() {
        let mut session = Session::from_document(archive_doc()).unwrap();
        let tree = DPartTree::from_xml(r#"<DPart><DPart Id="Msg1"/></DPart>"#, 100).unwrap();
        let pages = PageIndex::new(&session.doc).unwrap();
        let registry = FilespecRegistry::new();
        let err = DPartBuilder::new()
            .run(&mut session, &tree, &registry, &pages)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Structure(StructureError::MissingMetadata)
        ));
    }

    #[tokio::test]
    async fn unregistered_checksum_is_fatal() {
        let mut session = Session::from_document(archive_doc()).unwrap();
        let xml = format!(
            r#"<DPart><metadata>{}</metadata><DPart Id="Msg1" AttachmentCheckSums="feed"/></DPart>"#,
            ROOT_PACKET
        );
        let tree = DPartTree::from_xml(&xml, 100).unwrap();
        let pages = PageIndex::new(&session.doc).unwrap();
        let registry = FilespecRegistry::new();
        let err = DPartBuilder::new()
            .run(&mut session, &tree, &registry, &pages)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Attachment(crate::error::AttachmentError::Unresolved { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_destination_is_fatal() {
        let mut session = Session::from_document(archive_doc()).unwrap();
        let xml = format!(
            r#"<DPart><metadata>{}</metadata><DPart Id="NoSuchMsg"/></DPart>"#,
            ROOT_PACKET
        );
        let tree = DPartTree::from_xml(&xml, 100).unwrap();
        let pages = PageIndex::new(&session.doc).unwrap();
        let registry = FilespecRegistry::new();
        let err = DPartBuilder::new()
            .run(&mut session, &tree, &registry, &pages)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Structure(StructureError::DestinationNotFound(_))
        ));
    }
}
