//! Compliance fixups applied after the structural stages.
//!
//! Small catalog- and page-level corrections the renderer leaves behind:
//! the viewer opens on the navigation pane (or the attachments pane for a
//! single-message archive that carries attachments), the title bar shows
//! the document title, obsolete `/ProcSet` arrays are dropped from resource
//! dictionaries, and remote go-to actions that point at a filespec object
//! are rewritten to carry the plain file name the actions vocabulary
//! expects.

use lopdf::{Dictionary, Object, ObjectId};
use tracing::{debug, info, instrument};

use crate::attachments::normalizer::filespec_name;
use crate::document::session::resolve;
use crate::document::Session;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct FixupReport {
    pub page_mode: &'static str,
    pub proc_sets_removed: usize,
    pub remote_links_rewritten: usize,
}

pub struct ComplianceFixups;

impl ComplianceFixups {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all)]
    pub async fn run(&self, session: &mut Session, use_attachments_pane: bool) -> Result<FixupReport> {
        let page_mode = if use_attachments_pane {
            "UseAttachments"
        } else {
            "UseOutlines"
        };
        self.set_viewer_preferences(session, page_mode)?;

        let report = FixupReport {
            page_mode,
            proc_sets_removed: self.strip_proc_sets(session)?,
            remote_links_rewritten: self.rewrite_remote_links(session)?,
        };
        info!(
            page_mode = report.page_mode,
            proc_sets = report.proc_sets_removed,
            remote_links = report.remote_links_rewritten,
            "applied compliance fixups"
        );
        Ok(report)
    }

    /// Sets the page mode and viewer preferences, merging into any
    /// preferences dictionary the renderer already wrote.
    fn set_viewer_preferences(&self, session: &mut Session, page_mode: &str) -> Result<()> {
        let mut prefs = match session.catalog()?.get(b"ViewerPreferences") {
            Ok(obj) => resolve(&session.doc, obj)?.as_dict()?.clone(),
            Err(_) => Dictionary::new(),
        };
        prefs.set("DisplayDocTitle", Object::Boolean(true));
        prefs.set("NonFullScreenPageMode", Object::Name(b"UseNone".to_vec()));

        let catalog = session.catalog_mut()?;
        catalog.set("PageMode", Object::Name(page_mode.as_bytes().to_vec()));
        catalog.set("ViewerPreferences", Object::Dictionary(prefs));
        Ok(())
    }

    /// Drops `/ProcSet` from every resource dictionary, whether it lives as
    /// its own object or inline in a page or form XObject.
    fn strip_proc_sets(&self, session: &mut Session) -> Result<usize> {
        let ids: Vec<ObjectId> = session.doc.objects.keys().copied().collect();
        let mut removed = 0;
        for id in ids {
            let dict = match session.doc.get_object_mut(id) {
                Ok(Object::Dictionary(dict)) => dict,
                Ok(Object::Stream(stream)) => &mut stream.dict,
                _ => continue,
            };
            if dict.remove(b"ProcSet").is_some() {
                removed += 1;
            }
            if let Ok(Object::Dictionary(resources)) = dict.get_mut(b"Resources") {
                if resources.remove(b"ProcSet").is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Remote go-to actions must name their target as a file name string;
    /// the renderer leaves a filespec dictionary (or a reference to one)
    /// under `/F`. Replaces it with the filespec's plain name.
    fn rewrite_remote_links(&self, session: &mut Session) -> Result<usize> {
        let ids: Vec<ObjectId> = session.doc.objects.keys().copied().collect();

        // read phase: find the actions to rewrite and the names to put there
        let mut edits: Vec<(ObjectId, bool, String)> = Vec::new();
        for id in &ids {
            let dict = match session.doc.get_object(*id) {
                Ok(Object::Dictionary(dict)) => dict,
                _ => continue,
            };
            if let Some(name) = remote_target_name(&session.doc, dict) {
                edits.push((*id, false, name));
            } else if let Ok(Object::Dictionary(action)) = dict.get(b"A") {
                if let Some(name) = remote_target_name(&session.doc, action) {
                    edits.push((*id, true, name));
                }
            }
        }

        for (id, nested, name) in &edits {
            let dict = session.doc.get_object_mut(*id)?.as_dict_mut()?;
            let action = if *nested {
                match dict.get_mut(b"A") {
                    Ok(Object::Dictionary(action)) => action,
                    _ => continue,
                }
            } else {
                dict
            };
            action.set("F", Object::string_literal(name.as_str()));
            debug!(object = ?id, file = %name, "rewrote remote go-to target");
        }
        Ok(edits.len())
    }
}

impl Default for ComplianceFixups {
    fn default() -> Self {
        Self::new()
    }
}

/// For a remote go-to action whose `/F` is a filespec dictionary (direct or
/// referenced), the plain file name to put there. `None` when the action is
/// not remote or already carries a string.
fn remote_target_name(doc: &lopdf::Document, dict: &Dictionary) -> Option<String> {
    let is_gotor = matches!(dict.get(b"S"), Ok(Object::Name(name)) if name == b"GoToR");
    if !is_gotor {
        return None;
    }
    let target = resolve(doc, dict.get(b"F").ok()?).ok()?;
    match target {
        Object::Dictionary(filespec) => filespec_name(doc, filespec),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Stream};

    fn base_doc() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! {
                "ProcSet" => vec!["PDF".into(), "Text".into()],
                "Font" => dictionary! {},
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    #[tokio::test]
    async fn sets_page_mode_and_viewer_preferences() {
        let (doc, _) = base_doc();
        let mut session = Session::from_document(doc).unwrap();
        ComplianceFixups::new().run(&mut session, false).await.unwrap();

        let catalog = session.catalog().unwrap();
        assert_eq!(
            catalog.get(b"PageMode").unwrap().as_name().unwrap(),
            b"UseOutlines"
        );
        let prefs = catalog.get(b"ViewerPreferences").unwrap().as_dict().unwrap();
        assert!(matches!(
            prefs.get(b"DisplayDocTitle").unwrap(),
            Object::Boolean(true)
        ));
        assert_eq!(
            prefs.get(b"NonFullScreenPageMode").unwrap().as_name().unwrap(),
            b"UseNone"
        );
    }

    #[tokio::test]
    async fn single_message_archive_opens_on_attachments() {
        let (doc, _) = base_doc();
        let mut session = Session::from_document(doc).unwrap();
        let report = ComplianceFixups::new().run(&mut session, true).await.unwrap();
        assert_eq!(report.page_mode, "UseAttachments");
    }

    #[tokio::test]
    async fn proc_sets_are_stripped_everywhere() {
        let (mut doc, _) = base_doc();
        // standalone resource dictionary
        doc.add_object(dictionary! {
            "ProcSet" => vec!["PDF".into()],
            "XObject" => dictionary! {},
        });
        // form XObject with inline resources
        doc.add_object(Object::Stream(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "Resources" => dictionary! { "ProcSet" => vec!["PDF".into()] },
            },
            Vec::new(),
        )));
        let mut session = Session::from_document(doc).unwrap();
        let report = ComplianceFixups::new().run(&mut session, false).await.unwrap();
        assert_eq!(report.proc_sets_removed, 3);
    }

    #[tokio::test]
    async fn remote_actions_get_plain_file_names() {
        let (mut doc, page_id) = base_doc();
        let filespec = doc.add_object(dictionary! {
            "Type" => "Filespec",
            "F" => Object::string_literal("report.docx"),
            "UF" => Object::string_literal("report.docx"),
        });
        let annot = doc.add_object(dictionary! {
            "Subtype" => "Link",
            "A" => dictionary! {
                "S" => "GoToR",
                "F" => Object::Reference(filespec),
            },
        });
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", vec![Object::Reference(annot)]);

        let mut session = Session::from_document(doc).unwrap();
        let report = ComplianceFixups::new().run(&mut session, false).await.unwrap();
        assert_eq!(report.remote_links_rewritten, 1);

        let annot = session.doc.get_dictionary(annot).unwrap();
        let action = annot.get(b"A").unwrap().as_dict().unwrap();
        assert_eq!(action.get(b"F").unwrap().as_str().unwrap(), b"report.docx");
    }

    #[tokio::test]
    async fn string_targets_are_left_alone() {
        let (mut doc, _) = base_doc();
        doc.add_object(dictionary! {
            "S" => "GoToR",
            "F" => Object::string_literal("other.pdf"),
        });
        let mut session = Session::from_document(doc).unwrap();
        let report = ComplianceFixups::new().run(&mut session, false).await.unwrap();
        assert_eq!(report.remote_links_rewritten, 0);
    }
}
