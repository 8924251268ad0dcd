//! Embedded-files name-tree rebuild.
//!
//! Replaces any pre-existing `/Names /EmbeddedFiles` tree with a single
//! flat, byte-wise sorted node built from the normalized associated-files
//! list, then prunes that list down to `Source` entries — the index now
//! carries the complete record, only source attachments stay listed at the
//! top level. The old tree's nodes become unreachable and are swept at
//! finalization.

use std::collections::{HashMap, HashSet};

use lopdf::{Dictionary, Object, ObjectId};
use tracing::{debug, info, instrument};

use crate::attachments::normalizer::filespec_name;
use crate::document::session::resolve;
use crate::document::Session;
use crate::error::{Result, StructureError};
use crate::utils::last_path_component;

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub index_entries: usize,
    pub af_retained: usize,
    pub af_removed: usize,
}

pub struct IndexRebuilder;

impl IndexRebuilder {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all)]
    pub async fn run(&self, session: &mut Session) -> Result<RebuildReport> {
        let af = session.af_list()?;

        let mut keyed = Vec::with_capacity(af.len());
        for fs_id in &af {
            let filespec = session.doc.get_dictionary(*fs_id)?;
            let name = filespec_name(&session.doc, filespec).ok_or_else(|| {
                StructureError::MissingObject(format!("filename of filespec {:?}", fs_id))
            })?;
            keyed.push((last_path_component(&name).to_string(), *fs_id));
        }

        let mut entries: Vec<(String, ObjectId)> = disambiguate(keyed.iter().map(|(k, _)| k.clone()))
            .into_iter()
            .zip(keyed.iter().map(|(_, id)| *id))
            .collect();
        entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut names = Vec::with_capacity(entries.len() * 2);
        for (key, fs_id) in &entries {
            names.push(Object::string_literal(key.as_str()));
            names.push(Object::Reference(*fs_id));
        }
        let mut node = Dictionary::new();
        node.set("Names", Object::Array(names));
        let node_id = session.doc.add_object(Object::Dictionary(node));

        self.install_index(session, node_id)?;
        let (retained, removed) = self.prune_af(session, &af)?;

        let report = RebuildReport {
            index_entries: entries.len(),
            af_retained: retained,
            af_removed: removed,
        };
        info!(
            entries = report.index_entries,
            retained = report.af_retained,
            removed = report.af_removed,
            "rebuilt embedded-files index"
        );
        Ok(report)
    }

    /// Points `/Names /EmbeddedFiles` at the new node, preserving the other
    /// name trees the catalog may carry.
    fn install_index(&self, session: &mut Session, node_id: ObjectId) -> Result<()> {
        let mut names = match session.catalog()?.get(b"Names") {
            Ok(obj) => resolve(&session.doc, obj)?.as_dict()?.clone(),
            Err(_) => Dictionary::new(),
        };
        names.set("EmbeddedFiles", Object::Reference(node_id));
        session.catalog_mut()?.set("Names", Object::Dictionary(names));
        Ok(())
    }

    /// Keeps only `Source` entries in the catalog `/AF` list.
    fn prune_af(&self, session: &mut Session, af: &[ObjectId]) -> Result<(usize, usize)> {
        let mut retained = Vec::new();
        for fs_id in af {
            let filespec = session.doc.get_dictionary(*fs_id)?;
            let is_source = matches!(
                filespec.get(b"AFRelationship"),
                Ok(Object::Name(name)) if name == b"Source"
            );
            if is_source {
                retained.push(*fs_id);
            } else {
                debug!(filespec = ?fs_id, "dropping non-source entry from /AF");
            }
        }
        let removed = af.len() - retained.len();
        session.set_af_list(&retained)?;
        Ok((retained.len(), removed))
    }
}

impl Default for IndexRebuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends `" (n)"` (n = 1, 2, … per repeated key, original order
/// preserved) until every key is unique.
fn disambiguate<I: IntoIterator<Item = String>>(keys: I) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut repeats: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();
    for base in keys {
        let mut key = base.clone();
        while !used.insert(key.clone()) {
            let n = repeats.entry(base.clone()).or_insert(0);
            *n += 1;
            key = format!("{} ({})", base, n);
        }
        out.push(key);
    }
    out
}
