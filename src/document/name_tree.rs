//! Name-tree access: entry collection, prefix search and named-destination
//! resolution.
//!
//! Name trees keep their keys byte-wise sorted and every non-root node
//! carries a `/Limits` [min max] pair; prefix search uses those bounds to
//! prune whole subtrees without touching them.

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::document::session::resolve;
use crate::error::{Result, StructureError};

/// Guard against malformed, cyclic name trees
const MAX_TREE_DEPTH: usize = 64;

/// The `/Names /Dests` tree root, when the catalog has one.
pub fn dests_root<'a>(doc: &'a Document, catalog: &'a Dictionary) -> Result<Option<&'a Dictionary>> {
    let names = match catalog.get(b"Names") {
        Ok(obj) => resolve(doc, obj)?.as_dict()?,
        Err(_) => return Ok(None),
    };
    match names.get(b"Dests") {
        Ok(obj) => Ok(Some(resolve(doc, obj)?.as_dict()?)),
        Err(_) => Ok(None),
    }
}

/// Collects every (key, value) pair of a name tree in key order.
pub fn collect_entries(
    doc: &Document,
    node: &Dictionary,
    out: &mut Vec<(Vec<u8>, Object)>,
) -> Result<()> {
    walk(doc, node, None, out, 0)
}

/// All entries whose key starts with `prefix`.
///
/// Subtrees whose `/Limits` bounds, truncated to the common length with the
/// prefix, fall entirely below the minimum or above the maximum are pruned
/// without being examined.
pub fn find_by_prefix(
    doc: &Document,
    node: &Dictionary,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Object)>> {
    let mut out = Vec::new();
    walk(doc, node, Some(prefix), &mut out, 0)?;
    Ok(out)
}

fn walk(
    doc: &Document,
    node: &Dictionary,
    prefix: Option<&[u8]>,
    out: &mut Vec<(Vec<u8>, Object)>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(StructureError::MissingObject("name tree too deep".into()).into());
    }

    if let (Some(prefix), Ok(limits)) = (prefix, node.get(b"Limits")) {
        let limits = resolve(doc, limits)?.as_array()?;
        if limits.len() == 2 {
            let lo = limits[0].as_str()?;
            let hi = limits[1].as_str()?;
            let m_lo = lo.len().min(prefix.len());
            let m_hi = hi.len().min(prefix.len());
            if prefix[..m_lo] < lo[..m_lo] || prefix[..m_hi] > hi[..m_hi] {
                return Ok(());
            }
        }
    }

    if let Ok(names) = node.get(b"Names") {
        let pairs = resolve(doc, names)?.as_array()?;
        for pair in pairs.chunks_exact(2) {
            let key = resolve(doc, &pair[0])?.as_str()?;
            let matches = match prefix {
                Some(prefix) => key.starts_with(prefix),
                None => true,
            };
            if matches {
                out.push((key.to_vec(), pair[1].clone()));
            }
        }
    }

    if let Ok(kids) = node.get(b"Kids") {
        let kids = resolve(doc, kids)?.as_array()?;
        for kid in kids {
            let kid = resolve(doc, kid)?.as_dict()?;
            walk(doc, kid, prefix, out, depth + 1)?;
        }
    }

    Ok(())
}

/// Exact-match lookup in a name tree.
pub fn lookup(doc: &Document, node: &Dictionary, name: &[u8]) -> Result<Option<Object>> {
    let matches = find_by_prefix(doc, node, name)?;
    Ok(matches
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value))
}

/// Resolves a named destination to the page object it points at.
///
/// Checks the `/Names /Dests` tree first, then the legacy catalog `/Dests`
/// dictionary.
pub fn destination_page(doc: &Document, catalog: &Dictionary, name: &str) -> Result<ObjectId> {
    let value = match dests_root(doc, catalog)? {
        Some(root) => lookup(doc, root, name.as_bytes())?,
        None => None,
    };
    let value = match value {
        Some(v) => Some(v),
        None => legacy_dest(doc, catalog, name)?,
    };
    let value = value.ok_or_else(|| StructureError::DestinationNotFound(name.to_string()))?;
    dest_target_page(doc, &value)
        .ok_or_else(|| StructureError::DestinationNotFound(name.to_string()).into())
}

fn legacy_dest(doc: &Document, catalog: &Dictionary, name: &str) -> Result<Option<Object>> {
    let dests = match catalog.get(b"Dests") {
        Ok(obj) => resolve(doc, obj)?.as_dict()?,
        Err(_) => return Ok(None),
    };
    Ok(dests.get(name.as_bytes()).ok().cloned())
}

/// First page reference of a destination value, which is either an explicit
/// destination array or a dictionary wrapping one under `/D`.
pub fn dest_target_page(doc: &Document, value: &Object) -> Option<ObjectId> {
    let value = resolve(doc, value).ok()?;
    let array = match value {
        Object::Array(array) => array,
        Object::Dictionary(dict) => resolve(doc, dict.get(b"D").ok()?).ok()?.as_array().ok()?,
        _ => return None,
    };
    array.first()?.as_reference().ok()
}
