//! In-memory DPart tree model.
//!
//! Parsed once from the upstream XML fragment and read-only afterwards.
//! Nodes live in an arena indexed by `NodeId`; traversals are iterative
//! with an explicit queue, and every walk is bounded by the configured
//! depth limit so malformed upstream input cannot run away.

use std::collections::VecDeque;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{Result, TreeError};

pub type NodeId = usize;

/// Attribute prefix mapping into the descriptive metadata map
const DPM_PREFIX: &[u8] = b"DPM_";

#[derive(Debug, Clone)]
pub struct DPartNode {
    /// Navigation-anchor id; doubles as the owning message id for leaves
    pub id: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Descriptive metadata, insertion-ordered
    pub dpm: Vec<(String, String)>,
    /// Lowercase hex checksums of this node's attachments, in order
    pub attachment_checksums: Vec<String>,
    /// Verbatim XMP packet from the node's `metadata` child element
    pub xmp: Option<String>,
}

impl DPartNode {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            id: None,
            parent,
            children: Vec::new(),
            dpm: Vec::new(),
            attachment_checksums: Vec::new(),
            xmp: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug)]
pub struct DPartTree {
    nodes: Vec<DPartNode>,
    max_depth: usize,
}

impl DPartTree {
    /// Parses the fixed-vocabulary DPart fragment: nested `DPart` elements,
    /// an `Id` attribute, `AttachmentCheckSums` as a space-separated list,
    /// `DPM_*` attributes into the metadata map, and an optional `metadata`
    /// child captured verbatim as XMP.
    pub fn from_xml(xml: &str, max_depth: usize) -> Result<Self> {
        let mut reader = Reader::from_str(xml);

        let mut nodes: Vec<DPartNode> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == b"DPart" => {
                    let idx = push_node(&mut nodes, &stack, &e)?;
                    stack.push(idx);
                    if stack.len() > max_depth {
                        return Err(TreeError::RecursionLimit {
                            depth: stack.len(),
                            limit: max_depth,
                        }
                        .into());
                    }
                }
                Ok(Event::Empty(e)) if e.name().as_ref() == b"DPart" => {
                    push_node(&mut nodes, &stack, &e)?;
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"DPart" => {
                    stack.pop();
                }
                Ok(Event::Start(e)) if e.name().as_ref() == b"metadata" => {
                    let &current = stack
                        .last()
                        .ok_or_else(|| TreeError::Parse("metadata outside DPart".into()))?;
                    let text = reader
                        .read_text(e.name())
                        .map_err(|err| TreeError::Parse(err.to_string()))?;
                    nodes[current].xmp = Some(text.into_owned());
                }
                Ok(Event::Start(e)) => {
                    // Unknown element: skip its whole subtree
                    let name = e.name();
                    reader
                        .read_to_end(name)
                        .map_err(|err| TreeError::Parse(err.to_string()))?;
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(TreeError::Parse(err.to_string()).into()),
                Ok(_) => {}
            }
        }

        if nodes.is_empty() {
            return Err(TreeError::MissingRoot.into());
        }
        debug!(nodes = nodes.len(), "parsed DPart fragment");
        Ok(Self { nodes, max_depth })
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node(&self, id: NodeId) -> &DPartNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Leaf nodes in breadth-first order over the whole tree.
    pub fn leaves(&self) -> Result<Vec<NodeId>> {
        self.leaves_under(self.root())
    }

    /// The leaf immediately following `id` in the whole-tree breadth-first
    /// order; for an internal node, its own first descendant leaf. `None`
    /// after the last leaf.
    pub fn next_leaf(&self, id: NodeId) -> Result<Option<NodeId>> {
        if !self.nodes[id].is_leaf() {
            return Ok(self.leaves_under(id)?.first().copied());
        }
        let leaves = self.leaves()?;
        let position = leaves.iter().position(|&leaf| leaf == id);
        Ok(position.and_then(|p| leaves.get(p + 1)).copied())
    }

    /// Walks parent links to the root, bounded by the depth guard.
    pub fn root_of(&self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        for _ in 0..=self.max_depth {
            match self.nodes[current].parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(TreeError::RecursionLimit {
            depth: self.max_depth + 1,
            limit: self.max_depth,
        }
        .into())
    }

    fn leaves_under(&self, start: NodeId) -> Result<Vec<NodeId>> {
        let mut leaves = Vec::new();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        queue.push_back((start, 0));
        while let Some((id, depth)) = queue.pop_front() {
            if depth > self.max_depth {
                return Err(TreeError::RecursionLimit {
                    depth,
                    limit: self.max_depth,
                }
                .into());
            }
            let node = &self.nodes[id];
            if node.is_leaf() {
                leaves.push(id);
            } else {
                for &child in &node.children {
                    queue.push_back((child, depth + 1));
                }
            }
        }
        Ok(leaves)
    }
}

fn push_node(
    nodes: &mut Vec<DPartNode>,
    stack: &[NodeId],
    element: &quick_xml::events::BytesStart<'_>,
) -> Result<NodeId> {
    if stack.is_empty() && !nodes.is_empty() {
        return Err(TreeError::Parse("more than one root DPart element".into()).into());
    }
    let mut node = DPartNode::new(stack.last().copied());
    for attr in element.attributes() {
        let attr = attr.map_err(|err| TreeError::Parse(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| TreeError::Parse(err.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"Id" => node.id = Some(value),
            b"AttachmentCheckSums" => {
                node.attachment_checksums = value
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect();
            }
            key if key.starts_with(DPM_PREFIX) => {
                let key = String::from_utf8_lossy(&key[DPM_PREFIX.len()..]).into_owned();
                node.dpm.push((key, value));
            }
            _ => {}
        }
    }
    let idx = nodes.len();
    if let Some(&parent) = stack.last() {
        nodes[parent].children.push(idx);
    }
    nodes.push(node);
    Ok(idx)
}
