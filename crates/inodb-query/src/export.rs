//! Nested tree export for external browsers.

use serde::{Deserialize, Serialize};

use inodb_core::{PathEntry, PathId};
use inodb_store::Inventory;

use crate::error::QueryError;

/// Name of the synthetic node holding the exported roots.
pub const EXPORT_ROOT: &str = ".";

/// One exported entry and its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub name: String,
    /// Apparent size in bytes.
    pub asize: u64,
    /// Disk usage in bytes. Block counts are not indexed, so this equals `asize`.
    pub dsize: u64,
    pub ino: u64,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Whole seconds since the epoch.
    pub mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportNode>,
}

impl ExportNode {
    fn from_entry(name: String, entry: &PathEntry) -> Self {
        let size = entry.size.unwrap_or(0);
        Self {
            name,
            asize: size,
            dsize: size,
            ino: entry.inode,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime.map(|t| t.floor() as i64),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.children);
        }
        count
    }
}

/// Export the subtrees under `roots` beneath a synthetic [`EXPORT_ROOT`] node.
///
/// Each root is named by its full path; everything below it by basename.
pub fn export_tree(inventory: &Inventory, roots: &[PathId]) -> Result<ExportNode, QueryError> {
    if let Some(id) = roots.iter().find(|id| !inventory.tree().contains(**id)) {
        return Err(QueryError::RootNotIndexed { id: *id });
    }
    let paths = inventory.full_paths(roots)?;
    let children = roots
        .iter()
        .zip(paths)
        .map(|(root, path)| {
            let entry = inventory.entry(*root)?;
            export_node(inventory, ExportNode::from_entry(path, &entry), *root)
        })
        .collect::<Result<Vec<_>, QueryError>>()?;

    Ok(ExportNode {
        name: EXPORT_ROOT.to_string(),
        asize: 0,
        dsize: 0,
        ino: 0,
        mode: None,
        uid: None,
        gid: None,
        mtime: None,
        children,
    })
}

/// A node under construction and its children still to visit, last first.
struct Frame {
    node: ExportNode,
    unvisited: Vec<PathEntry>,
}

impl Frame {
    fn open(inventory: &Inventory, node: ExportNode, id: PathId) -> Result<Self, QueryError> {
        let mut unvisited = inventory.children(id)?;
        unvisited.reverse();
        Ok(Self { node, unvisited })
    }
}

/// Build the subtree under `id` depth-first with an explicit stack.
fn export_node(inventory: &Inventory, node: ExportNode, id: PathId) -> Result<ExportNode, QueryError> {
    let mut stack = vec![Frame::open(inventory, node, id)?];
    loop {
        let next = stack.last_mut().and_then(|frame| frame.unvisited.pop());
        if let Some(child) = next {
            let child_node = ExportNode::from_entry(child.name.to_string(), &child);
            stack.push(Frame::open(inventory, child_node, child.id)?);
            continue;
        }

        let Some(done) = stack.pop() else {
            return Err(QueryError::RootNotIndexed { id });
        };
        match stack.last_mut() {
            Some(parent) => parent.node.children.push(done.node),
            None => return Ok(done.node),
        }
    }
}

/// Serialize an export as JSON.
pub fn export_json(node: &ExportNode, pretty: bool) -> Result<String, QueryError> {
    let json = if pretty {
        serde_json::to_string_pretty(node)?
    } else {
        serde_json::to_string(node)?
    };
    Ok(json)
}
