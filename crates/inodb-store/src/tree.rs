//! In-memory adjacency index over `paths.parent_id`.

use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::Connection;

use inodb_core::PathId;

/// Parent pointers and child sets for every stored path.
///
/// Depths count parent hops; both [`TreeIndex::ancestors`] and
/// [`TreeIndex::descendants`] include the starting node at depth 0.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    parent: HashMap<PathId, Option<PathId>>,
    children: HashMap<PathId, BTreeSet<PathId>>,
}

impl TreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from the `paths` table.
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let mut tree = Self::new();
        let mut stmt = conn.prepare("SELECT id, parent_id FROM paths")?;
        let rows = stmt.query_map([], |row| {
            Ok((PathId(row.get(0)?), row.get::<_, Option<i64>>(1)?.map(PathId)))
        })?;
        for row in rows {
            let (id, parent) = row?;
            tree.insert(id, parent);
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn contains(&self, id: PathId) -> bool {
        self.parent.contains_key(&id)
    }

    /// Add a node, replacing any previous parent link.
    pub fn insert(&mut self, id: PathId, parent: Option<PathId>) {
        self.detach(id);
        self.parent.insert(id, parent);
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().insert(id);
        }
    }

    /// Whether linking `child` under `parent` would close a cycle.
    pub fn would_cycle(&self, child: PathId, parent: PathId) -> bool {
        self.ancestor_ids(parent).any(|id| id == child)
    }

    /// Link `child` under `parent`. Returns `false` and leaves the index
    /// unchanged if the link would create a cycle.
    pub fn link(&mut self, child: PathId, parent: PathId) -> bool {
        if self.would_cycle(child, parent) {
            return false;
        }
        self.insert(child, Some(parent));
        true
    }

    /// Clear the parent link of a node.
    pub fn detach(&mut self, id: PathId) {
        if let Some(Some(old)) = self.parent.get(&id).copied() {
            if let Some(siblings) = self.children.get_mut(&old) {
                siblings.remove(&id);
                if siblings.is_empty() {
                    self.children.remove(&old);
                }
            }
            self.parent.insert(id, None);
        }
    }

    /// Remove a node. Its children are detached and returned.
    pub fn remove(&mut self, id: PathId) -> Vec<PathId> {
        self.detach(id);
        self.parent.remove(&id);
        let orphans: Vec<PathId> = self
            .children
            .remove(&id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for orphan in &orphans {
            self.parent.insert(*orphan, None);
        }
        orphans
    }

    pub fn parent_of(&self, id: PathId) -> Option<PathId> {
        self.parent.get(&id).copied().flatten()
    }

    pub fn children(&self, id: PathId) -> impl Iterator<Item = PathId> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }

    /// `id` and its ancestors, nearest first.
    pub fn ancestors(&self, id: PathId) -> Vec<(PathId, u32)> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.ancestor_ids(id).zip(0..).collect()
    }

    /// `id` and everything beneath it in pre-order.
    pub fn descendants(&self, id: PathId) -> Vec<(PathId, u32)> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![(id, 0u32)];
        while let Some((node, depth)) = stack.pop() {
            out.push((node, depth));
            if let Some(children) = self.children.get(&node) {
                // Reverse so that the smallest id is visited first.
                stack.extend(children.iter().rev().map(|c| (*c, depth + 1)));
            }
        }
        out
    }

    /// Deduplicated union of the subtrees under `roots`, pre-order.
    pub fn descendants_of(&self, roots: &[PathId]) -> Vec<PathId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in roots {
            if seen.contains(root) {
                continue;
            }
            for (id, _) in self.descendants(*root) {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        out
    }

    fn ancestor_ids(&self, id: PathId) -> impl Iterator<Item = PathId> + '_ {
        let limit = self.parent.len() + 1;
        std::iter::successors(Some(id), move |current| self.parent_of(*current)).take(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> PathId {
        PathId(n)
    }

    /// 1 -> {2, 3}, 3 -> {4}, 4 -> {5}
    fn sample() -> TreeIndex {
        let mut tree = TreeIndex::new();
        tree.insert(id(1), None);
        tree.insert(id(2), Some(id(1)));
        tree.insert(id(3), Some(id(1)));
        tree.insert(id(4), Some(id(3)));
        tree.insert(id(5), Some(id(4)));
        tree
    }

    #[test]
    fn test_descendants_with_depth() {
        let tree = sample();
        assert_eq!(
            tree.descendants(id(1)),
            vec![(id(1), 0), (id(2), 1), (id(3), 1), (id(4), 2), (id(5), 3)]
        );
        assert_eq!(tree.descendants(id(4)), vec![(id(4), 0), (id(5), 1)]);
        assert!(tree.descendants(id(99)).is_empty());
    }

    #[test]
    fn test_ancestors_with_depth() {
        let tree = sample();
        assert_eq!(
            tree.ancestors(id(5)),
            vec![(id(5), 0), (id(4), 1), (id(3), 2), (id(1), 3)]
        );
        assert_eq!(tree.ancestors(id(1)), vec![(id(1), 0)]);
    }

    #[test]
    fn test_link_refuses_cycles() {
        let mut tree = sample();
        assert!(tree.would_cycle(id(1), id(5)));
        assert!(tree.would_cycle(id(3), id(3)));
        assert!(!tree.link(id(1), id(5)));
        assert_eq!(tree.parent_of(id(1)), None);

        assert!(tree.link(id(5), id(2)));
        assert_eq!(tree.parent_of(id(5)), Some(id(2)));
        assert_eq!(tree.children(id(4)).count(), 0);
    }

    #[test]
    fn test_remove_orphans_children() {
        let mut tree = sample();
        let orphans = tree.remove(id(3));
        assert_eq!(orphans, vec![id(4)]);
        assert_eq!(tree.parent_of(id(4)), None);
        assert!(!tree.contains(id(3)));
        assert_eq!(tree.children(id(1)).collect::<Vec<_>>(), vec![id(2)]);
        assert_eq!(tree.descendants(id(4)), vec![(id(4), 0), (id(5), 1)]);
    }

    #[test]
    fn test_descendants_of_deduplicates() {
        let tree = sample();
        let ids = tree.descendants_of(&[id(3), id(1), id(4)]);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], id(3));
    }

    #[test]
    fn test_load_from_connection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE paths (id INTEGER PRIMARY KEY, parent_id INTEGER);
             INSERT INTO paths VALUES (1, NULL), (2, 1), (3, 2);",
        )
        .unwrap();
        let tree = TreeIndex::load(&conn).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.ancestors(id(3)).len(), 3);
    }
}
