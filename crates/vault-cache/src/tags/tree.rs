//! Arena-backed tag tree.
//!
//! Trees are immutable once built. Every tree carries a generation number
//! drawn from a process-wide counter, which lets caches keyed by [`NodeId`]
//! tell trees apart.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use fnv::{FnvHashMap, FnvHashSet};

use crate::content::tags::tag_key;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Index of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTreeNode {
    /// Last path segment in its display casing.
    pub name: String,
    /// Case-folded full path, the node's identity.
    pub path: String,
    /// Full path in its display casing.
    pub display_path: String,
    /// Children in natural order of their display paths.
    pub children: Vec<NodeId>,
    /// Documents tagged with exactly this path.
    pub notes_with_tag: BTreeSet<String>,
    pub parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct TagTree {
    nodes: Vec<TagTreeNode>,
    roots: Vec<NodeId>,
    by_path: FnvHashMap<String, NodeId>,
    generation: u64,
}

impl Default for TagTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TagTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            by_path: FnvHashMap::default(),
            generation: next_generation(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &TagTreeNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&TagTreeNode> {
        self.nodes.get(id.index())
    }

    /// Looks a node up by tag path, ignoring case.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(&tag_key(path.trim_matches('/'))).copied()
    }

    /// Depth-first pre-order traversal in display order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(self.node(id).children.iter().rev().copied());
            Some(id)
        })
    }

    /// Display paths of every node, in traversal order.
    pub fn collect_all_tag_paths(&self) -> Vec<String> {
        self.iter()
            .map(|id| self.node(id).display_path.clone())
            .collect()
    }

    /// Union of the documents tagged at `id` or any descendant.
    pub fn subtree_notes(&self, id: NodeId) -> FnvHashSet<&str> {
        let mut notes = FnvHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            notes.extend(node.notes_with_tag.iter().map(String::as_str));
            stack.extend(node.children.iter().copied());
        }
        notes
    }

    /// Inserts a tag path, creating missing ancestors, and attaches `notes`
    /// to the final node only. Existing nodes keep their display casing.
    pub(crate) fn insert_tag(
        &mut self,
        display_path: &str,
        notes: impl IntoIterator<Item = String>,
    ) -> Option<NodeId> {
        if display_path.split('/').any(str::is_empty) {
            return None;
        }
        let mut parent: Option<NodeId> = None;
        let mut prefix_end = 0usize;

        for (index, segment) in display_path.split('/').enumerate() {
            prefix_end += segment.len() + usize::from(index > 0);
            let display_prefix = &display_path[..prefix_end];
            let key = tag_key(display_prefix);

            let id = match self.by_path.get(&key) {
                Some(id) => *id,
                None => self.push_node(TagTreeNode {
                    name: segment.to_string(),
                    path: key,
                    display_path: display_prefix.to_string(),
                    children: Vec::new(),
                    notes_with_tag: BTreeSet::new(),
                    parent,
                }),
            };
            parent = Some(id);
        }

        let leaf = parent?;
        self.nodes[leaf.index()].notes_with_tag.extend(notes);
        Some(leaf)
    }

    /// Appends a node and links it to its parent.
    pub(crate) fn push_node(&mut self, node: TagTreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        match node.parent {
            Some(parent) => self.nodes[parent.index()].children.push(id),
            None => self.roots.push(id),
        }
        self.by_path.insert(node.path.clone(), id);
        self.nodes.push(node);
        id
    }

    /// Removes `id`, which must be the most recently pushed node.
    pub(crate) fn pop_last(&mut self, id: NodeId) {
        debug_assert_eq!(id.index() + 1, self.nodes.len());
        let Some(node) = self.nodes.pop() else {
            return;
        };
        let siblings = match node.parent {
            Some(parent) => &mut self.nodes[parent.index()].children,
            None => &mut self.roots,
        };
        siblings.retain(|sibling| *sibling != id);
        self.by_path.remove(&node.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|path| path.to_string()).collect()
    }

    #[test]
    fn insert_synthesizes_ancestors_without_notes() {
        let mut tree = TagTree::new();
        tree.insert_tag("Proj/Sub/Leaf", notes(&["a.md"]));

        let proj = tree.find("proj").expect("ancestor");
        assert!(tree.node(proj).notes_with_tag.is_empty());
        assert_eq!(tree.node(proj).name, "Proj");

        let leaf = tree.find("PROJ/sub/leaf").expect("leaf");
        let node = tree.node(leaf);
        assert_eq!(node.display_path, "Proj/Sub/Leaf");
        assert_eq!(node.path, "proj/sub/leaf");
        assert_eq!(node.notes_with_tag.len(), 1);
    }

    #[test]
    fn first_casing_wins_and_notes_merge() {
        let mut tree = TagTree::new();
        tree.insert_tag("Proj", notes(&["a.md"]));
        tree.insert_tag("PROJ", notes(&["b.md"]));
        assert_eq!(tree.len(), 1);
        let node = tree.node(tree.find("proj").expect("node"));
        assert_eq!(node.display_path, "Proj");
        assert_eq!(node.notes_with_tag.len(), 2);
    }

    #[test]
    fn traversal_and_subtree_notes() {
        let mut tree = TagTree::new();
        tree.insert_tag("a", notes(&["1.md"]));
        tree.insert_tag("a/b", notes(&["1.md", "2.md"]));
        tree.insert_tag("c", notes(&["3.md"]));

        assert_eq!(tree.collect_all_tag_paths(), vec!["a", "a/b", "c"]);
        let a = tree.find("a").expect("a");
        assert_eq!(tree.subtree_notes(a).len(), 2);
    }

    #[test]
    fn generations_are_unique() {
        assert_ne!(TagTree::new().generation(), TagTree::new().generation());
    }

    #[test]
    fn empty_segments_are_rejected() {
        let mut tree = TagTree::new();
        assert!(tree.insert_tag("a//b", notes(&["x.md"])).is_none());
        assert!(tree.is_empty());
    }
}
