//! Memoized subtree note counts.

use fnv::FnvHashMap;

use super::tree::{NodeId, TagTree};

/// Caches [`TagTree::subtree_notes`] sizes for one tree at a time.
///
/// Entries are keyed by node id and dropped wholesale as soon as a tree of
/// another generation is queried.
#[derive(Debug, Default)]
pub struct NoteCountCache {
    generation: Option<u64>,
    counts: FnvHashMap<NodeId, usize>,
}

impl NoteCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct documents tagged at `id` or below. A document
    /// tagged at several levels of the subtree counts once.
    pub fn total_note_count(&mut self, tree: &TagTree, id: NodeId) -> usize {
        if self.generation != Some(tree.generation()) {
            self.counts.clear();
            self.generation = Some(tree.generation());
        }
        *self
            .counts
            .entry(id)
            .or_insert_with(|| tree.subtree_notes(id).len())
    }

    /// Generation of the tree the cached counts belong to.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn invalidate(&mut self) {
        self.generation = None;
        self.counts.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &[&str])]) -> TagTree {
        let mut tree = TagTree::new();
        for (tag, notes) in entries {
            tree.insert_tag(tag, notes.iter().map(|note| note.to_string()));
        }
        tree
    }

    #[test]
    fn counts_union_of_subtree() {
        let tree = tree(&[("proj", &["b"]), ("proj/x", &["a", "b"]), ("proj/y", &["c"])]);
        let mut cache = NoteCountCache::new();
        let proj = tree.find("proj").expect("proj");
        assert_eq!(cache.total_note_count(&tree, proj), 3);
        assert_eq!(cache.cached_len(), 1);

        for id in tree.iter() {
            let total = cache.total_note_count(&tree, id);
            assert!(total >= tree.node(id).notes_with_tag.len());
        }
    }

    #[test]
    fn new_generation_invalidates_everything() {
        let first = tree(&[("a", &["1"])]);
        let second = tree(&[("a", &["1", "2"])]);
        let mut cache = NoteCountCache::new();

        let id = first.find("a").expect("a");
        assert_eq!(cache.total_note_count(&first, id), 1);
        // Same node id, different tree.
        assert_eq!(cache.total_note_count(&second, id), 2);
        assert_eq!(cache.cached_len(), 1);
    }
}
