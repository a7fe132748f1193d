//! Live listing vs. store comparison.

use fnv::FnvHashSet;

use crate::store::FileRecordStore;
use crate::types::DocumentRef;

/// Paths to add, update and remove to bring the store in line with the
/// current document listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Paths with no record yet, in listing order.
    pub to_add: Vec<String>,
    /// Paths whose mtime differs from the stored one, in listing order.
    pub to_update: Vec<String>,
    /// Stored paths no longer listed, sorted.
    pub to_remove: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }

    /// Added and updated paths, the ones that need content derivation.
    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.to_add
            .iter()
            .chain(self.to_update.iter())
            .map(String::as_str)
    }

    /// Splits the diff into pieces of at most `size` paths each, adds first,
    /// then updates, then removals.
    pub fn chunks(&self, size: usize) -> Vec<DiffResult> {
        let size = size.max(1);
        let mut chunks = Vec::with_capacity(self.len().div_ceil(size));
        for part in self.to_add.chunks(size) {
            chunks.push(DiffResult {
                to_add: part.to_vec(),
                ..DiffResult::default()
            });
        }
        for part in self.to_update.chunks(size) {
            chunks.push(DiffResult {
                to_update: part.to_vec(),
                ..DiffResult::default()
            });
        }
        for part in self.to_remove.chunks(size) {
            chunks.push(DiffResult {
                to_remove: part.to_vec(),
                ..DiffResult::default()
            });
        }
        chunks
    }
}

pub struct DiffCalculator;

impl DiffCalculator {
    /// Compares `current` against the store.
    ///
    /// Paths are compared exactly. A path listed more than once is diffed
    /// once, using its first occurrence.
    pub fn compute(current: &[DocumentRef], store: &FileRecordStore) -> DiffResult {
        let stored = store.snapshot_mtimes();
        let mut seen: FnvHashSet<&str> =
            FnvHashSet::with_capacity_and_hasher(current.len(), Default::default());
        let mut diff = DiffResult::default();

        for doc in current {
            if !seen.insert(doc.path.as_str()) {
                continue;
            }
            match stored.get(&doc.path) {
                None => diff.to_add.push(doc.path.clone()),
                Some(mtime) if *mtime != doc.mtime => diff.to_update.push(doc.path.clone()),
                Some(_) => {}
            }
        }

        diff.to_remove = stored
            .into_keys()
            .filter(|path| !seen.contains(path.as_str()))
            .collect();
        diff.to_remove.sort_unstable();
        diff
    }
}
