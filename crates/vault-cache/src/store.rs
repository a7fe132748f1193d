//! Path-keyed store of per-document cached state.
//!
//! The store is the single source of truth for reads. Every read-modify-write
//! happens inside one write-lock scope with no await point, so a reader never
//! observes a record halfway through an update.

mod persistence;
mod record;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::RwLock;

use crate::diff::DiffResult;
use crate::error::Result;
use crate::types::{ChangedFields, ContentChange, ContentKind, DocumentRef};

pub use persistence::{
    load_snapshot, write_snapshot, LoadedSnapshot, RECORD_STORE_VERSION, SNAPSHOT_FILENAME,
};
pub use record::{ContentUpdate, FileRecord};

#[derive(Debug, Default)]
pub struct FileRecordStore {
    records: RwLock<FnvHashMap<String, FileRecord>>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl FileRecordStore {
    /// A store that is never persisted.
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Opens the store backed by the snapshot at `snapshot_path`.
    ///
    /// A missing or outdated snapshot yields an empty store. A snapshot that
    /// cannot be read degrades to an empty in-memory cache; the next flush
    /// overwrites it.
    pub fn open(snapshot_path: Option<PathBuf>) -> Self {
        let Some(path) = snapshot_path else {
            return Self::new_in_memory();
        };
        let records = match load_snapshot(&path) {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Loaded {} cached records from {}",
                    snapshot.records.len(),
                    path.display()
                );
                snapshot.records
            }
            Ok(None) => FnvHashMap::default(),
            Err(error) => {
                log::warn!("Record snapshot unusable, starting with an empty cache: {error}");
                FnvHashMap::default()
            }
        };
        Self {
            records: RwLock::new(records),
            snapshot_path: Some(path),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn get(&self, path: &str) -> Option<FileRecord> {
        self.records.read().get(path).cloned()
    }

    /// Returns the records that exist among `paths`.
    pub fn get_many<S: AsRef<str>>(&self, paths: &[S]) -> FnvHashMap<String, FileRecord> {
        let records = self.records.read();
        paths
            .iter()
            .filter_map(|path| {
                let path = path.as_ref();
                records
                    .get(path)
                    .map(|record| (path.to_string(), record.clone()))
            })
            .collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.read().contains_key(path)
    }

    pub fn upsert_many(&self, entries: impl IntoIterator<Item = (String, FileRecord)>) {
        let mut records = self.records.write();
        let mut touched = false;
        for (path, record) in entries {
            records.insert(path, record);
            touched = true;
        }
        if touched {
            self.mark_dirty();
        }
    }

    /// Removes `paths`, returning the ones that were present.
    pub fn remove_many<S: AsRef<str>>(&self, paths: &[S]) -> Vec<String> {
        let mut records = self.records.write();
        let removed: Vec<String> = paths
            .iter()
            .filter_map(|path| {
                let path = path.as_ref();
                records.remove(path).map(|_| path.to_string())
            })
            .collect();
        if !removed.is_empty() {
            self.mark_dirty();
        }
        removed
    }

    /// Sorted paths whose `kind` field is still pending.
    pub fn paths_needing_content(&self, kind: ContentKind) -> Vec<String> {
        let mut paths: Vec<String> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.is_pending(kind))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Resets `kind` to pending across all records. Returns the paths whose
    /// value was actually cleared.
    pub fn batch_clear_field(&self, kind: ContentKind) -> Vec<String> {
        let mut records = self.records.write();
        let mut cleared: Vec<String> = records
            .iter_mut()
            .filter_map(|(path, record)| record.clear(kind).then(|| path.clone()))
            .collect();
        if !cleared.is_empty() {
            self.mark_dirty();
        }
        cleared.sort_unstable();
        cleared
    }

    /// Applies a diff computed against this store.
    ///
    /// Updated records get their new mtime and have every derived field reset
    /// in the same lock scope. `docs` supplies the timestamps for added and
    /// updated paths.
    pub fn apply_diff(&self, diff: &DiffResult, docs: &[DocumentRef]) -> Vec<ContentChange> {
        if diff.is_empty() {
            return Vec::new();
        }
        let by_path: FnvHashMap<&str, &DocumentRef> =
            docs.iter().map(|doc| (doc.path.as_str(), doc)).collect();

        let mut changes = Vec::with_capacity(diff.len());
        let mut records = self.records.write();

        for path in &diff.to_add {
            let Some(doc) = by_path.get(path.as_str()) else {
                continue;
            };
            records.insert(path.clone(), FileRecord::new(doc));
            changes.push(ContentChange::new(
                path.clone(),
                ChangedFields::MTIME | ChangedFields::CONTENT,
            ));
        }

        for path in &diff.to_update {
            let Some(doc) = by_path.get(path.as_str()) else {
                continue;
            };
            match records.get_mut(path) {
                Some(record) => record.touch(doc),
                None => {
                    records.insert(path.clone(), FileRecord::new(doc));
                }
            }
            changes.push(ContentChange::new(
                path.clone(),
                ChangedFields::MTIME | ChangedFields::CONTENT,
            ));
        }

        for path in &diff.to_remove {
            if records.remove(path).is_some() {
                changes.push(ContentChange::new(path.clone(), ChangedFields::REMOVED));
            }
        }

        if !changes.is_empty() {
            self.mark_dirty();
        }
        changes
    }

    /// Writes derived content for `path`.
    ///
    /// The write is dropped when the record is gone or its mtime no longer
    /// matches `expected_mtime`, since the content was derived from an older
    /// version of the document. Returns the fields that changed.
    pub fn apply_content(
        &self,
        path: &str,
        expected_mtime: i64,
        update: ContentUpdate,
    ) -> Option<ChangedFields> {
        if update.is_empty() {
            return Some(ChangedFields::empty());
        }
        let mut records = self.records.write();
        let record = records.get_mut(path)?;
        if record.mtime != expected_mtime {
            return None;
        }
        let changed = update.apply_to(record);
        if !changed.is_empty() {
            self.mark_dirty();
        }
        Some(changed)
    }

    /// Moves the record at `from` to `to`, keeping its derived content.
    /// Returns false when there was nothing to move.
    pub fn rename(&self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        let mut records = self.records.write();
        let Some(record) = records.remove(from) else {
            return false;
        };
        records.insert(to.to_string(), record);
        self.mark_dirty();
        true
    }

    /// Path to mtime for every record, used for diffing.
    pub fn snapshot_mtimes(&self) -> FnvHashMap<String, i64> {
        self.records
            .read()
            .iter()
            .map(|(path, record)| (path.clone(), record.mtime))
            .collect()
    }

    pub fn paths(&self) -> FnvHashSet<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Visits every record under the read lock.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &FileRecord)) {
        for (path, record) in self.records.read().iter() {
            visit(path, record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Writes the snapshot if one is configured.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.as_deref() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        // Clear before cloning so writes racing with the flush mark the
        // store dirty again.
        self.dirty.store(false, Ordering::Release);
        let records = self.records.read().clone();
        if let Err(error) = write_snapshot(path, &records) {
            self.mark_dirty();
            return Err(error);
        }
        Ok(())
    }

    /// Flushes only when something changed since the last flush.
    pub fn flush_if_dirty(&self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffCalculator;
    use crate::types::Derived;

    fn docs(entries: &[(&str, i64)]) -> Vec<DocumentRef> {
        entries
            .iter()
            .map(|(path, mtime)| DocumentRef::new(*path, *mtime))
            .collect()
    }

    fn seeded(entries: &[(&str, i64)]) -> (FileRecordStore, Vec<DocumentRef>) {
        let store = FileRecordStore::new_in_memory();
        let docs = docs(entries);
        let diff = DiffCalculator::compute(&docs, &store);
        store.apply_diff(&diff, &docs);
        (store, docs)
    }

    fn tags_update(tags: &[&str]) -> ContentUpdate {
        ContentUpdate {
            tags: Some(tags.iter().map(|tag| tag.to_string()).collect()),
            ..ContentUpdate::default()
        }
    }

    #[test]
    fn apply_diff_adds_pending_records() {
        let (store, _) = seeded(&[("a.md", 1), ("b.md", 2)]);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.paths_needing_content(ContentKind::Tags),
            vec!["a.md".to_string(), "b.md".to_string()]
        );
        assert!(store.is_dirty());
    }

    #[test]
    fn update_resets_derived_fields_with_mtime() {
        let (store, _) = seeded(&[("a.md", 1)]);
        store.apply_content("a.md", 1, tags_update(&["x"]));
        assert!(store.paths_needing_content(ContentKind::Tags).is_empty());

        let next = docs(&[("a.md", 5)]);
        let diff = DiffCalculator::compute(&next, &store);
        let changes = store.apply_diff(&diff, &next);

        assert_eq!(changes.len(), 1);
        let record = store.get("a.md").expect("record");
        assert_eq!(record.mtime, 5);
        assert_eq!(record.tags, Derived::Pending);
    }

    #[test]
    fn removal_emits_removed_change() {
        let (store, _) = seeded(&[("a.md", 1), ("b.md", 1)]);
        let next = docs(&[("a.md", 1)]);
        let diff = DiffCalculator::compute(&next, &store);
        let changes = store.apply_diff(&diff, &next);
        assert_eq!(changes, vec![ContentChange::new("b.md", ChangedFields::REMOVED)]);
        assert!(store.get("b.md").is_none());
    }

    #[test]
    fn stale_content_write_is_dropped() {
        let (store, _) = seeded(&[("a.md", 1)]);
        assert_eq!(store.apply_content("a.md", 0, tags_update(&["x"])), None);
        assert_eq!(store.apply_content("gone.md", 1, tags_update(&["x"])), None);
        assert_eq!(
            store.apply_content("a.md", 1, tags_update(&["x"])),
            Some(ChangedFields::TAGS)
        );
    }

    #[test]
    fn batch_clear_reports_only_cleared_paths() {
        let (store, _) = seeded(&[("a.md", 1), ("b.md", 1)]);
        store.apply_content(
            "a.md",
            1,
            ContentUpdate {
                preview: Some("hello".into()),
                ..ContentUpdate::default()
            },
        );
        assert_eq!(
            store.batch_clear_field(ContentKind::Preview),
            vec!["a.md".to_string()]
        );
        assert_eq!(store.paths_needing_content(ContentKind::Preview).len(), 2);
    }

    #[test]
    fn rename_keeps_derived_content() {
        let (store, _) = seeded(&[("a.md", 1)]);
        store.apply_content("a.md", 1, tags_update(&["x"]));
        assert!(store.rename("a.md", "dir/b.md"));
        assert!(store.get("a.md").is_none());
        let record = store.get("dir/b.md").expect("moved");
        assert_eq!(record.tags(), Some(&["x".to_string()][..]));
        assert!(!store.rename("missing.md", "other.md"));
    }

    #[test]
    fn get_many_skips_unknown_paths() {
        let (store, _) = seeded(&[("a.md", 1), ("b.md", 1)]);
        let found = store.get_many(&["a.md", "zzz.md"]);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a.md"));
    }

    #[test]
    fn flush_and_reopen_round_trip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(SNAPSHOT_FILENAME);

        let store = FileRecordStore::open(Some(path.clone()));
        assert!(store.is_empty());
        let docs = docs(&[("a.md", 7)]);
        let diff = DiffCalculator::compute(&docs, &store);
        store.apply_diff(&diff, &docs);
        store.apply_content("a.md", 7, tags_update(&["proj"]));
        assert!(store.flush_if_dirty().expect("flush"));
        assert!(!store.flush_if_dirty().expect("clean"));

        let reopened = FileRecordStore::open(Some(path));
        assert_eq!(reopened.get("a.md"), store.get("a.md"));
        // The reloaded store diffs clean against the same listing.
        assert!(DiffCalculator::compute(&docs, &reopened).is_empty());
    }

    #[test]
    fn corrupt_snapshot_degrades_to_empty_store() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(SNAPSHOT_FILENAME);
        std::fs::write(&path, b"garbage").expect("write");

        let store = FileRecordStore::open(Some(path));
        assert!(store.is_empty());
        store.upsert_many([(
            "a.md".to_string(),
            FileRecord::new(&DocumentRef::new("a.md", 1)),
        )]);
        store.flush().expect("flush overwrites the corrupt snapshot");
    }
}
