//! Collection synchronization and the event loop.

use fnv::FnvHashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::NoteCache;
use crate::cancel::CancellationToken;
use crate::collection::{CollectionEvent, CollectionEventKind, DocumentCollection};
use crate::debounce::{DebounceAction, Debouncer};
use crate::diff::DiffCalculator;
use crate::error::{CacheError, Result};
use crate::filters::{is_path_in_excluded_folder, should_exclude_document, FolderPattern};
use crate::types::{ChangedFields, ContentChange, DocumentRef};

/// Paths applied to the store per write before yielding.
const SYNC_CHUNK_SIZE: usize = 500;

/// What one sync pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Documents handed to the content pipeline.
    pub queued: usize,
}

/// Which listed documents get their frontmatter checked against the
/// excluded properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ScopeCheck {
    /// Only documents that are new or changed since the last sync.
    Changed,
    /// Every document, after the exclusion settings changed.
    All,
}

impl NoteCache {
    /// Brings the store in line with the collection and queues derivation
    /// for everything that changed.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.sync_with(ScopeCheck::Changed).await
    }

    pub(super) async fn sync_with(&self, scope: ScopeCheck) -> Result<SyncReport> {
        if self.is_stopped() {
            return Ok(SyncReport::default());
        }
        let _lane = self.inner.sync_lane.lock().await;
        let token = self.inner.sync_cancel.token();

        let (folders, properties, content) = {
            let settings = self.inner.settings.read();
            (
                settings.folder_patterns(),
                settings.excluded_properties(),
                settings.content.clone(),
            )
        };
        let known = match scope {
            ScopeCheck::Changed => self.inner.store.snapshot_mtimes(),
            ScopeCheck::All => FnvHashMap::default(),
        };

        let collection = self.inner.collection.clone();
        let listing_token = token.clone();
        let listed = tokio::task::spawn_blocking(move || {
            list_in_scope(
                collection.as_ref(),
                &folders,
                &properties,
                &known,
                &listing_token,
            )
        })
        .await
        .map_err(|error| CacheError::Internal(format!("document listing task failed: {error}")))??;
        let Some(docs) = listed else {
            log::debug!("Sync cancelled while listing documents");
            return Ok(SyncReport::default());
        };

        let diff = DiffCalculator::compute(&docs, &self.inner.store);
        let mut report = SyncReport {
            added: diff.to_add.len(),
            updated: diff.to_update.len(),
            removed: diff.to_remove.len(),
            queued: 0,
        };

        for chunk in diff.chunks(SYNC_CHUNK_SIZE) {
            if token.is_cancelled() {
                return Ok(report);
            }
            let changes = self.inner.store.apply_diff(&chunk, &docs);
            self.inner.notifier.emit(changes);
            tokio::task::yield_now().await;
        }

        let changed: Vec<&str> = diff.changed_paths().collect();
        report.queued = self.inner.pipeline.queue(&changed, &content);
        report.queued += self.inner.pipeline.queue_pending(&content);

        if !diff.is_empty() {
            log::info!(
                "Synced {} documents: {} added, {} updated, {} removed, {} queued",
                docs.len(),
                report.added,
                report.updated,
                report.removed,
                report.queued
            );
        }
        Ok(report)
    }

    /// Applies one collection event right away, without debouncing.
    ///
    /// Renames move the cached record first so its derived content survives;
    /// every event then triggers a sync.
    pub async fn handle_event(&self, event: CollectionEvent) -> Result<SyncReport> {
        self.apply_rename(&event);
        self.sync_now().await
    }

    fn apply_rename(&self, event: &CollectionEvent) {
        let CollectionEventKind::Rename { from } = &event.kind else {
            return;
        };
        if self.inner.store.rename(from, &event.path) {
            log::debug!("Moved cached record {from} -> {}", event.path);
            self.inner.notifier.emit(vec![
                ContentChange::new(from.clone(), ChangedFields::REMOVED),
                ContentChange::new(
                    event.path.clone(),
                    ChangedFields::MTIME | ChangedFields::CONTENT,
                ),
            ]);
        }
    }

    async fn sync_logged(&self, reason: &str) {
        if let Err(error) = self.sync_now().await {
            log::warn!("Sync after {reason} failed: {error}");
        }
    }

    /// Consumes collection events. Structural events sync on the leading edge
    /// of a burst, modifications once the burst has settled.
    pub(super) async fn run_event_loop(self, mut events: mpsc::UnboundedReceiver<CollectionEvent>) {
        self.sync_logged("startup").await;
        self.rebuild_tag_tree_blocking().await;

        let scheduling = self.inner.settings.read().scheduling.clone();
        let mut structural = Debouncer::leading(scheduling.structural_debounce());
        let mut modified = Debouncer::trailing(scheduling.content_debounce());

        loop {
            let deadline = match (structural.next_deadline(), modified.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let scheduling = self.inner.settings.read().scheduling.clone();
                    structural.set_window(scheduling.structural_debounce());
                    modified.set_window(scheduling.content_debounce());

                    let now = Instant::now();
                    if event.is_structural() {
                        self.apply_rename(&event);
                        if structural.on_event(now) == DebounceAction::FireNow {
                            self.sync_logged("collection change").await;
                        }
                    } else {
                        modified.on_event(now);
                    }
                }
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    let structural_due = structural.poll(now);
                    let modified_due = modified.poll(now);
                    if structural_due || modified_due {
                        self.sync_logged("collection change").await;
                    }
                }
            }
        }
        log::debug!("Collection event stream closed");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Lists the collection and drops out-of-scope documents.
///
/// Frontmatter is read only for markdown documents that are not in `known`
/// with the same mtime; documents already cached unchanged were in scope at
/// the last check. Returns `None` when `token` is cancelled midway.
pub(super) fn list_in_scope(
    collection: &dyn DocumentCollection,
    folders: &[FolderPattern],
    excluded_properties: &[String],
    known: &FnvHashMap<String, i64>,
    token: &CancellationToken,
) -> Result<Option<Vec<DocumentRef>>> {
    let mut docs = collection.list_documents()?;
    docs.retain(|doc| !is_path_in_excluded_folder(&doc.path, folders));
    if excluded_properties.is_empty() {
        return Ok(Some(docs));
    }

    let mut in_scope = Vec::with_capacity(docs.len());
    for (index, doc) in docs.into_iter().enumerate() {
        if token.is_active_sparse(index).is_none() {
            return Ok(None);
        }
        if !doc.is_markdown() || known.get(&doc.path) == Some(&doc.mtime) {
            in_scope.push(doc);
            continue;
        }
        match collection.frontmatter(&doc.path) {
            Ok(frontmatter) => {
                if !should_exclude_document(frontmatter.as_ref(), excluded_properties) {
                    in_scope.push(doc);
                }
            }
            Err(error) => {
                log::debug!("Keeping {} in scope, frontmatter unreadable: {error}", doc.path);
                in_scope.push(doc);
            }
        }
    }
    Ok(Some(in_scope))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cancel::CancelTracker;
    use crate::collection::MemoryCollection;
    use crate::engine::tests::{fast_settings, vault};
    use crate::types::ContentKind;

    #[test]
    fn listing_applies_folder_and_property_exclusions() {
        let collection = MemoryCollection::new();
        collection.insert("Archive2023/old.md", "old", 1);
        collection.insert("notes/private.md", "---\nprivate: true\n---\nx", 1);
        collection.insert("notes/public.md", "---\ntitle: a\n---\nx", 1);
        collection.insert("notes/broken.md", "---\n[bad\n---\nx", 1);
        collection.insert("notes/image.png", "", 1);

        let folders = FolderPattern::parse_list(&["Archive*"]);
        let listed = list_in_scope(
            &collection,
            &folders,
            &["private".to_string()],
            &FnvHashMap::default(),
            &CancellationToken::noop(),
        )
        .expect("list")
        .expect("not cancelled");
        let paths: Vec<&str> = listed.iter().map(|doc| doc.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["notes/broken.md", "notes/image.png", "notes/public.md"]
        );
    }

    #[test]
    fn unchanged_known_documents_skip_the_frontmatter_check() {
        let collection = MemoryCollection::new();
        collection.insert("a.md", "---\nprivate: true\n---\n", 3);
        let mut known = FnvHashMap::default();
        known.insert("a.md".to_string(), 3);

        let props = ["private".to_string()];
        let token = CancellationToken::noop();
        let listed = list_in_scope(&collection, &[], &props, &known, &token)
            .expect("list")
            .expect("not cancelled");
        assert_eq!(listed.len(), 1);

        let listed = list_in_scope(&collection, &[], &props, &FnvHashMap::default(), &token)
            .expect("list")
            .expect("not cancelled");
        assert!(listed.is_empty());
    }

    #[test]
    fn cancelled_listing_returns_none() {
        let collection = MemoryCollection::new();
        collection.insert("a.md", "x", 1);
        let tracker = CancelTracker::new();
        let token = tracker.token();
        tracker.cancel_all();
        let listed = list_in_scope(
            &collection,
            &[],
            &["private".to_string()],
            &FnvHashMap::default(),
            &token,
        )
        .expect("list");
        assert!(listed.is_none());
    }

    #[tokio::test]
    async fn sync_reports_and_queues_without_running_pipeline() {
        let collection = vault(&[("a.md", "#a"), ("b.md", "#b")]);
        let cache = NoteCache::new(collection.clone(), fast_settings(), None);

        let report = cache.sync_now().await.expect("sync");
        assert_eq!(report.added, 2);
        assert_eq!(report.queued, 2);
        assert_eq!(cache.paths_needing_content(ContentKind::Tags), vec!["a.md", "b.md"]);

        collection.remove("b.md");
        collection.insert("a.md", "#a2", 5);
        let report = cache.sync_now().await.expect("sync");
        assert_eq!((report.added, report.updated, report.removed), (0, 1, 1));
        assert_eq!(cache.get("a.md").expect("record").mtime, 5);
        assert!(cache.get("b.md").is_none());

        let report = cache.sync_now().await.expect("sync");
        assert_eq!((report.added, report.updated, report.removed), (0, 0, 0));
    }

    #[tokio::test]
    async fn handle_event_renames_before_syncing() {
        let collection = vault(&[("a.md", "#a")]);
        let cache = NoteCache::new(collection.clone(), fast_settings(), None);
        cache.sync_now().await.expect("sync");

        let removed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = removed.clone();
        let _subscription = cache.on_content_change(move |changes| {
            seen.lock().extend(
                changes
                    .iter()
                    .filter(|change| change.changed_fields.contains(ChangedFields::REMOVED))
                    .map(|change| change.path.clone()),
            );
        });

        collection.rename("a.md", "b.md");
        let report = cache
            .handle_event(CollectionEvent::rename("a.md", "b.md"))
            .await
            .expect("sync");
        assert_eq!((report.added, report.removed), (0, 0));
        assert!(cache.get("b.md").is_some());
        assert_eq!(*removed.lock(), vec!["a.md".to_string()]);
    }

    #[tokio::test]
    async fn sync_after_stop_is_a_no_op() {
        let collection = vault(&[("a.md", "x")]);
        let cache = NoteCache::new(collection, fast_settings(), None);
        cache.stop();
        let report = cache.sync_now().await.expect("sync");
        assert_eq!(report, SyncReport::default());
        assert!(cache.is_empty());
    }
}
