//! The owning cache context.
//!
//! A [`NoteCache`] ties the record store, the change notifier, the content
//! pipeline and the published tag tree to one document collection. It is
//! cheap to clone; every clone drives the same instance.
//!
//! Background work (the collection event loop, the periodic snapshot flush
//! and tag tree rebuilds) runs as tokio tasks spawned by [`NoteCache::start`]
//! and torn down by [`NoteCache::stop`].

mod mutations;
mod sync;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use notify::RecommendedWatcher;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cancel::CancelTracker;
use crate::collection::{create_collection_watcher, CollectionEvent, DocumentCollection};
use crate::content::ContentPipeline;
use crate::error::Result;
use crate::notifier::{ChangeBatch, ChangeNotifier, Subscription};
use crate::settings::{load_or_create_settings, settings_path, CacheSettings};
use crate::store::{FileRecord, FileRecordStore, SNAPSHOT_FILENAME};
use crate::tags::{
    exclude_from_tag_tree, NodeId, NoteCountCache, TagTree, TagTreeBuilder, TagTreeSnapshot,
};
use crate::types::{ContentChange, ContentKind, Derived};

pub use sync::SyncReport;

#[derive(Clone)]
pub struct NoteCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    collection: Arc<dyn DocumentCollection>,
    store: Arc<FileRecordStore>,
    notifier: ChangeNotifier,
    pipeline: ContentPipeline,
    settings: RwLock<CacheSettings>,
    /// Where settings changes are persisted, when the cache owns a directory.
    settings_path: Option<PathBuf>,
    tag_tree: watch::Sender<Arc<TagTreeSnapshot>>,
    /// One memo per live tree; a snapshot carries two trees.
    counts: Mutex<[NoteCountCache; 2]>,
    /// Serializes tag tree publishes so an older build never replaces a
    /// newer one.
    rebuild_lane: Mutex<()>,
    /// Serializes full syncs.
    sync_lane: tokio::sync::Mutex<()>,
    sync_cancel: CancelTracker,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl NoteCache {
    /// Creates a cache over `collection`.
    ///
    /// With a `snapshot_path` the record store is loaded from it and flushed
    /// back to it; without one the cache lives in memory only.
    pub fn new(
        collection: Arc<dyn DocumentCollection>,
        settings: CacheSettings,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self::build(collection, settings, snapshot_path, None)
    }

    /// Opens a cache whose settings file and record snapshot live in
    /// `cache_dir`. Missing settings are created with defaults.
    pub fn open(collection: Arc<dyn DocumentCollection>, cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let settings = load_or_create_settings(cache_dir)?;
        Ok(Self::build(
            collection,
            settings,
            Some(cache_dir.join(SNAPSHOT_FILENAME)),
            Some(settings_path(cache_dir)),
        ))
    }

    fn build(
        collection: Arc<dyn DocumentCollection>,
        settings: CacheSettings,
        snapshot_path: Option<PathBuf>,
        settings_path: Option<PathBuf>,
    ) -> Self {
        let store = Arc::new(FileRecordStore::open(snapshot_path));
        let notifier = ChangeNotifier::default();
        let pipeline = ContentPipeline::new(
            store.clone(),
            notifier.clone(),
            collection.clone(),
            &settings.scheduling,
        );
        let (tag_tree, _) = watch::channel(Arc::new(TagTreeSnapshot::default()));

        Self {
            inner: Arc::new(CacheInner {
                collection,
                store,
                notifier,
                pipeline,
                settings: RwLock::new(settings),
                settings_path,
                tag_tree,
                counts: Mutex::new([NoteCountCache::new(), NoteCountCache::new()]),
                rebuild_lane: Mutex::new(()),
                sync_lane: tokio::sync::Mutex::new(()),
                sync_cancel: CancelTracker::new(),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Starts background work: content derivation, tag tree rebuilds, the
    /// periodic snapshot flush and the loop consuming `events`. The loop
    /// begins with a full sync.
    ///
    /// Must be called inside a tokio runtime. Calls after the first one and
    /// calls after [`stop`](Self::stop) are ignored.
    pub fn start(&self, events: mpsc::UnboundedReceiver<CollectionEvent>) {
        if self.is_stopped() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pipeline.start();

        // Subscribe before the first sync so no tag change is missed.
        let changes = self.inner.notifier.subscribe();
        let handles = vec![
            tokio::spawn(self.clone().run_tag_tree_updates(changes)),
            tokio::spawn(self.clone().run_flush_worker()),
            tokio::spawn(self.clone().run_event_loop(events)),
        ];
        self.inner.tasks.lock().extend(handles);
        log::info!("Note cache started with {} cached records", self.inner.store.len());
    }

    /// Watches `root` on the filesystem and starts the cache with the
    /// resulting event stream. Keep the returned watcher alive for as long as
    /// events should be delivered.
    pub fn start_watching(&self, root: &Path) -> Result<RecommendedWatcher> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = create_collection_watcher(root, event_tx)?;
        self.start(event_rx);
        Ok(watcher)
    }

    /// Stops background work and flushes the store. Queued derivation is
    /// dropped and stays pending. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.sync_cancel.cancel_all();
        self.inner.pipeline.stop();
        for handle in self.inner.tasks.lock().drain(..) {
            handle.abort();
        }
        if let Err(error) = self.inner.store.flush_if_dirty() {
            log::warn!("Failed to flush note cache on stop: {error}");
        }
        log::info!("Note cache stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings.read().clone()
    }

    pub fn get(&self, path: &str) -> Option<FileRecord> {
        self.inner.store.get(path)
    }

    pub fn get_many<S: AsRef<str>>(&self, paths: &[S]) -> FnvHashMap<String, FileRecord> {
        self.inner.store.get_many(paths)
    }

    /// Whether a preview has been derived for `path` and is non-empty.
    pub fn has_preview(&self, path: &str) -> bool {
        self.inner.store.get(path).is_some_and(|record| {
            matches!(&record.preview, Derived::Present(text) if !text.is_empty())
        })
    }

    pub fn paths_needing_content(&self, kind: ContentKind) -> Vec<String> {
        self.inner.store.paths_needing_content(kind)
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Registers a synchronous change listener.
    pub fn on_content_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[ContentChange]) + Send + Sync + 'static,
    {
        self.inner.notifier.on_content_change(listener)
    }

    pub fn subscribe_changes(&self) -> tokio::sync::broadcast::Receiver<ChangeBatch> {
        self.inner.notifier.subscribe()
    }

    /// The most recently published tag trees.
    pub fn tag_tree(&self) -> Arc<TagTreeSnapshot> {
        self.inner.tag_tree.borrow().clone()
    }

    pub fn watch_tag_tree(&self) -> watch::Receiver<Arc<TagTreeSnapshot>> {
        self.inner.tag_tree.subscribe()
    }

    /// Distinct documents tagged at `id` or below in `tree`.
    pub fn total_note_count(&self, tree: &TagTree, id: NodeId) -> usize {
        let mut caches = self.inner.counts.lock();
        let slot = match caches
            .iter()
            .position(|cache| cache.generation() == Some(tree.generation()))
        {
            Some(slot) => slot,
            None => {
                // Evict the older memo.
                caches.rotate_left(1);
                caches.len() - 1
            }
        };
        caches[slot].total_note_count(tree, id)
    }

    /// Resolves once no content derivation is queued or running.
    pub async fn wait_idle(&self) {
        self.inner.pipeline.wait_idle().await;
    }

    /// Rebuilds both tag trees from the store and publishes them.
    pub fn rebuild_tag_tree(&self) {
        let _lane = self.inner.rebuild_lane.lock();
        let (folders, favorites, hidden) = {
            let settings = self.inner.settings.read();
            (
                settings.folder_patterns(),
                settings.favorite_tags.clone(),
                settings.hidden_tags.clone(),
            )
        };
        let mut snapshot = TagTreeBuilder::build(&self.inner.store, &folders, &favorites);
        if !hidden.is_empty() {
            snapshot.favorite_tree = exclude_from_tag_tree(&snapshot.favorite_tree, &hidden);
            snapshot.tag_tree = exclude_from_tag_tree(&snapshot.tag_tree, &hidden);
        }
        log::debug!(
            "Published tag trees: {} favorite nodes, {} nodes, {} untagged",
            snapshot.favorite_tree.len(),
            snapshot.tag_tree.len(),
            snapshot.untagged_count
        );
        self.inner.tag_tree.send_replace(Arc::new(snapshot));
    }

    async fn rebuild_tag_tree_blocking(&self) {
        let cache = self.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || cache.rebuild_tag_tree()).await {
            log::error!("Tag tree rebuild task failed: {error}");
        }
    }

    /// Rebuilds the tag trees whenever a batch touches tags. Bursts of
    /// batches collapse into one rebuild.
    async fn run_tag_tree_updates(
        self,
        mut changes: tokio::sync::broadcast::Receiver<ChangeBatch>,
    ) {
        loop {
            let mut rebuild = match changes.recv().await {
                Ok(batch) => touches_tags(&batch),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Tag tree updater lagged by {skipped} batches");
                    true
                }
                Err(RecvError::Closed) => break,
            };
            loop {
                match changes.try_recv() {
                    Ok(batch) => rebuild |= touches_tags(&batch),
                    Err(TryRecvError::Lagged(_)) => rebuild = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            if rebuild {
                self.rebuild_tag_tree_blocking().await;
            }
        }
    }

    async fn run_flush_worker(self) {
        let period = self.inner.settings.read().scheduling.flush_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = self.inner.store.clone();
            match tokio::task::spawn_blocking(move || store.flush_if_dirty()).await {
                Ok(Ok(true)) => {
                    tracing::debug!(records = self.inner.store.len(), "flushed record store")
                }
                Ok(Ok(false)) => {}
                Ok(Err(error)) => {
                    log::warn!("Record store flush failed, retrying next tick: {error}")
                }
                Err(error) => log::error!("Record store flush task failed: {error}"),
            }
        }
    }
}

fn touches_tags(batch: &[ContentChange]) -> bool {
    batch
        .iter()
        .any(|change| change.changed_fields.affects_tags())
}
