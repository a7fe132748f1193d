//! Background derivation of record content.
//!
//! Paths are queued into a bounded, deduplicated queue drained by a single
//! tokio task. Each chunk is derived on the blocking pool, written back into
//! the store and announced as one notifier batch. Writes are checked against
//! the mtime the derivation started from, so content derived from an older
//! version of a document is never stored.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::feature_image::feature_image_from_frontmatter;
use super::frontmatter::{split_frontmatter, Frontmatter};
use super::metadata::extract_metadata;
use super::preview::{extract_preview_text, PreviewOptions};
use super::tags::extract_tags;
use crate::cancel::{CancelTracker, CancellationToken};
use crate::collection::DocumentCollection;
use crate::error::{CacheError, Result};
use crate::notifier::ChangeNotifier;
use crate::settings::{ContentSettings, SchedulingSettings};
use crate::store::{ContentUpdate, FileRecordStore};
use crate::types::{ContentChange, ContentKind};

#[derive(Clone)]
pub struct ContentPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    store: Arc<FileRecordStore>,
    notifier: ChangeNotifier,
    collection: Arc<dyn DocumentCollection>,
    queue: Mutex<WorkQueue>,
    wake: Notify,
    idle: Notify,
    cancel: CancelTracker,
    in_flight: AtomicUsize,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct WorkQueue {
    paths: VecDeque<String>,
    queued: FnvHashSet<String>,
    settings: ContentSettings,
    batch_size: usize,
    capacity: usize,
    /// Set when a push was refused for lack of room. The worker sweeps the
    /// store for pending records once the queue drains.
    overflowed: bool,
}

impl WorkQueue {
    fn push(&mut self, path: &str) -> bool {
        if self.queued.contains(path) {
            return false;
        }
        if self.paths.len() >= self.capacity {
            self.overflowed = true;
            return false;
        }
        self.queued.insert(path.to_string());
        self.paths.push_back(path.to_string());
        true
    }

    fn take_batch(&mut self) -> Vec<String> {
        let count = self.batch_size.min(self.paths.len());
        let batch: Vec<String> = self.paths.drain(..count).collect();
        for path in &batch {
            self.queued.remove(path);
        }
        batch
    }

    fn clear(&mut self) {
        self.paths.clear();
        self.queued.clear();
        self.overflowed = false;
    }
}

/// What the worker should do next.
enum NextWork {
    Batch(Vec<String>, ContentSettings),
    Sweep(ContentSettings),
    Idle,
}

/// One document scheduled for derivation.
struct Job {
    path: String,
    mtime: i64,
    is_markdown: bool,
    kinds: Vec<ContentKind>,
}

impl ContentPipeline {
    pub fn new(
        store: Arc<FileRecordStore>,
        notifier: ChangeNotifier,
        collection: Arc<dyn DocumentCollection>,
        scheduling: &SchedulingSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store,
                notifier,
                collection,
                queue: Mutex::new(WorkQueue {
                    paths: VecDeque::new(),
                    queued: FnvHashSet::default(),
                    settings: ContentSettings::default(),
                    batch_size: scheduling.pipeline_batch_size.max(1),
                    capacity: scheduling.pipeline_queue_capacity.max(1),
                    overflowed: false,
                }),
                wake: Notify::new(),
                idle: Notify::new(),
                cancel: CancelTracker::new(),
                in_flight: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawns the worker task. Must be called inside a tokio runtime; later
    /// calls are no-ops.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let token = self.inner.cancel.token();
        *worker = Some(tokio::spawn(run_worker(inner, token)));
    }

    /// Queues the documents among `paths` that still miss an enabled field.
    /// Returns how many were queued.
    pub fn queue<S: AsRef<str>>(&self, paths: &[S], settings: &ContentSettings) -> usize {
        if self.inner.stopped.load(Ordering::Acquire) {
            return 0;
        }
        self.inner.enqueue(paths, settings)
    }

    /// Queues every record still pending an enabled field.
    pub fn queue_pending(&self, settings: &ContentSettings) -> usize {
        if self.inner.stopped.load(Ordering::Acquire) {
            return 0;
        }
        let paths = self.inner.pending_paths(settings);
        self.inner.enqueue(&paths, settings)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().paths.len()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Resolves once the queue is drained and no chunk is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() || self.inner.stopped.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Stops the worker. Queued work is dropped and stays pending in the
    /// store. Safe to call repeatedly and from teardown paths.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel_all();
        self.inner.queue.lock().clear();
        self.inner.wake.notify_one();
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.abort();
        }
        self.inner.idle.notify_waiters();
        log::debug!("Content pipeline stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl PipelineInner {
    fn is_idle(&self) -> bool {
        // In-flight is raised under the queue lock, so read both under it.
        let queue = self.queue.lock();
        queue.paths.is_empty() && !queue.overflowed && self.in_flight.load(Ordering::Acquire) == 0
    }

    fn enqueue<S: AsRef<str>>(&self, paths: &[S], settings: &ContentSettings) -> usize {
        let kinds = settings.enabled_kinds();
        let mut queue = self.queue.lock();
        queue.settings = settings.clone();
        if kinds.is_empty() {
            return 0;
        }

        let records = self.store.get_many(paths);
        let mut queued = 0usize;
        let mut dropped = 0usize;
        for path in paths {
            let path = path.as_ref();
            let Some(record) = records.get(path) else {
                continue;
            };
            if !kinds.iter().any(|kind| record.is_pending(*kind)) {
                continue;
            }
            if queue.push(path) {
                queued += 1;
            } else if !queue.queued.contains(path) {
                dropped += 1;
            }
        }
        drop(queue);

        if dropped > 0 {
            log::debug!("Content queue full, {dropped} documents left pending");
        }
        if queued > 0 {
            self.wake.notify_one();
        }
        queued
    }

    fn pending_paths(&self, settings: &ContentSettings) -> Vec<String> {
        let mut paths: Vec<String> = settings
            .enabled_kinds()
            .into_iter()
            .flat_map(|kind| self.store.paths_needing_content(kind))
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// Takes the next chunk, or a sweep when the drained queue had refused
    /// paths. Either is marked in flight under the queue lock.
    fn next_work(&self) -> NextWork {
        let mut queue = self.queue.lock();
        let batch = queue.take_batch();
        if !batch.is_empty() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return NextWork::Batch(batch, queue.settings.clone());
        }
        if std::mem::take(&mut queue.overflowed) {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return NextWork::Sweep(queue.settings.clone());
        }
        NextWork::Idle
    }

    fn jobs_for(&self, batch: &[String], settings: &ContentSettings) -> Vec<Job> {
        let kinds = settings.enabled_kinds();
        let records = self.store.get_many(batch);
        batch
            .iter()
            .filter_map(|path| {
                let record = records.get(path)?;
                let pending = record.pending_kinds(&kinds);
                (!pending.is_empty()).then(|| Job {
                    path: path.clone(),
                    mtime: record.mtime,
                    is_markdown: record.is_markdown(),
                    kinds: pending,
                })
            })
            .collect()
    }
}

async fn run_worker(inner: Arc<PipelineInner>, token: CancellationToken) {
    // Path and mtime of every job derived since the worker was last idle.
    // Sweeps skip records still at that mtime, so records that fail to
    // derive cannot starve the rest.
    let mut attempted: FnvHashMap<String, i64> = FnvHashMap::default();
    loop {
        if token.is_cancelled() {
            break;
        }
        match inner.next_work() {
            NextWork::Batch(batch, settings) => {
                let changes =
                    process_batch(&inner, &token, batch, settings, &mut attempted).await;
                inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                inner.notifier.emit(changes);
            }
            NextWork::Sweep(settings) => {
                let mut paths = inner.pending_paths(&settings);
                let records = inner.store.get_many(&paths);
                paths.retain(|path| {
                    records.get(path).map(|record| record.mtime) != attempted.get(path).copied()
                });
                if !paths.is_empty() {
                    let queued = inner.enqueue(&paths, &settings);
                    log::debug!("Requeued {queued} of {} pending documents", paths.len());
                }
                inner.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            NextWork::Idle => {
                attempted.clear();
                inner.idle.notify_waiters();
                inner.wake.notified().await;
                continue;
            }
        }

        if inner.is_idle() {
            inner.idle.notify_waiters();
        }
        tokio::task::yield_now().await;
    }
}

async fn process_batch(
    inner: &Arc<PipelineInner>,
    token: &CancellationToken,
    batch: Vec<String>,
    settings: ContentSettings,
    attempted: &mut FnvHashMap<String, i64>,
) -> Vec<ContentChange> {
    let jobs = inner.jobs_for(&batch, &settings);
    if jobs.is_empty() {
        return Vec::new();
    }
    attempted.extend(jobs.iter().map(|job| (job.path.clone(), job.mtime)));

    let collection = inner.collection.clone();
    let blocking_token = token.clone();
    let derived = tokio::task::spawn_blocking(move || {
        let mut derived = Vec::with_capacity(jobs.len());
        for job in jobs {
            if blocking_token.is_cancelled() {
                break;
            }
            let result = derive_document(
                collection.as_ref(),
                &job.path,
                job.is_markdown,
                &job.kinds,
                &settings,
            );
            derived.push((job, result));
        }
        derived
    })
    .await;

    let derived = match derived {
        Ok(derived) => derived,
        Err(error) => {
            log::error!("Content derivation task failed: {error}");
            return Vec::new();
        }
    };

    let mut changes = Vec::new();
    for (job, result) in derived {
        match result {
            Ok(update) => {
                if let Some(changed) = inner.store.apply_content(&job.path, job.mtime, update) {
                    if !changed.is_empty() {
                        changes.push(ContentChange::new(job.path, changed));
                    }
                }
            }
            Err(CacheError::DocumentNotFound(path)) => {
                log::debug!("Skipping content for {path}: document is gone");
            }
            Err(error) => {
                log::warn!("Failed to derive content for {}: {error}", job.path);
            }
        }
    }
    changes
}

/// Derives the requested `kinds` for one document.
///
/// Malformed frontmatter is logged and leaves the frontmatter-dependent
/// fields out of the update, so they stay pending; the preview is still
/// produced from the body.
pub fn derive_document(
    collection: &dyn DocumentCollection,
    path: &str,
    is_markdown: bool,
    kinds: &[ContentKind],
    settings: &ContentSettings,
) -> Result<ContentUpdate> {
    let wants = |kind: ContentKind| kinds.contains(&kind);
    let mut update = ContentUpdate::default();

    if !is_markdown {
        if wants(ContentKind::Tags) {
            update.tags = Some(Vec::new());
        }
        if wants(ContentKind::Preview) {
            update.preview = Some(String::new());
        }
        if wants(ContentKind::FeatureImage) {
            update.feature_image = Some(None);
        }
        if wants(ContentKind::Metadata) {
            update.metadata = Some(extract_metadata(None, settings));
        }
        return Ok(update);
    }

    let text = collection.read_document(path)?;
    let (_, body) = split_frontmatter(&text);

    if wants(ContentKind::Preview) {
        update.preview = Some(extract_preview_text(
            &text,
            PreviewOptions {
                skip_headings: settings.skip_headings_in_preview,
                skip_non_text: settings.skip_non_text_in_preview,
            },
        ));
    }

    let frontmatter = match Frontmatter::from_document(path, &text) {
        Ok(frontmatter) => frontmatter,
        Err(error) => {
            log::warn!("{error}");
            return Ok(update);
        }
    };

    if wants(ContentKind::Tags) {
        update.tags = Some(extract_tags(frontmatter.as_ref(), body));
    }
    if wants(ContentKind::FeatureImage) {
        let image = frontmatter
            .as_ref()
            .and_then(|frontmatter| {
                feature_image_from_frontmatter(frontmatter, &settings.feature_image_properties)
            })
            .or_else(|| collection.scan_feature_image(path, body));
        update.feature_image = Some(image);
    }
    if wants(ContentKind::Metadata) {
        update.metadata = Some(extract_metadata(frontmatter.as_ref(), settings));
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::diff::DiffCalculator;
    use crate::types::Derived;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        store: Arc<FileRecordStore>,
        notifier: ChangeNotifier,
        collection: Arc<MemoryCollection>,
        pipeline: ContentPipeline,
    }

    fn fixture(documents: &[(&str, &str)]) -> Fixture {
        fixture_with(
            documents,
            SchedulingSettings {
                pipeline_batch_size: 2,
                ..SchedulingSettings::default()
            },
        )
    }

    fn fixture_with(documents: &[(&str, &str)], scheduling: SchedulingSettings) -> Fixture {
        let collection = Arc::new(MemoryCollection::new());
        for (path, text) in documents {
            collection.insert(*path, *text, 1);
        }
        let store = Arc::new(FileRecordStore::new_in_memory());
        let docs = collection.list_documents().expect("list");
        store.apply_diff(&DiffCalculator::compute(&docs, &store), &docs);

        let notifier = ChangeNotifier::default();
        let pipeline = ContentPipeline::new(
            store.clone(),
            notifier.clone(),
            collection.clone(),
            &scheduling,
        );
        Fixture {
            store,
            notifier,
            collection,
            pipeline,
        }
    }

    async fn drain(pipeline: &ContentPipeline) {
        timeout(Duration::from_secs(5), pipeline.wait_idle())
            .await
            .expect("pipeline drained");
    }

    #[tokio::test]
    async fn derives_all_enabled_fields() {
        let fx = fixture(&[(
            "a.md",
            "---\ntags: [proj/x]\nthumbnail: '[[cover.png]]'\n---\n# Title\nBody with #inline tag\n",
        )]);
        fx.pipeline.start();
        assert_eq!(fx.pipeline.queue_pending(&ContentSettings::default()), 1);
        drain(&fx.pipeline).await;

        let record = fx.store.get("a.md").expect("record");
        assert_eq!(
            record.tags,
            Derived::Present(vec!["proj/x".to_string(), "inline".to_string()])
        );
        assert_eq!(
            record.preview,
            Derived::Present("Title Body with #inline tag".to_string())
        );
        assert_eq!(record.feature_image, Derived::Present("cover.png".to_string()));
        // Metadata is disabled by default.
        assert!(record.metadata.is_pending());
        fx.pipeline.stop();
    }

    #[tokio::test]
    async fn emits_one_batch_per_chunk() {
        let fx = fixture(&[("a.md", "a"), ("b.md", "b"), ("c.md", "c")]);
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let _subscription = fx
            .notifier
            .on_content_change(move |changes| sink.lock().push(changes.len()));

        fx.pipeline.start();
        fx.pipeline.queue(&["a.md", "b.md", "c.md"], &ContentSettings::default());
        drain(&fx.pipeline).await;

        assert_eq!(*batches.lock(), vec![2, 1]);
        assert!(fx.store.paths_needing_content(ContentKind::Preview).is_empty());
    }

    #[tokio::test]
    async fn malformed_frontmatter_keeps_fields_pending() {
        let fx = fixture(&[("bad.md", "---\ntags: [unclosed\n---\nStill readable\n")]);
        fx.pipeline.start();
        fx.pipeline.queue_pending(&ContentSettings::default());
        drain(&fx.pipeline).await;

        let record = fx.store.get("bad.md").expect("record");
        assert!(record.tags.is_pending());
        assert!(record.feature_image.is_pending());
        assert_eq!(record.preview, Derived::Present("Still readable".to_string()));
    }

    #[tokio::test]
    async fn non_markdown_documents_get_empty_content() {
        let fx = fixture(&[("img.png", "")]);
        fx.pipeline.start();
        fx.pipeline.queue_pending(&ContentSettings::default());
        drain(&fx.pipeline).await;

        let record = fx.store.get("img.png").expect("record");
        assert_eq!(record.tags, Derived::Present(Vec::new()));
        assert_eq!(record.feature_image, Derived::Absent);
    }

    #[tokio::test]
    async fn content_from_outdated_mtime_is_discarded() {
        let fx = fixture(&[("a.md", "#old")]);
        // The document changes after its job captured mtime 1.
        let jobs = fx.pipeline.inner.jobs_for(&["a.md".to_string()], &ContentSettings::default());
        fx.collection.insert("a.md", "#new", 2);
        let docs = fx.collection.list_documents().expect("list");
        fx.store
            .apply_diff(&DiffCalculator::compute(&docs, &fx.store), &docs);

        let update = derive_document(
            &*fx.collection,
            &jobs[0].path,
            true,
            &jobs[0].kinds,
            &ContentSettings::default(),
        )
        .expect("derive");
        assert_eq!(fx.store.apply_content("a.md", jobs[0].mtime, update), None);
        assert!(fx.store.get("a.md").expect("record").tags.is_pending());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_leaves_work_pending() {
        let fx = fixture(&[("a.md", "a"), ("b.md", "b")]);
        fx.pipeline.stop();
        fx.pipeline.stop();
        assert!(fx.pipeline.is_stopped());

        fx.pipeline.start();
        assert_eq!(fx.pipeline.queue_pending(&ContentSettings::default()), 0);
        fx.pipeline.wait_idle().await;
        assert_eq!(fx.store.paths_needing_content(ContentKind::Tags).len(), 2);
    }

    #[tokio::test]
    async fn disabled_kinds_are_not_derived() {
        let fx = fixture(&[("a.md", "text #tag")]);
        let settings = ContentSettings {
            show_tags: false,
            show_feature_image: false,
            ..ContentSettings::default()
        };
        fx.pipeline.start();
        fx.pipeline.queue_pending(&settings);
        drain(&fx.pipeline).await;

        let record = fx.store.get("a.md").expect("record");
        assert!(record.tags.is_pending());
        assert!(!record.preview.is_pending());

        // Nothing left to do for the enabled kinds.
        assert_eq!(fx.pipeline.queue(&["a.md"], &settings), 0);
    }

    fn tiny_queue() -> SchedulingSettings {
        SchedulingSettings {
            pipeline_batch_size: 1,
            pipeline_queue_capacity: 2,
            ..SchedulingSettings::default()
        }
    }

    #[tokio::test]
    async fn documents_refused_by_a_full_queue_are_swept_later() {
        let documents: Vec<(String, String)> = (0..5)
            .map(|n| (format!("n{n}.md"), format!("note {n} #t{n}")))
            .collect();
        let documents: Vec<(&str, &str)> = documents
            .iter()
            .map(|(path, text)| (path.as_str(), text.as_str()))
            .collect();
        let fx = fixture_with(&documents, tiny_queue());
        fx.pipeline.start();

        assert_eq!(fx.pipeline.queue_pending(&ContentSettings::default()), 2);
        assert!(!fx.pipeline.is_idle());
        drain(&fx.pipeline).await;

        for kind in [ContentKind::Tags, ContentKind::Preview, ContentKind::FeatureImage] {
            assert!(fx.store.paths_needing_content(kind).is_empty(), "{kind:?}");
        }
        assert_eq!(
            fx.store.get("n4.md").expect("record").tags,
            Derived::Present(vec!["t4".to_string()])
        );
        fx.pipeline.stop();
    }

    #[tokio::test]
    async fn sweeps_stop_once_nothing_more_derives() {
        let fx = fixture_with(
            &[
                ("a.md", "---\ntags: [unclosed\n---\na"),
                ("b.md", "---\ntags: [unclosed\n---\nb"),
                ("c.md", "---\ntags: [unclosed\n---\nc"),
            ],
            tiny_queue(),
        );
        fx.pipeline.start();
        fx.pipeline.queue_pending(&ContentSettings::default());
        drain(&fx.pipeline).await;

        assert!(fx.store.paths_needing_content(ContentKind::Preview).is_empty());
        assert_eq!(fx.store.paths_needing_content(ContentKind::Tags).len(), 3);
        assert!(fx.pipeline.is_idle());
        fx.pipeline.stop();
    }
}
