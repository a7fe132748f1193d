//! Filesystem watching for [`FsCollection`](super::FsCollection).
//!
//! The notify callback only translates events and sends them through a
//! channel; the engine loop is the sole consumer.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use super::fs::relative_path;
use super::CollectionEvent;
use crate::error::{canonicalize_existing_path, CacheError, Result};

/// Starts watching `root` recursively. Dropping the returned watcher stops
/// event delivery.
///
/// The root is canonicalized first; backends report resolved paths, which
/// would never match a root reached through a symlink.
pub fn create_collection_watcher(
    root: &Path,
    event_tx: UnboundedSender<CollectionEvent>,
) -> Result<RecommendedWatcher> {
    let root = canonicalize_existing_path(root.to_path_buf());
    let callback_root = root.clone();
    let mut watcher =
        recommended_watcher(move |event_result: notify::Result<Event>| match event_result {
            Ok(event) => {
                for event in map_notify_event(&callback_root, &event) {
                    if event_tx.send(event).is_err() {
                        // Receiver gone, the cache is shutting down.
                        return;
                    }
                }
            }
            Err(error) => {
                log::warn!("Collection watcher error: {error}");
            }
        })
        .map_err(|error| {
            CacheError::Internal(format!(
                "failed to create collection watcher for {}: {error}",
                root.display()
            ))
        })?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|error| {
            CacheError::Internal(format!("failed to watch {}: {error}", root.display()))
        })?;

    Ok(watcher)
}

/// Translates one notify event into collection events. Paths outside the
/// root or inside hidden folders are dropped.
pub fn map_notify_event(root: &Path, event: &Event) -> Vec<CollectionEvent> {
    let relative = |path: &PathBuf| relative_path(root, path);

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(CollectionEvent::create)
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(CollectionEvent::delete)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            match (relative(&event.paths[0]), relative(&event.paths[1])) {
                (Some(from), Some(to)) => vec![CollectionEvent::rename(from, to)],
                // Moved out of scope or into it.
                (Some(from), None) => vec![CollectionEvent::delete(from)],
                (None, Some(to)) => vec![CollectionEvent::create(to)],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(CollectionEvent::delete)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(CollectionEvent::create)
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(|path| {
                if root.join(&path).exists() {
                    CollectionEvent::create(path)
                } else {
                    CollectionEvent::delete(path)
                }
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .filter_map(relative)
            .map(CollectionEvent::modify)
            .collect(),
    }
}
