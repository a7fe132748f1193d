//! The document collection the cache mirrors.

mod fs;
mod memory;
mod watcher;

pub use fs::FsCollection;
pub use memory::MemoryCollection;
pub use watcher::{create_collection_watcher, map_notify_event};

use crate::content::frontmatter::Frontmatter;
use crate::error::Result;
use crate::types::DocumentRef;

/// Access to the externally owned set of documents.
///
/// Paths are `/`-separated and relative to the collection root. Methods are
/// blocking; the engine calls them from blocking tasks.
pub trait DocumentCollection: Send + Sync {
    /// Lists every document currently in the collection.
    fn list_documents(&self) -> Result<Vec<DocumentRef>>;

    fn read_document(&self, path: &str) -> Result<String>;

    fn frontmatter(&self, path: &str) -> Result<Option<Frontmatter>> {
        let text = self.read_document(path)?;
        Frontmatter::from_document(path, &text)
    }

    /// Content-based feature image lookup, used when no frontmatter property
    /// names one.
    fn scan_feature_image(&self, _path: &str, _body: &str) -> Option<String> {
        None
    }

    /// Replaces the `tags` property of a document.
    fn write_tags(&self, path: &str, tags: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEventKind {
    Create,
    Delete,
    Rename { from: String },
    Modify,
}

/// A change reported by the collection's watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEvent {
    pub kind: CollectionEventKind,
    pub path: String,
}

impl CollectionEvent {
    pub fn create(path: impl Into<String>) -> Self {
        Self {
            kind: CollectionEventKind::Create,
            path: path.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: CollectionEventKind::Delete,
            path: path.into(),
        }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: CollectionEventKind::Rename { from: from.into() },
            path: to.into(),
        }
    }

    pub fn modify(path: impl Into<String>) -> Self {
        Self {
            kind: CollectionEventKind::Modify,
            path: path.into(),
        }
    }

    /// Create, delete and rename change the shape of the collection.
    pub fn is_structural(&self) -> bool {
        !matches!(self.kind, CollectionEventKind::Modify)
    }
}
