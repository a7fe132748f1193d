//! Per-document cached state.

use serde::{Deserialize, Serialize};

use crate::types::{
    file_stem_of, ChangedFields, ContentKind, Derived, DocumentMetadata, DocumentRef,
};

/// Cached state of one document, keyed by path in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Last observed modification time (ms), used only for diffing.
    pub mtime: i64,
    /// Creation time (ms), the fallback for a missing frontmatter date.
    pub ctime: i64,
    pub extension: String,
    pub tags: Derived<Vec<String>>,
    pub preview: Derived<String>,
    pub feature_image: Derived<String>,
    pub metadata: Derived<DocumentMetadata>,
}

impl FileRecord {
    /// A freshly detected document with every derived field pending.
    pub fn new(doc: &DocumentRef) -> Self {
        Self {
            mtime: doc.mtime,
            ctime: doc.ctime,
            extension: doc.extension.clone(),
            tags: Derived::Pending,
            preview: Derived::Pending,
            feature_image: Derived::Pending,
            metadata: Derived::Pending,
        }
    }

    pub fn is_markdown(&self) -> bool {
        self.extension == "md"
    }

    /// Records a new modification time and resets all derived content in
    /// the same step.
    pub fn touch(&mut self, doc: &DocumentRef) {
        self.mtime = doc.mtime;
        self.ctime = doc.ctime;
        self.extension = doc.extension.clone();
        self.reset_content();
    }

    pub fn reset_content(&mut self) {
        for kind in ContentKind::ALL {
            self.clear(kind);
        }
    }

    pub fn is_pending(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Tags => self.tags.is_pending(),
            ContentKind::Preview => self.preview.is_pending(),
            ContentKind::FeatureImage => self.feature_image.is_pending(),
            ContentKind::Metadata => self.metadata.is_pending(),
        }
    }

    /// Resets one derived field. Returns whether it held a value before.
    pub fn clear(&mut self, kind: ContentKind) -> bool {
        let was_pending = self.is_pending(kind);
        match kind {
            ContentKind::Tags => self.tags = Derived::Pending,
            ContentKind::Preview => self.preview = Derived::Pending,
            ContentKind::FeatureImage => self.feature_image = Derived::Pending,
            ContentKind::Metadata => self.metadata = Derived::Pending,
        }
        !was_pending
    }

    /// Pending kinds among `kinds`.
    pub fn pending_kinds(&self, kinds: &[ContentKind]) -> Vec<ContentKind> {
        kinds
            .iter()
            .copied()
            .filter(|kind| self.is_pending(*kind))
            .collect()
    }

    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_option().map(Vec::as_slice)
    }

    /// Frontmatter name, falling back to the file name.
    pub fn display_name(&self, path: &str) -> String {
        let fallback = file_stem_of(path).to_string();
        match &self.metadata {
            Derived::Present(metadata) => metadata.name.resolve_or(fallback),
            _ => fallback,
        }
    }

    /// Frontmatter creation date, falling back to the filesystem ctime.
    pub fn created_at(&self) -> i64 {
        match &self.metadata {
            Derived::Present(metadata) => metadata.created.resolve_or(self.ctime),
            _ => self.ctime,
        }
    }

    /// Frontmatter modification date, falling back to the filesystem mtime.
    pub fn modified_at(&self) -> i64 {
        match &self.metadata {
            Derived::Present(metadata) => metadata.modified.resolve_or(self.mtime),
            _ => self.mtime,
        }
    }
}

/// Derived values produced for one document by the content pipeline.
///
/// `None` leaves the corresponding field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentUpdate {
    pub tags: Option<Vec<String>>,
    pub preview: Option<String>,
    /// `Some(None)` records that no feature image exists.
    pub feature_image: Option<Option<String>>,
    pub metadata: Option<DocumentMetadata>,
}

impl ContentUpdate {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
            && self.preview.is_none()
            && self.feature_image.is_none()
            && self.metadata.is_none()
    }

    /// Writes the update into `record`, returning the fields whose stored
    /// value actually changed.
    pub fn apply_to(self, record: &mut FileRecord) -> ChangedFields {
        let mut changed = ChangedFields::empty();
        if let Some(tags) = self.tags {
            changed |= replace(&mut record.tags, Derived::Present(tags), ChangedFields::TAGS);
        }
        if let Some(preview) = self.preview {
            changed |= replace(
                &mut record.preview,
                Derived::Present(preview),
                ChangedFields::PREVIEW,
            );
        }
        if let Some(image) = self.feature_image {
            changed |= replace(
                &mut record.feature_image,
                Derived::from_option(image),
                ChangedFields::FEATURE_IMAGE,
            );
        }
        if let Some(metadata) = self.metadata {
            changed |= replace(
                &mut record.metadata,
                Derived::Present(metadata),
                ChangedFields::METADATA,
            );
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut Derived<T>, value: Derived<T>, flag: ChangedFields) -> ChangedFields {
    if *slot == value {
        ChangedFields::empty()
    } else {
        *slot = value;
        flag
    }
}
