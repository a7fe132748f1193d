//! Core value types shared by the store, pipeline and tag builder.

use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// A document as reported by the collection: identity plus the timestamps
/// needed for diffing and metadata fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub path: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    /// Creation time in milliseconds since the Unix epoch.
    pub ctime: i64,
    /// Lowercased extension without the dot (`"md"`).
    pub extension: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>, mtime: i64) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self {
            path,
            mtime,
            ctime: mtime,
            extension,
        }
    }

    pub fn with_ctime(mut self, ctime: i64) -> Self {
        self.ctime = ctime;
        self
    }

    pub fn is_markdown(&self) -> bool {
        self.extension == "md"
    }
}

/// Returns the lowercased extension of the last path segment.
pub fn extension_of(path: &str) -> String {
    let name = file_name_of(path);
    match name.rfind('.') {
        Some(index) if index > 0 => name[index + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Returns the last `/`-separated segment of a vault path.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns the file name without its extension.
pub fn file_stem_of(path: &str) -> &str {
    let name = file_name_of(path);
    match name.rfind('.') {
        Some(index) if index > 0 => &name[..index],
        _ => name,
    }
}

/// A derived field's state.
///
/// `Pending` means the value still has to be (re)generated, `Absent` means it
/// was computed and nothing exists, `Present` carries the computed value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Derived<T> {
    #[default]
    Pending,
    Absent,
    Present(T),
}

impl<T> Derived<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Present(value),
            None => Self::Absent,
        }
    }
}

/// One derived content dimension of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Tags,
    Preview,
    FeatureImage,
    Metadata,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::Tags,
        ContentKind::Preview,
        ContentKind::FeatureImage,
        ContentKind::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Preview => "preview",
            Self::FeatureImage => "featureImage",
            Self::Metadata => "metadata",
        }
    }

    pub fn field(self) -> ChangedFields {
        match self {
            Self::Tags => ChangedFields::TAGS,
            Self::Preview => ChangedFields::PREVIEW,
            Self::FeatureImage => ChangedFields::FEATURE_IMAGE,
            Self::Metadata => ChangedFields::METADATA,
        }
    }
}

bitflags! {
    /// Fields touched by a single store write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangedFields: u8 {
        const TAGS          = 0b0000_0001;
        const PREVIEW       = 0b0000_0010;
        const FEATURE_IMAGE = 0b0000_0100;
        const METADATA      = 0b0000_1000;
        const MTIME         = 0b0001_0000;
        const REMOVED       = 0b0010_0000;
    }
}

impl ChangedFields {
    /// Every derived content field.
    pub const CONTENT: ChangedFields = ChangedFields::TAGS
        .union(ChangedFields::PREVIEW)
        .union(ChangedFields::FEATURE_IMAGE)
        .union(ChangedFields::METADATA);

    /// Whether the change can alter the tag tree.
    pub fn affects_tags(self) -> bool {
        self.intersects(ChangedFields::TAGS | ChangedFields::REMOVED)
    }
}

/// A per-document change delta delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub path: String,
    pub changed_fields: ChangedFields,
}

impl ContentChange {
    pub fn new(path: impl Into<String>, changed_fields: ChangedFields) -> Self {
        Self {
            path: path.into(),
            changed_fields,
        }
    }
}

/// A frontmatter-derived metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetadataField<T> {
    /// No frontmatter key is configured for this field.
    #[default]
    NotConfigured,
    /// A key is configured but the document has no usable value for it.
    Missing,
    Value(T),
}

impl<T: Clone> MetadataField<T> {
    /// Returns the extracted value, or `fallback` when there is none.
    pub fn resolve_or(&self, fallback: T) -> T {
        match self {
            Self::Value(value) => value.clone(),
            Self::NotConfigured | Self::Missing => fallback,
        }
    }
}

/// Metadata extracted from a document's frontmatter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: MetadataField<String>,
    /// Milliseconds since the Unix epoch.
    pub created: MetadataField<i64>,
    /// Milliseconds since the Unix epoch.
    pub modified: MetadataField<i64>,
}

/// Returns the current Unix timestamp in milliseconds.
pub fn unix_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as i64)
        .unwrap_or(0)
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
