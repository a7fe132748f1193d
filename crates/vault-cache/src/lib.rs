//! Document cache and tag index for markdown vaults.
//!
//! This crate mirrors an externally mutated collection of documents into a
//! local cache:
//! - Persistent path-keyed record store with compressed snapshots
//! - Diffing of the live listing against the store
//! - Background derivation of tags, previews, feature images and metadata
//! - Hierarchical tag trees with favorite and hidden tag handling
//! - Change notification for consumers

pub mod cancel;
pub mod collection;
pub mod content;
pub mod debounce;
pub mod diff;
pub mod engine;
pub mod error;
pub mod filters;
pub mod notifier;
pub mod settings;
pub mod store;
pub mod tags;
pub mod types;
pub mod validate;

// Re-export main types
pub use cancel::{CancelTracker, CancellationToken};
pub use collection::{
    CollectionEvent, CollectionEventKind, DocumentCollection, FsCollection, MemoryCollection,
};
pub use content::ContentPipeline;
pub use debounce::{DebounceAction, DebounceMode, Debouncer};
pub use diff::{DiffCalculator, DiffResult};
pub use engine::{NoteCache, SyncReport};
pub use error::{CacheError, Result};
pub use filters::{
    is_path_in_excluded_folder, should_exclude_document, should_exclude_folder, FolderPattern,
};
pub use notifier::{ChangeBatch, ChangeNotifier, Subscription};
pub use settings::{CacheSettings, ContentSettings, SchedulingSettings};
pub use store::{ContentUpdate, FileRecord, FileRecordStore};
pub use tags::{
    exclude_from_tag_tree, NodeId, NoteCountCache, TagTree, TagTreeBuilder, TagTreeNode,
    TagTreeSnapshot,
};
pub use types::{
    ChangedFields, ContentChange, ContentKind, Derived, DocumentMetadata, DocumentRef,
    MetadataField,
};
pub use validate::{validate_property_name, validate_tag_name};
