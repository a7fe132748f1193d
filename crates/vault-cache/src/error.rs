use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Frontmatter error in {path}: {message}")]
    Frontmatter { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid tag name: {0}")]
    InvalidTag(String),

    #[error("Invalid property name: {0}")]
    InvalidProperty(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Snapshot error for {path}: {message}")]
    Snapshot { path: PathBuf, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub(crate) fn snapshot(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Snapshot {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Resolves symlinks in `path`. Falls back to the path as given when it
/// cannot be resolved.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
