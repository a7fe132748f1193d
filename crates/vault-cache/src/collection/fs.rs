//! A collection backed by a directory tree on disk.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::DocumentCollection;
use crate::content::feature_image::first_embedded_image;
use crate::content::frontmatter::rewrite_tags;
use crate::error::{canonicalize_existing_path, CacheError, Result};
use crate::types::DocumentRef;

#[derive(Debug, Clone)]
pub struct FsCollection {
    root: PathBuf,
}

impl FsCollection {
    /// Opens the directory at `root`. The root is stored canonicalized so
    /// that it matches the paths reported by filesystem watchers.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = canonicalize_existing_path(root.into());
        if !root.is_dir() {
            return Err(CacheError::Collection(format!(
                "collection root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a collection path. Paths escaping the root are
    /// rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(CacheError::InvalidInput(format!(
                "'{path}' is not a collection path"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn walker(&self) -> ignore::Walk {
        let mut builder = ignore::WalkBuilder::new(&self.root);
        // Dot folders hold application state, not documents.
        builder.hidden(true);
        builder.git_ignore(false);
        builder.git_global(false);
        builder.git_exclude(false);
        builder.ignore(false);
        builder.parents(false);
        builder.build()
    }
}

impl DocumentCollection for FsCollection {
    fn list_documents(&self) -> Result<Vec<DocumentRef>> {
        let mut documents = Vec::new();
        for entry in self.walker() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    log::debug!("Skipping unreadable entry: {error}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }
            let Some(path) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    log::debug!("Skipping {path}: {error}");
                    continue;
                }
            };
            let mtime = metadata.modified().ok().map(system_time_millis).unwrap_or(0);
            let ctime = metadata
                .created()
                .ok()
                .map(system_time_millis)
                .unwrap_or(mtime);
            documents.push(DocumentRef::new(path, mtime).with_ctime(ctime));
        }
        documents.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    fn read_document(&self, path: &str) -> Result<String> {
        let absolute = self.resolve(path)?;
        fs::read_to_string(&absolute).map_err(|error| match error.kind() {
            ErrorKind::NotFound => CacheError::DocumentNotFound(path.to_string()),
            _ => CacheError::Io(error),
        })
    }

    fn scan_feature_image(&self, _path: &str, body: &str) -> Option<String> {
        first_embedded_image(body)
    }

    fn write_tags(&self, path: &str, tags: &[String]) -> Result<()> {
        let absolute = self.resolve(path)?;
        let text = self.read_document(path)?;
        let rewritten = rewrite_tags(path, &text, tags)?;
        if rewritten == text {
            return Ok(());
        }

        let parent = absolute.parent().unwrap_or(&self.root);
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(rewritten.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&absolute).map_err(|error| CacheError::Io(error.error))?;
        Ok(())
    }
}

/// Converts an absolute path under `root` into a `/`-separated collection
/// path. Returns `None` outside the root and for hidden entries.
pub(crate) fn relative_path(root: &Path, absolute: &Path) -> Option<String> {
    let relative = absolute.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return None;
        };
        let segment = segment.to_str()?;
        if segment.starts_with('.') {
            return None;
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
