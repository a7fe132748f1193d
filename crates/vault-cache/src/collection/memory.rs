use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::DocumentCollection;
use crate::content::frontmatter::rewrite_tags;
use crate::error::{CacheError, Result};
use crate::types::DocumentRef;

#[derive(Debug, Clone)]
struct MemoryDocument {
    text: String,
    mtime: i64,
    ctime: i64,
}

/// A collection held entirely in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    documents: RwLock<BTreeMap<String, MemoryDocument>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document.
    pub fn insert(&self, path: impl Into<String>, text: impl Into<String>, mtime: i64) {
        let path = path.into();
        let mut documents = self.documents.write();
        let ctime = documents.get(&path).map(|doc| doc.ctime).unwrap_or(mtime);
        documents.insert(
            path,
            MemoryDocument {
                text: text.into(),
                mtime,
                ctime,
            },
        );
    }

    pub fn remove(&self, path: &str) -> bool {
        self.documents.write().remove(path).is_some()
    }

    pub fn rename(&self, from: &str, to: &str) -> bool {
        let mut documents = self.documents.write();
        match documents.remove(from) {
            Some(doc) => {
                documents.insert(to.to_string(), doc);
                true
            }
            None => false,
        }
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.documents.read().get(path).map(|doc| doc.text.clone())
    }

    pub fn mtime(&self, path: &str) -> Option<i64> {
        self.documents.read().get(path).map(|doc| doc.mtime)
    }
}

impl DocumentCollection for MemoryCollection {
    fn list_documents(&self) -> Result<Vec<DocumentRef>> {
        Ok(self
            .documents
            .read()
            .iter()
            .map(|(path, doc)| DocumentRef::new(path.clone(), doc.mtime).with_ctime(doc.ctime))
            .collect())
    }

    fn read_document(&self, path: &str) -> Result<String> {
        self.text(path)
            .ok_or_else(|| CacheError::DocumentNotFound(path.to_string()))
    }

    fn write_tags(&self, path: &str, tags: &[String]) -> Result<()> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(path)
            .ok_or_else(|| CacheError::DocumentNotFound(path.to_string()))?;
        doc.text = rewrite_tags(path, &doc.text, tags)?;
        doc.mtime += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_documents_in_path_order() {
        let collection = MemoryCollection::new();
        collection.insert("b.md", "b", 2);
        collection.insert("a.md", "a", 1);
        let listed = collection.list_documents().expect("list");
        let paths: Vec<&str> = listed.iter().map(|doc| doc.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md"]);
    }

    #[test]
    fn write_tags_bumps_mtime() {
        let collection = MemoryCollection::new();
        collection.insert("a.md", "body", 10);
        collection
            .write_tags("a.md", &["x".to_string()])
            .expect("write");
        assert_eq!(collection.mtime("a.md"), Some(11));
        let fm = collection.frontmatter("a.md").expect("read").expect("block");
        assert_eq!(fm.string_list("tags"), vec!["x"]);
    }

    #[test]
    fn missing_document_is_not_found() {
        let collection = MemoryCollection::new();
        assert!(matches!(
            collection.read_document("nope.md"),
            Err(CacheError::DocumentNotFound(_))
        ));
    }
}
