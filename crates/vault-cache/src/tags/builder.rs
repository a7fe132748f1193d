//! Single-pass tag tree construction from the record store.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use super::exclude::path_matches;
use super::natural::natural_cmp;
use super::tree::TagTree;
use crate::content::tags::{normalize_tag, tag_key};
use crate::filters::{is_path_in_excluded_folder, FolderPattern};
use crate::store::FileRecordStore;
use crate::types::Derived;

/// The published result of one tag tree build.
#[derive(Debug, Clone, Default)]
pub struct TagTreeSnapshot {
    /// Tags matching a favorite pattern, with their ancestors.
    pub favorite_tree: TagTree,
    /// Every other tag.
    pub tag_tree: TagTree,
    /// Markdown documents whose extracted tag list is empty.
    pub untagged_count: usize,
}

/// Per-tag accumulation keyed by case-folded path.
struct TagEntry {
    display: String,
    notes: BTreeSet<String>,
}

pub struct TagTreeBuilder;

impl TagTreeBuilder {
    /// Builds both trees from the current store contents.
    ///
    /// Documents in excluded folders are skipped entirely. Documents whose
    /// tags are still pending are skipped without counting as untagged.
    pub fn build<S: AsRef<str>>(
        store: &FileRecordStore,
        excluded_folders: &[FolderPattern],
        favorite_patterns: &[S],
    ) -> TagTreeSnapshot {
        // Visit in path order so the first-seen casing of a tag does not
        // depend on hash order.
        let mut tagged: Vec<(String, Vec<String>)> = Vec::new();
        let mut untagged_count = 0usize;
        store.for_each(|path, record| {
            if is_path_in_excluded_folder(path, excluded_folders) {
                return;
            }
            let tags: &[String] = match &record.tags {
                Derived::Pending => return,
                Derived::Absent => &[],
                Derived::Present(tags) => tags,
            };
            if tags.is_empty() {
                if record.is_markdown() {
                    untagged_count += 1;
                }
                return;
            }
            tagged.push((path.to_string(), tags.to_vec()));
        });
        tagged.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut entries: FnvHashMap<String, TagEntry> = FnvHashMap::default();
        for (path, tags) in tagged {
            for raw in tags {
                let Some(tag) = normalize_tag(&raw) else {
                    continue;
                };
                entries
                    .entry(tag_key(&tag))
                    .or_insert_with(|| TagEntry {
                        display: tag,
                        notes: BTreeSet::new(),
                    })
                    .notes
                    .insert(path.clone());
            }
        }

        let favorites = parse_favorites(favorite_patterns);
        let (favorite_entries, general_entries): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|(key, _)| is_favorite(key, &favorites));

        TagTreeSnapshot {
            favorite_tree: build_tree(favorite_entries),
            tag_tree: build_tree(general_entries),
            untagged_count,
        }
    }
}

enum FavoritePattern {
    Prefix(String),
    Path(String),
}

fn parse_favorites<S: AsRef<str>>(patterns: &[S]) -> Vec<FavoritePattern> {
    patterns
        .iter()
        .filter_map(|pattern| {
            let pattern = pattern.as_ref().trim();
            match pattern.strip_suffix('*') {
                Some(prefix) => normalize_tag(prefix)
                    .map(|prefix| FavoritePattern::Prefix(tag_key(&prefix))),
                None => normalize_tag(pattern).map(|path| FavoritePattern::Path(tag_key(&path))),
            }
        })
        .collect()
}

fn is_favorite(key: &str, patterns: &[FavoritePattern]) -> bool {
    patterns.iter().any(|pattern| match pattern {
        FavoritePattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
        FavoritePattern::Path(path) => path_matches(key, path),
    })
}

fn build_tree(entries: Vec<(String, TagEntry)>) -> TagTree {
    let mut entries: Vec<TagEntry> = entries.into_iter().map(|(_, entry)| entry).collect();
    entries.sort_by(|a, b| natural_cmp(&a.display, &b.display));

    let mut tree = TagTree::new();
    for entry in entries {
        tree.insert_tag(&entry.display, entry.notes);
    }
    tree
}
