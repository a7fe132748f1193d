//! Hidden-tag pruning.

use super::tree::{NodeId, TagTree, TagTreeNode};
use crate::content::tags::{normalize_tag, tag_key};

/// A rule hiding tag nodes, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPattern {
    /// `prefix*` - node name starts with the prefix.
    NameStartsWith(String),
    /// `*suffix` - node name ends with the suffix.
    NameEndsWith(String),
    /// Full tag path, matching the node itself and everything below it.
    Path(String),
}

impl TagPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if let Some(prefix) = trimmed.strip_suffix('*') {
            let prefix = prefix.trim_start_matches('*');
            return (!prefix.is_empty()).then(|| Self::NameStartsWith(tag_key(prefix)));
        }
        if let Some(suffix) = trimmed.strip_prefix('*') {
            return (!suffix.is_empty()).then(|| Self::NameEndsWith(tag_key(suffix)));
        }
        normalize_tag(trimmed).map(|path| Self::Path(tag_key(&path)))
    }

    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        raw.iter().filter_map(|value| Self::parse(value.as_ref())).collect()
    }

    pub fn matches(&self, node: &TagTreeNode) -> bool {
        match self {
            Self::NameStartsWith(prefix) => tag_key(&node.name).starts_with(prefix.as_str()),
            Self::NameEndsWith(suffix) => tag_key(&node.name).ends_with(suffix.as_str()),
            Self::Path(path) => path_matches(&node.path, path),
        }
    }
}

/// Whether `candidate` equals `pattern` or lies below it.
pub(crate) fn path_matches(candidate: &str, pattern: &str) -> bool {
    candidate == pattern
        || (candidate.starts_with(pattern)
            && candidate.as_bytes().get(pattern.len()) == Some(&b'/'))
}

/// Returns a copy of `tree` without the nodes matching any pattern (and
/// their subtrees). Nodes left with no notes and no children are pruned as
/// well. The input tree is not modified.
pub fn exclude_from_tag_tree<S: AsRef<str>>(tree: &TagTree, hidden_patterns: &[S]) -> TagTree {
    let patterns = TagPattern::parse_list(hidden_patterns);
    let mut pruned = TagTree::new();
    for root in tree.roots() {
        copy_subtree(tree, *root, None, &patterns, &mut pruned);
    }
    pruned
}

/// Copies the subtree at `id` unless it is hidden or ends up empty.
fn copy_subtree(
    source: &TagTree,
    id: NodeId,
    parent: Option<NodeId>,
    patterns: &[TagPattern],
    target: &mut TagTree,
) -> bool {
    let node = source.node(id);
    if patterns.iter().any(|pattern| pattern.matches(node)) {
        return false;
    }

    let copied = target.push_node(TagTreeNode {
        name: node.name.clone(),
        path: node.path.clone(),
        display_path: node.display_path.clone(),
        children: Vec::new(),
        notes_with_tag: node.notes_with_tag.clone(),
        parent,
    });

    let mut kept_children = 0usize;
    for child in &node.children {
        if copy_subtree(source, *child, Some(copied), patterns, target) {
            kept_children += 1;
        }
    }

    if kept_children == 0 && node.notes_with_tag.is_empty() {
        // Nothing was pushed after `copied` that survives, so it is the last
        // node in the arena.
        target.pop_last(copied);
        return false;
    }
    true
}
