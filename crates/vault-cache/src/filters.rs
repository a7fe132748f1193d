//! Exclusion predicates for folders and documents.
//!
//! All predicates are pure. Folder patterns are OR-combined and applied to
//! every ancestor folder of a document path, so a document is out of scope
//! as soon as any enclosing folder matches.

use crate::content::frontmatter::Frontmatter;

/// A folder exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderPattern {
    /// Matches a folder whose name equals the pattern.
    Exact(String),
    /// `Archive*` - folder name starts with the prefix.
    Prefix(String),
    /// `*.tmp` - folder name ends with the suffix.
    Suffix(String),
    /// `Projects/Old` - folder path equals or lies under the given path.
    Path(String),
}

impl FolderPattern {
    /// Parses a single pattern. Blank input and a lone `*` yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return None;
        }

        if trimmed.contains('/') {
            let path = trimmed.trim_matches('/');
            if path.is_empty() {
                return None;
            }
            return Some(Self::Path(path.to_string()));
        }

        if let Some(prefix) = trimmed.strip_suffix('*') {
            if !prefix.contains('*') {
                return Some(Self::Prefix(prefix.to_string()));
            }
        }
        if let Some(suffix) = trimmed.strip_prefix('*') {
            if !suffix.contains('*') {
                return Some(Self::Suffix(suffix.to_string()));
            }
        }
        Some(Self::Exact(trimmed.to_string()))
    }

    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        raw.iter().filter_map(|value| Self::parse(value.as_ref())).collect()
    }

    /// Matches a single folder given its name and its full vault path.
    pub fn matches(&self, name: &str, folder_path: &str) -> bool {
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => name.ends_with(suffix.as_str()),
            Self::Path(path) => {
                folder_path == path
                    || (folder_path.starts_with(path.as_str())
                        && folder_path.as_bytes().get(path.len()) == Some(&b'/'))
            }
        }
    }
}

/// Returns true when the document's frontmatter defines any excluded key.
pub fn should_exclude_document(
    frontmatter: Option<&Frontmatter>,
    excluded_properties: &[String],
) -> bool {
    let Some(frontmatter) = frontmatter else {
        return false;
    };
    excluded_properties
        .iter()
        .any(|key| frontmatter.contains_key(key))
}

/// Returns true when a folder name matches any pattern.
pub fn should_exclude_folder(name: &str, patterns: &[FolderPattern]) -> bool {
    patterns.iter().any(|pattern| pattern.matches(name, name))
}

/// Returns true when any ancestor folder of `document_path` is excluded.
pub fn is_path_in_excluded_folder(document_path: &str, patterns: &[FolderPattern]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    document_path
        .match_indices('/')
        .map(|(separator, _)| &document_path[..separator])
        .any(|folder_path| {
            let name_start = folder_path.rfind('/').map(|index| index + 1).unwrap_or(0);
            let name = &folder_path[name_start..];
            !name.is_empty()
                && patterns
                    .iter()
                    .any(|pattern| pattern.matches(name, folder_path))
        })
}
