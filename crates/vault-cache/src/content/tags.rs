//! Tag extraction and normalization.

use std::sync::LazyLock;

use fnv::FnvHashSet;
use regex::Regex;

use super::frontmatter::Frontmatter;

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(,])#([\p{L}\p{N}_\-/]+)").expect("inline tag regex is valid")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").expect("inline code regex is valid"));

/// Frontmatter keys that carry tag lists.
const TAG_KEYS: [&str; 2] = ["tags", "tag"];

/// Normalizes a raw tag: strips a leading `#` and drops empty path
/// segments, so `/a//b/` becomes `a/b`.
///
/// Returns `None` when nothing is left.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_hash = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let normalized = without_hash
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Case-folded identity of a normalized tag.
pub fn tag_key(tag: &str) -> String {
    tag.to_lowercase()
}

/// Collects the raw tags of a document: frontmatter tags first, then inline
/// `#tags` from the body outside code.
pub fn extract_raw_tags(frontmatter: Option<&Frontmatter>, body: &str) -> Vec<String> {
    let mut raw = Vec::new();
    if let Some(frontmatter) = frontmatter {
        for key in TAG_KEYS {
            raw.extend(frontmatter.string_list(key));
        }
    }
    raw.extend(inline_tags(body));
    raw
}

/// Normalizes raw tags and removes case-insensitive duplicates, keeping the
/// first-seen casing and order.
pub fn normalize_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = FnvHashSet::default();
    let mut tags = Vec::new();
    for value in raw {
        let Some(tag) = normalize_tag(value.as_ref()) else {
            continue;
        };
        if seen.insert(tag_key(&tag)) {
            tags.push(tag);
        }
    }
    tags
}

/// Extracts and normalizes the tags of a document in one step.
pub fn extract_tags(frontmatter: Option<&Frontmatter>, body: &str) -> Vec<String> {
    normalize_tags(extract_raw_tags(frontmatter, body))
}

fn inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_fence = false;
    for line in body.lines() {
        if is_fence_line(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let without_code = INLINE_CODE.replace_all(line, " ");
        for caps in INLINE_TAG.captures_iter(&without_code) {
            let tag = &caps[1];
            // `#123` is an issue reference, not a tag.
            if tag.chars().all(|c| c.is_ascii_digit() || c == '/') {
                continue;
            }
            tags.push(tag.to_string());
        }
    }
    tags
}

pub(crate) fn is_fence_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_hash_and_slashes() {
        assert_eq!(normalize_tag("#proj/x/"), Some("proj/x".to_string()));
        assert_eq!(normalize_tag("/a/b"), Some("a/b".to_string()));
        assert_eq!(normalize_tag("a//b///c"), Some("a/b/c".to_string()));
        assert_eq!(normalize_tag("#//"), None);
        assert_eq!(normalize_tag("#"), None);
        assert_eq!(normalize_tag(" // "), None);
    }

    #[test]
    fn duplicates_keep_first_casing() {
        let tags = normalize_tags(["Project", "#project", "PROJECT/", "other"]);
        assert_eq!(tags, vec!["Project", "other"]);
    }

    #[test]
    fn frontmatter_then_inline_order() {
        let frontmatter = Frontmatter::parse("tags: [alpha, Beta]").expect("yaml");
        let body = "Text with #gamma and #beta here.\n";
        assert_eq!(
            extract_tags(Some(&frontmatter), body),
            vec!["alpha", "Beta", "gamma"]
        );
    }

    #[test]
    fn inline_tags_ignore_code_and_headings() {
        let body = "# Heading\n`#notatag` #real\n```\n#insidefence\n```\nissue #123 #nested/tag";
        assert_eq!(extract_tags(None, body), vec!["real", "nested/tag"]);
        assert_eq!(extract_tags(None, "#a//b and #A/b"), vec!["a/b"]);
    }

    #[test]
    fn singular_tag_key_is_read() {
        let frontmatter = Frontmatter::parse("tag: solo").expect("yaml");
        assert_eq!(extract_tags(Some(&frontmatter), ""), vec!["solo"]);
    }

    #[test]
    fn empty_document_has_no_tags() {
        assert!(extract_tags(None, "").is_empty());
    }
}
