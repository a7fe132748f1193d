//! Input validation for frontmatter mutations.

use crate::error::{CacheError, Result};

/// Validates a tag name and returns it without a leading `#`.
///
/// Tags are `/`-separated segments of letters, digits, `_` and `-`. Empty
/// segments and purely numeric tags are rejected.
pub fn validate_tag_name(raw: &str) -> Result<String> {
    let tag = raw.trim();
    let tag = tag.strip_prefix('#').unwrap_or(tag);

    if tag.is_empty() {
        return Err(CacheError::InvalidTag("tag name is empty".to_string()));
    }
    if tag.starts_with('/') || tag.ends_with('/') {
        return Err(CacheError::InvalidTag(format!(
            "'{tag}' cannot start or end with '/'"
        )));
    }
    if tag.contains("//") {
        return Err(CacheError::InvalidTag(format!(
            "'{tag}' contains an empty segment"
        )));
    }
    if let Some(invalid) = tag
        .chars()
        .find(|ch| !(ch.is_alphanumeric() || matches!(ch, '_' | '-' | '/')))
    {
        return Err(CacheError::InvalidTag(format!(
            "'{tag}' contains invalid character '{invalid}'"
        )));
    }
    if tag.chars().all(|ch| ch.is_ascii_digit() || ch == '/') {
        return Err(CacheError::InvalidTag(format!("'{tag}' is purely numeric")));
    }
    Ok(tag.to_string())
}

/// Validates a frontmatter property key.
pub fn validate_property_name(raw: &str) -> Result<&str> {
    if raw.is_empty() {
        return Err(CacheError::InvalidProperty(
            "property name is empty".to_string(),
        ));
    }
    if raw.trim() != raw {
        return Err(CacheError::InvalidProperty(format!(
            "'{raw}' has surrounding whitespace"
        )));
    }
    if raw.contains(':') || raw.contains('\n') || raw.contains('\r') {
        return Err(CacheError::InvalidProperty(format!(
            "'{}' contains ':' or a line break",
            raw.escape_debug()
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hierarchical_tags() {
        assert_eq!(validate_tag_name("#proj/sub-task_1").unwrap(), "proj/sub-task_1");
        assert_eq!(validate_tag_name("日本語").unwrap(), "日本語");
        assert_eq!(validate_tag_name("2024/plan").unwrap(), "2024/plan");
    }

    #[test]
    fn rejects_bad_separators() {
        for bad in ["", "#", "/proj", "proj/", "a//b"] {
            assert!(
                matches!(validate_tag_name(bad), Err(CacheError::InvalidTag(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_invalid_characters_and_numbers() {
        assert!(validate_tag_name("has space").is_err());
        assert!(validate_tag_name("a.b").is_err());
        assert!(validate_tag_name("123").is_err());
        assert!(validate_tag_name("12/34").is_err());
    }

    #[test]
    fn property_names() {
        assert_eq!(validate_property_name("draft").unwrap(), "draft");
        assert!(validate_property_name("").is_err());
        assert!(validate_property_name(" draft").is_err());
        assert!(validate_property_name("a:b").is_err());
        assert!(validate_property_name("a\nb").is_err());
    }
}
