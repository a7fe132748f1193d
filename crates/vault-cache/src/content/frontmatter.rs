//! YAML frontmatter splitting and typed access.

use serde_yaml::{Mapping, Value};

use crate::error::{CacheError, Result};

/// Parsed frontmatter block of a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    values: Mapping,
}

impl Frontmatter {
    /// Parses the YAML between the frontmatter fences.
    ///
    /// An empty or `null` block yields an empty mapping; any other
    /// non-mapping document is rejected.
    pub fn parse(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_yaml::from_str(yaml)?;
        let values = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "frontmatter must be a mapping, found {}",
                    value_kind(&other)
                )))
            }
        };
        Ok(Self { values })
    }

    /// Splits and parses the frontmatter of a whole document.
    ///
    /// Returns `Ok(None)` when the document has no frontmatter block.
    pub fn from_document(path: &str, text: &str) -> Result<Option<Self>> {
        let (yaml, _) = split_frontmatter(text);
        match yaml {
            None => Ok(None),
            Some(yaml) => Self::parse(yaml)
                .map(Some)
                .map_err(|error| CacheError::Frontmatter {
                    path: path.to_string(),
                    message: error.to_string(),
                }),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().filter_map(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a scalar value as text (strings, numbers and booleans).
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_to_string)
    }

    /// Returns a list-valued property.
    ///
    /// Sequences yield their scalar items; a plain string is split on commas
    /// and whitespace, which is how inline tag lists are usually written.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(scalar_to_string)
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            Some(Value::String(text)) => text
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            Some(other) => scalar_to_string(other).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Rewrites the `tags` property of a document, keeping every other property
/// and the body as they are. An empty list removes the property.
pub fn rewrite_tags(path: &str, text: &str, tags: &[String]) -> Result<String> {
    let (yaml, body) = split_frontmatter(text);
    let mut values = match yaml {
        Some(yaml) => {
            Frontmatter::parse(yaml)
                .map_err(|error| CacheError::Frontmatter {
                    path: path.to_string(),
                    message: error.to_string(),
                })?
                .values
        }
        None => Mapping::new(),
    };

    values.remove("tag");
    if tags.is_empty() {
        values.remove("tags");
    } else {
        let list = tags.iter().cloned().map(Value::String).collect();
        values.insert(Value::String("tags".to_string()), Value::Sequence(list));
    }

    if values.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(&values)
        .map_err(|error| CacheError::Serialization(error.to_string()))?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Splits a document into its frontmatter YAML (if any) and body.
///
/// The block must start on the first line with `---` and end with a line
/// consisting of `---` (or `...`).
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }

    (None, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_without_frontmatter() {
        let (yaml, body) = split_frontmatter("# Title\nbody");
        assert!(yaml.is_none());
        assert_eq!(body, "# Title\nbody");
    }

    #[test]
    fn split_with_frontmatter() {
        let (yaml, body) = split_frontmatter("---\ntags: [a]\n---\nbody\n");
        assert_eq!(yaml, Some("tags: [a]\n"));
        assert_eq!(body, "body\n");
    }

    #[test]
    fn split_handles_crlf_and_empty_block() {
        let (yaml, body) = split_frontmatter("---\r\n---\r\ntext");
        assert_eq!(yaml, Some(""));
        assert_eq!(body, "text");
    }

    #[test]
    fn unterminated_block_is_body() {
        let (yaml, body) = split_frontmatter("---\ntitle: x\nno end");
        assert!(yaml.is_none());
        assert_eq!(body, "---\ntitle: x\nno end");
    }

    #[test]
    fn string_list_accepts_sequences_and_strings() {
        let fm = Frontmatter::parse("tags: [a, b/c]\naliases: one, two three\n").expect("yaml");
        assert_eq!(fm.string_list("tags"), vec!["a", "b/c"]);
        assert_eq!(fm.string_list("aliases"), vec!["one", "two", "three"]);
        assert!(fm.string_list("missing").is_empty());
    }

    #[test]
    fn scalar_frontmatter_is_rejected() {
        assert!(Frontmatter::parse("just a string").is_err());
        assert!(Frontmatter::parse("~").expect("null").is_empty());
    }

    #[test]
    fn from_document_reports_path_on_error() {
        let error = Frontmatter::from_document("a.md", "---\nkey: [unclosed\n---\n")
            .expect_err("malformed yaml");
        assert!(matches!(error, CacheError::Frontmatter { ref path, .. } if path == "a.md"));
    }

    #[test]
    fn rewrite_tags_keeps_other_properties() {
        let text = "---\ntitle: Note\ntag: old\n---\nbody\n";
        let rewritten = rewrite_tags("a.md", text, &["proj/x".to_string()]).expect("rewrite");
        let fm = Frontmatter::from_document("a.md", &rewritten)
            .expect("parse")
            .expect("frontmatter");
        assert_eq!(fm.get_str("title").as_deref(), Some("Note"));
        assert_eq!(fm.string_list("tags"), vec!["proj/x"]);
        assert!(!fm.contains_key("tag"));
        assert!(rewritten.ends_with("---\nbody\n"));
    }

    #[test]
    fn rewrite_tags_adds_and_removes_block() {
        let added = rewrite_tags("a.md", "body", &["x".to_string()]).expect("add");
        assert!(added.starts_with("---\n"));
        assert_eq!(rewrite_tags("a.md", &added, &[]).expect("remove"), "body");
    }
}
