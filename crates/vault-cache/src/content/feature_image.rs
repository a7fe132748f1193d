//! Feature image lookup from frontmatter properties and document bodies.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

use super::frontmatter::Frontmatter;
use super::tags::is_fence_line;

static WIKI_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!?\[\[(?P<target>[^\]|]+)(?:\|[^\]]*)?\]\]$").expect("wiki regex is valid")
});

static MARKDOWN_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!?\[[^\]]*\]\((?P<target>[^)\s]+)(?:\s+[^)]*)?\)$")
        .expect("markdown image regex is valid")
});

static EMBEDDED_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)!\[\[(?P<wiki>[^\]|\n]+\.(?:png|jpe?g|gif|webp|svg|bmp|avif))(?:\|[^\]\n]*)?\]\]|!\[[^\]\n]*\]\((?P<md>[^)\s]+)(?:\s+[^)\n]*)?\)",
    )
    .expect("embedded image regex is valid")
});

/// Returns the first image reference found in the allowlisted properties,
/// checked in allowlist order.
pub fn feature_image_from_frontmatter(
    frontmatter: &Frontmatter,
    properties: &[String],
) -> Option<String> {
    properties
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .filter_map(|key| frontmatter.get(key))
        .find_map(image_reference)
}

fn image_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => unwrap_reference(text),
        // A list property uses its first usable entry.
        Value::Sequence(items) => items.iter().find_map(image_reference),
        _ => None,
    }
}

/// Unwraps `[[x]]`, `![[x]]`, `[alt](x)` and `![alt](x)` into `x`.
pub fn unwrap_reference(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let target = WIKI_REFERENCE
        .captures(trimmed)
        .or_else(|| MARKDOWN_REFERENCE.captures(trimmed))
        .and_then(|caps| caps.name("target"))
        .map(|target| target.as_str().trim())
        .unwrap_or(trimmed);
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// Returns the first image embedded in a document body, skipping code.
pub fn first_embedded_image(body: &str) -> Option<String> {
    let mut in_fence = false;
    for line in body.lines() {
        if is_fence_line(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let found = EMBEDDED_IMAGE.captures(line).and_then(|caps| {
            caps.name("wiki")
                .or_else(|| caps.name("md"))
                .map(|target| target.as_str().trim().to_string())
        });
        if found.is_some() {
            return found;
        }
    }
    None
}
