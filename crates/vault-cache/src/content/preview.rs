//! Preview text extraction.
//!
//! Walks the document body line by line, strips markdown from the lines that
//! carry text and accumulates them up to [`PREVIEW_MAX_CHARS`]. Documents
//! without usable text get a summary of their attachments and links instead.

use std::sync::LazyLock;

use regex::Regex;

use super::frontmatter::split_frontmatter;
use super::markdown::strip_markdown_syntax;
use super::tags::is_fence_line;

/// Character budget of a preview.
pub const PREVIEW_MAX_CHARS: usize = 300;

pub const PREVIEW_ELLIPSIS: &str = "...";

pub const NO_ADDITIONAL_TEXT: &str = "No additional text";

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").expect("image regex is valid"));

static WIKI_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\[[^\]\n]+\]\]").expect("embed regex is valid"));

static MARKDOWN_WEB_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]\n]*\]\((?P<url>https?://[^)\s]+)\)")
        .expect("web link regex is valid")
});

static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s<])(?P<url>https?://[^\s<>()\[\]"']+)"#).expect("url regex is valid")
});

static HORIZONTAL_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$")
        .expect("rule regex is valid")
});

static CALLOUT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:>[ \t]*)+\[![^\]\n]+\][+-]?").expect("callout regex is valid")
});

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*#{1,6}(?:[ \t]|$)").expect("heading regex is valid"));

/// Options controlling which lines contribute to a preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviewOptions {
    pub skip_headings: bool,
    pub skip_non_text: bool,
}

/// Extracts preview text from a whole document (frontmatter included).
pub fn extract_preview_text(text: &str, options: PreviewOptions) -> String {
    let (_, body) = split_frontmatter(text);

    let mut preview = String::new();
    let mut preview_chars = 0usize;
    let mut counts = NonTextCounts::default();
    let mut in_fence = false;

    for line in body.lines() {
        counts.observe(line, in_fence);

        if is_fence_line(line) {
            in_fence = !in_fence;
            continue;
        }
        if preview_chars >= PREVIEW_MAX_CHARS {
            continue;
        }
        if in_fence && options.skip_non_text {
            continue;
        }
        if options.skip_headings && HEADING.is_match(line) {
            continue;
        }
        if options.skip_non_text && is_non_text_line(line) {
            continue;
        }

        let stripped = strip_markdown_syntax(line);
        if !has_usable_text(&stripped) {
            continue;
        }
        if !preview.is_empty() {
            preview.push(' ');
            preview_chars += 1;
        }
        preview_chars += stripped.chars().count();
        preview.push_str(&stripped);
    }

    if preview.is_empty() {
        return counts.summary();
    }
    truncate_preview(preview)
}

fn truncate_preview(preview: String) -> String {
    if preview.chars().count() <= PREVIEW_MAX_CHARS {
        return preview;
    }
    let mut truncated: String = preview.chars().take(PREVIEW_MAX_CHARS).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str(PREVIEW_ELLIPSIS);
    truncated
}

/// Bare URLs alone do not make a line readable text; they are reported in
/// the link summary instead.
fn has_usable_text(stripped: &str) -> bool {
    !stripped.is_empty() && !BARE_URL.replace_all(stripped, "").trim().is_empty()
}

/// Lines that never contribute text when non-text lines are skipped.
fn is_non_text_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    if HORIZONTAL_RULE.is_match(line) || CALLOUT_HEADER.is_match(line) {
        return true;
    }
    // A line made up only of images and embeds.
    let without_media = WIKI_EMBED.replace_all(trimmed, "");
    let without_media = MARKDOWN_IMAGE.replace_all(&without_media, "");
    without_media.trim().is_empty()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct NonTextCounts {
    attachments: usize,
    web_links: usize,
}

impl NonTextCounts {
    fn observe(&mut self, line: &str, in_fence: bool) {
        if in_fence {
            return;
        }
        self.attachments += MARKDOWN_IMAGE.find_iter(line).count();
        self.attachments += WIKI_EMBED.find_iter(line).count();

        let without_images = MARKDOWN_IMAGE.replace_all(line, "");
        self.web_links += MARKDOWN_WEB_LINK.find_iter(&without_images).count();
        let without_links = MARKDOWN_WEB_LINK.replace_all(&without_images, " ");
        self.web_links += BARE_URL.find_iter(&without_links).count();
    }

    fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.attachments > 0 {
            parts.push(pluralize(self.attachments, "attachment", "attachments"));
        }
        if self.web_links > 0 {
            parts.push(pluralize(self.web_links, "web link", "web links"));
        }
        if parts.is_empty() {
            NO_ADDITIONAL_TEXT.to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{count} {plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(text: &str) -> String {
        extract_preview_text(
            text,
            PreviewOptions {
                skip_headings: false,
                skip_non_text: true,
            },
        )
    }

    #[test]
    fn frontmatter_only_document() {
        assert_eq!(preview("---\ntitle: Empty\n---\n"), NO_ADDITIONAL_TEXT);
        assert_eq!(preview(""), NO_ADDITIONAL_TEXT);
    }

    #[test]
    fn joins_lines_and_strips_markdown() {
        let text = "# Title\n\nSome **bold** text.\n- item one\n";
        assert_eq!(preview(text), "Title Some bold text. item one");
    }

    #[test]
    fn skip_headings_option() {
        let text = "# Title\nBody line";
        let options = PreviewOptions {
            skip_headings: true,
            skip_non_text: false,
        };
        assert_eq!(extract_preview_text(text, options), "Body line");
    }

    #[test]
    fn skip_non_text_drops_media_rules_callouts_and_code() {
        let text = "![[cover.png]]\n---\n> [!note] Callout title\n```\nlet x = 1;\n```\nActual text";
        assert_eq!(preview(text), "Actual text");
    }

    #[test]
    fn code_content_is_kept_when_not_skipping() {
        let text = "```\nlet x = 1;\n```";
        let options = PreviewOptions::default();
        assert_eq!(extract_preview_text(text, options), "let x = 1;");
    }

    #[test]
    fn truncates_with_ellipsis() {
        let long = "word ".repeat(100);
        let result = preview(&long);
        assert!(result.ends_with(PREVIEW_ELLIPSIS));
        assert!(result.chars().count() <= PREVIEW_MAX_CHARS + PREVIEW_ELLIPSIS.len());
    }

    #[test]
    fn short_text_is_not_truncated() {
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn attachment_and_link_summary() {
        let text = "![[a.png]]\n![b](b.jpg)\nhttps://example.com\n";
        assert_eq!(preview(text), "2 attachments, 1 web link");
    }

    #[test]
    fn only_links_summary() {
        let text = "[](https://example.com)\n[](https://example.org)";
        assert_eq!(preview(text), "2 web links");
    }
}
