//! Single-pass markdown syntax stripping for preview text.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// One alternation per construct; the replacer keeps the inner text of
/// formatting spans and drops markers, images and embeds entirely.
static MARKDOWN_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)(?P<lead>^[ \t]*(?:#{1,6}[ \t]+|(?:>[ \t]?)+|[-*+][ \t]+(?:\[[ xX]\][ \t]+)?|\d+[.)][ \t]+))",
        r"|\\(?P<esc>[\\`*_{}\[\]()#+\-.!~=|<>])",
        r"|`(?P<code>[^`\n]+)`",
        r"|!\[\[[^\]\n]*\]\]",
        r"|\[\[(?P<wtarget>[^\]|\n]+)(?:\|(?P<walias>[^\]\n]+))?\]\]",
        r"|!\[[^\]\n]*\]\([^)\n]*\)",
        r"|\[(?P<ltext>[^\]\n]*)\]\([^)\n]*\)",
        r"|\*\*\*(?P<bi>[^*\n]+?)\*\*\*",
        r"|___(?P<bi_u>[^_\n]+?)___",
        r"|\*\*(?P<b>[^*\n]+?)\*\*",
        r"|__(?P<b_u>[^_\n]+?)__",
        r"|\*(?P<i>[^*\s](?:[^*\n]*?[^*\s])?)\*",
        r"|\b_(?P<i_u>[^_\s](?:[^_\n]*?[^_\s])?)_\b",
        r"|~~(?P<s>[^~\n]+?)~~",
        r"|==(?P<h>[^=\n]+?)==",
    ))
    .expect("markdown syntax regex is valid")
});

/// Capture groups whose text survives stripping, in priority order.
const KEPT_GROUPS: [&str; 13] = [
    "esc", "code", "walias", "wtarget", "ltext", "bi", "bi_u", "b", "b_u", "i", "i_u", "s", "h",
];

/// Removes markdown syntax from `text`, keeping the readable content.
pub fn strip_markdown_syntax(text: &str) -> String {
    let stripped = MARKDOWN_SYNTAX.replace_all(text, |caps: &Captures| {
        KEPT_GROUPS
            .iter()
            .find_map(|name| caps.name(name))
            .map(|inner| inner.as_str().to_string())
            .unwrap_or_default()
    });
    collapse_whitespace(&stripped)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
