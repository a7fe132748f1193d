//! Derived content: tags, preview text, feature image and metadata.

pub mod feature_image;
pub mod frontmatter;
pub mod markdown;
pub mod metadata;
mod pipeline;
pub mod preview;
pub mod tags;

pub use feature_image::{feature_image_from_frontmatter, first_embedded_image};
pub use frontmatter::{split_frontmatter, Frontmatter};
pub use markdown::strip_markdown_syntax;
pub use metadata::extract_metadata;
pub use pipeline::{derive_document, ContentPipeline};
pub use preview::{extract_preview_text, PreviewOptions};
pub use tags::{extract_tags, normalize_tag, normalize_tags, tag_key};
