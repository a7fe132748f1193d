//! Cache configuration.
//!
//! Settings are stored as JSON next to the record snapshot and created with
//! defaults on first use. Unknown or missing keys fall back to defaults so
//! older settings files keep loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::filters::FolderPattern;
use crate::types::ContentKind;

pub const SETTINGS_FILENAME: &str = "vault-cache.json";
pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub version: u32,
    /// Folder name patterns (`Archive`, `Archive*`, `*.tmp`).
    pub excluded_folders: Vec<String>,
    /// Frontmatter keys whose presence hides a document.
    pub excluded_frontmatter_properties: Vec<String>,
    pub favorite_tags: Vec<String>,
    pub hidden_tags: Vec<String>,
    pub content: ContentSettings,
    pub scheduling: SchedulingSettings,
}

/// Per-feature toggles and their options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentSettings {
    pub show_tags: bool,
    pub show_preview: bool,
    pub show_feature_image: bool,
    pub use_frontmatter_metadata: bool,
    pub skip_headings_in_preview: bool,
    pub skip_non_text_in_preview: bool,
    /// Frontmatter properties checked, in order, for a feature image.
    pub feature_image_properties: Vec<String>,
    pub frontmatter_name_field: String,
    pub frontmatter_created_field: String,
    pub frontmatter_modified_field: String,
    /// chrono format string for created/modified values.
    pub frontmatter_date_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulingSettings {
    /// Leading debounce for create/delete/rename events.
    pub structural_debounce_ms: u64,
    /// Trailing debounce for modify events.
    pub content_debounce_ms: u64,
    /// Documents derived per pipeline slice before yielding.
    pub pipeline_batch_size: usize,
    /// Maximum queued documents; overflow stays pending for the next sweep.
    pub pipeline_queue_capacity: usize,
    /// How often the dirty store is flushed to disk.
    pub flush_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            excluded_folders: Vec::new(),
            excluded_frontmatter_properties: Vec::new(),
            favorite_tags: Vec::new(),
            hidden_tags: Vec::new(),
            content: ContentSettings::default(),
            scheduling: SchedulingSettings::default(),
        }
    }
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            show_tags: true,
            show_preview: true,
            show_feature_image: true,
            use_frontmatter_metadata: false,
            skip_headings_in_preview: false,
            skip_non_text_in_preview: true,
            feature_image_properties: vec![
                "thumbnail".to_string(),
                "featureResized".to_string(),
                "feature".to_string(),
            ],
            frontmatter_name_field: String::new(),
            frontmatter_created_field: String::new(),
            frontmatter_modified_field: String::new(),
            frontmatter_date_format: "%Y-%m-%dT%H:%M:%S".to_string(),
        }
    }
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            structural_debounce_ms: 100,
            content_debounce_ms: 400,
            pipeline_batch_size: 50,
            pipeline_queue_capacity: 20_000,
            flush_interval_ms: 2_000,
        }
    }
}

impl CacheSettings {
    /// Parsed folder exclusion patterns with blanks dropped.
    pub fn folder_patterns(&self) -> Vec<FolderPattern> {
        FolderPattern::parse_list(&self.excluded_folders)
    }

    /// Excluded frontmatter keys with blanks dropped.
    pub fn excluded_properties(&self) -> Vec<String> {
        clean_list(&self.excluded_frontmatter_properties)
    }

    /// Whether two settings disagree on anything that decides which
    /// documents are in scope.
    pub fn scope_differs(&self, other: &CacheSettings) -> bool {
        self.excluded_folders != other.excluded_folders
            || self.excluded_frontmatter_properties != other.excluded_frontmatter_properties
    }
}

impl SchedulingSettings {
    pub fn structural_debounce(&self) -> Duration {
        Duration::from_millis(self.structural_debounce_ms)
    }

    pub fn content_debounce(&self) -> Duration {
        Duration::from_millis(self.content_debounce_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl ContentSettings {
    pub fn is_enabled(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Tags => self.show_tags,
            ContentKind::Preview => self.show_preview,
            ContentKind::FeatureImage => self.show_feature_image,
            ContentKind::Metadata => self.use_frontmatter_metadata,
        }
    }

    pub fn enabled_kinds(&self) -> Vec<ContentKind> {
        ContentKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Kinds whose output depends on options that changed between `self`
    /// and `next`, and therefore need regeneration even though the feature
    /// stayed enabled.
    pub fn invalidated_kinds(&self, next: &ContentSettings) -> Vec<ContentKind> {
        let mut kinds = Vec::new();
        if self.skip_headings_in_preview != next.skip_headings_in_preview
            || self.skip_non_text_in_preview != next.skip_non_text_in_preview
        {
            kinds.push(ContentKind::Preview);
        }
        if self.feature_image_properties != next.feature_image_properties {
            kinds.push(ContentKind::FeatureImage);
        }
        if self.frontmatter_name_field != next.frontmatter_name_field
            || self.frontmatter_created_field != next.frontmatter_created_field
            || self.frontmatter_modified_field != next.frontmatter_modified_field
            || self.frontmatter_date_format != next.frontmatter_date_format
        {
            kinds.push(ContentKind::Metadata);
        }
        kinds
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the settings file path inside `dir`.
pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILENAME)
}

/// Loads settings from `dir`, writing defaults when no file exists yet.
pub fn load_or_create_settings(dir: &Path) -> Result<CacheSettings> {
    std::fs::create_dir_all(dir).map_err(|error| {
        CacheError::Internal(format!(
            "failed to create settings directory {}: {error}",
            dir.display()
        ))
    })?;

    let path = settings_path(dir);
    if !path.exists() {
        let settings = CacheSettings::default();
        write_settings(&path, &settings)?;
        return Ok(settings);
    }

    let data = std::fs::read_to_string(&path).map_err(|error| {
        CacheError::Internal(format!(
            "failed to read settings {}: {error}",
            path.display()
        ))
    })?;
    let mut settings: CacheSettings = serde_json::from_str(&data).map_err(|error| {
        CacheError::Serialization(format!(
            "failed to parse settings {}: {error}",
            path.display()
        ))
    })?;

    if settings.version != SETTINGS_VERSION {
        log::info!(
            "upgrading settings {} from version {} to {}",
            path.display(),
            settings.version,
            SETTINGS_VERSION
        );
        settings.version = SETTINGS_VERSION;
        write_settings(&path, &settings)?;
    }
    Ok(settings)
}

pub fn write_settings(path: &Path, settings: &CacheSettings) -> Result<()> {
    let data = serde_json::to_string_pretty(settings).map_err(|error| {
        CacheError::Serialization(format!("failed to serialize settings: {error}"))
    })?;
    std::fs::write(path, data).map_err(|error| {
        CacheError::Internal(format!(
            "failed to write settings {}: {error}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_defaults_when_missing() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let settings = load_or_create_settings(dir.path()).expect("load");
        assert_eq!(settings, CacheSettings::default());
        assert!(settings_path(dir.path()).exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(
            settings_path(dir.path()),
            r#"{"version":1,"excludedFolders":["Archive*"],"content":{"showPreview":false}}"#,
        )
        .expect("write");

        let settings = load_or_create_settings(dir.path()).expect("load");
        assert_eq!(settings.excluded_folders, vec!["Archive*".to_string()]);
        assert!(!settings.content.show_preview);
        assert!(settings.content.show_tags);
        assert_eq!(settings.scheduling.content_debounce_ms, 400);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(settings_path(dir.path()), "{not json").expect("write");
        assert!(matches!(
            load_or_create_settings(dir.path()),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn invalidated_kinds_tracks_option_changes() {
        let before = ContentSettings::default();
        let mut after = before.clone();
        after.skip_headings_in_preview = true;
        after.frontmatter_date_format = "%d.%m.%Y".to_string();
        assert_eq!(
            before.invalidated_kinds(&after),
            vec![ContentKind::Preview, ContentKind::Metadata]
        );
        assert!(before.invalidated_kinds(&before).is_empty());
    }

    #[test]
    fn excluded_properties_drop_blanks() {
        let settings = CacheSettings {
            excluded_frontmatter_properties: vec![" draft ".into(), "".into(), "  ".into()],
            ..CacheSettings::default()
        };
        assert_eq!(settings.excluded_properties(), vec!["draft".to_string()]);
    }
}
