//! Settings changes and document tag edits.

use std::sync::Arc;

use fnv::FnvHashMap;

use super::sync::ScopeCheck;
use super::NoteCache;
use crate::content::tags::{normalize_tag, tag_key};
use crate::error::{CacheError, Result};
use crate::settings::{write_settings, CacheSettings};
use crate::types::{ChangedFields, ContentChange, ContentKind};
use crate::validate::{validate_property_name, validate_tag_name};

impl NoteCache {
    /// Resets `kind` to pending for every record and announces the cleared
    /// paths. When the feature is enabled the records are re-queued.
    pub fn batch_clear_field(&self, kind: ContentKind) -> Vec<String> {
        let cleared = self.inner.store.batch_clear_field(kind);
        self.inner.notifier.emit(
            cleared
                .iter()
                .map(|path| ContentChange::new(path.clone(), kind.field()))
                .collect(),
        );
        let content = self.inner.settings.read().content.clone();
        if content.is_enabled(kind) {
            self.inner.pipeline.queue(&cleared, &content);
        }
        cleared
    }

    /// Replaces the settings and reconciles the cache with them.
    ///
    /// Disabled features have their values cleared; features whose options
    /// changed are cleared and derived again. A change of the exclusion
    /// settings triggers a full rescan, and tag display settings republish
    /// the tag trees.
    pub async fn update_settings(&self, next: CacheSettings) -> Result<()> {
        validate_settings(&next)?;
        let previous = std::mem::replace(&mut *self.inner.settings.write(), next.clone());
        if previous == next {
            return Ok(());
        }
        if let Some(path) = &self.inner.settings_path {
            write_settings(path, &next)?;
        }

        let invalidated = previous.content.invalidated_kinds(&next.content);
        let mut changed: FnvHashMap<String, ChangedFields> = FnvHashMap::default();
        for kind in ContentKind::ALL {
            let was_enabled = previous.content.is_enabled(kind);
            let is_enabled = next.content.is_enabled(kind);
            let clear = (was_enabled && !is_enabled) || (is_enabled && invalidated.contains(&kind));
            if !clear {
                continue;
            }
            let cleared = self.inner.store.batch_clear_field(kind);
            log::debug!("Cleared {} for {} documents", kind.as_str(), cleared.len());
            for path in cleared {
                *changed.entry(path).or_default() |= kind.field();
            }
        }
        let mut changes: Vec<ContentChange> = changed
            .into_iter()
            .map(|(path, fields)| ContentChange::new(path, fields))
            .collect();
        changes.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        self.inner.notifier.emit(changes);

        if previous.scope_differs(&next) {
            self.sync_with(ScopeCheck::All).await?;
        } else {
            self.inner.pipeline.queue_pending(&next.content);
        }

        if previous.scope_differs(&next)
            || previous.favorite_tags != next.favorite_tags
            || previous.hidden_tags != next.hidden_tags
        {
            self.rebuild_tag_tree_blocking().await;
        }
        log::info!("Note cache settings updated");
        Ok(())
    }

    /// Adds `tag` to the frontmatter tags of the document at `path`.
    ///
    /// Tags below `tag` are removed from the document, since the new tag
    /// covers them. Returns false when the document already had the tag.
    pub async fn add_tag(&self, path: &str, tag: &str) -> Result<bool> {
        let tag = validate_tag_name(tag)?;
        let key = tag_key(&tag);
        let descendant_prefix = format!("{key}/");

        self.edit_tags(path, move |tags| {
            if tags.iter().any(|existing| tag_key(existing) == key) {
                return false;
            }
            tags.retain(|existing| !tag_key(existing).starts_with(&descendant_prefix));
            tags.push(tag);
            true
        })
        .await
    }

    /// Removes `tag` from the frontmatter tags of the document at `path`.
    /// Returns false when the document did not have the tag.
    pub async fn remove_tag(&self, path: &str, tag: &str) -> Result<bool> {
        let key = tag_key(&validate_tag_name(tag)?);

        self.edit_tags(path, move |tags| {
            let before = tags.len();
            tags.retain(|existing| tag_key(existing) != key);
            tags.len() != before
        })
        .await
    }

    /// Reads the frontmatter tags of `path`, lets `edit` change them and
    /// writes them back when it reports a change. The cache then resyncs to
    /// pick up the rewritten document.
    async fn edit_tags<F>(&self, path: &str, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<String>) -> bool + Send + 'static,
    {
        if self.is_stopped() {
            return Err(CacheError::InvalidInput("note cache is stopped".to_string()));
        }
        let collection = Arc::clone(&self.inner.collection);
        let owned_path = path.to_string();
        let written = tokio::task::spawn_blocking(move || -> Result<bool> {
            let frontmatter = collection.frontmatter(&owned_path)?;
            let mut tags: Vec<String> = frontmatter
                .map(|frontmatter| {
                    let mut tags = frontmatter.string_list("tags");
                    tags.extend(frontmatter.string_list("tag"));
                    tags
                })
                .unwrap_or_default()
                .iter()
                .filter_map(|raw| normalize_tag(raw))
                .collect();
            if !edit(&mut tags) {
                return Ok(false);
            }
            collection.write_tags(&owned_path, &tags)?;
            Ok(true)
        })
        .await
        .map_err(|error| CacheError::Internal(format!("tag write task failed: {error}")))??;

        if written {
            log::debug!("Rewrote tags of {path}");
            self.sync_now().await?;
        }
        Ok(written)
    }
}

/// Checks every configured frontmatter key.
fn validate_settings(settings: &CacheSettings) -> Result<()> {
    for property in &settings.excluded_frontmatter_properties {
        if !property.trim().is_empty() {
            validate_property_name(property)?;
        }
    }
    let content = &settings.content;
    for property in content.feature_image_properties.iter().chain([
        &content.frontmatter_name_field,
        &content.frontmatter_created_field,
        &content.frontmatter_modified_field,
    ]) {
        if !property.is_empty() {
            validate_property_name(property)?;
        }
    }
    Ok(())
}
