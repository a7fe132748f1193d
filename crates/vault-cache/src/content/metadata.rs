//! Frontmatter-derived display name and dates.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_yaml::Value;

use super::frontmatter::Frontmatter;
use crate::settings::ContentSettings;
use crate::types::{DocumentMetadata, MetadataField};

/// Formats tried after the configured one fails.
const FALLBACK_DATETIME_FORMATS: [&str; 3] =
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Extracts the configured metadata fields from a document's frontmatter.
///
/// Each field is independent: an unconfigured key yields `NotConfigured`, a
/// configured key without a usable value yields `Missing`.
pub fn extract_metadata(
    frontmatter: Option<&Frontmatter>,
    settings: &ContentSettings,
) -> DocumentMetadata {
    DocumentMetadata {
        name: extract_field(frontmatter, &settings.frontmatter_name_field, |value| {
            scalar_text(value)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
        }),
        created: extract_field(frontmatter, &settings.frontmatter_created_field, |value| {
            parse_timestamp(value, &settings.frontmatter_date_format)
        }),
        modified: extract_field(frontmatter, &settings.frontmatter_modified_field, |value| {
            parse_timestamp(value, &settings.frontmatter_date_format)
        }),
    }
}

fn extract_field<T>(
    frontmatter: Option<&Frontmatter>,
    key: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> MetadataField<T> {
    let key = key.trim();
    if key.is_empty() {
        return MetadataField::NotConfigured;
    }
    frontmatter
        .and_then(|frontmatter| frontmatter.get(key))
        .and_then(parse)
        .map(MetadataField::Value)
        .unwrap_or(MetadataField::Missing)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Converts a frontmatter value to epoch milliseconds.
///
/// Numbers are taken as epoch milliseconds; strings are parsed with the
/// configured format first, then with RFC 3339 and common ISO layouts.
/// Dates without a time resolve to midnight UTC.
pub fn parse_timestamp(value: &Value, format: &str) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => parse_date_string(text.trim(), format),
        _ => None,
    }
}

pub fn parse_date_string(text: &str, format: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    let format = format.trim();
    if !format.is_empty() {
        if let Some(millis) = parse_with_format(text, format) {
            return Some(millis);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    FALLBACK_DATETIME_FORMATS
        .iter()
        .find_map(|fallback| parse_with_format(text, fallback))
        .or_else(|| parse_with_format(text, "%Y-%m-%d"))
}

fn parse_with_format(text: &str, format: &str) -> Option<i64> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
        return Some(datetime.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}
