//! Manifest loading.
//!
//! A manifest is a JSON (or YAML, by extension) list of
//! `{"name": ..., "url": ..., "format": ...}` objects. Invalid entries are
//! skipped with a warning; a missing, unreadable, or empty manifest is fatal.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::{ForgeError, Result};
use crate::types::{FormatHint, SourceDescriptor};

/// Load and validate a manifest file.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<SourceDescriptor>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| {
        ForgeError::Manifest(format!("Failed to read manifest '{}': {}", path.display(), e))
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    parse_manifest(&text, is_yaml)
}

/// Parse manifest text.
pub fn parse_manifest(text: &str, is_yaml: bool) -> Result<Vec<SourceDescriptor>> {
    let value: Value = if is_yaml {
        serde_yaml::from_str(text)
            .map_err(|e| ForgeError::Manifest(format!("Invalid manifest YAML: {}", e)))?
    } else {
        serde_json::from_str(text)
            .map_err(|e| ForgeError::Manifest(format!("Invalid manifest JSON: {}", e)))?
    };

    let Value::Array(items) = value else {
        return Err(ForgeError::Manifest("Manifest must be a list".to_string()));
    };
    if items.is_empty() {
        return Err(ForgeError::Manifest("Manifest is empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(items.len());

    for (idx, item) in items.iter().enumerate() {
        match parse_entry(item) {
            Ok(source) => {
                if seen.insert(source.name.clone()) {
                    sources.push(source);
                } else {
                    warn!("skipping manifest entry {}: duplicate name '{}'", idx, source.name);
                }
            }
            Err(reason) => warn!("skipping manifest entry {}: {} ({})", idx, reason, item),
        }
    }

    if sources.is_empty() {
        return Err(ForgeError::Manifest(
            "Manifest has no valid entries".to_string(),
        ));
    }

    Ok(sources)
}

fn string_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_entry(item: &Value) -> std::result::Result<SourceDescriptor, String> {
    if !item.is_object() {
        return Err("not an object".to_string());
    }

    let name = string_field(item, "name").ok_or("missing name")?;
    let url = string_field(item, "url").ok_or("missing url")?;

    if !is_safe_name(name) {
        return Err(format!("unsafe name '{}'", name));
    }

    let format = match string_field(item, "format") {
        Some(f) => f.parse::<FormatHint>().map_err(|e| e.to_string())?,
        None => FormatHint::Auto,
    };

    Ok(SourceDescriptor::new(name, url, format))
}

/// Names become file names: no separators, no hidden or relative names.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
