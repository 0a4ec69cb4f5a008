//! Deep merge of YAML documents
//!
//! Mappings merge key by key, recursively. Any other overlay value replaces
//! the base value. A mapping replaced by a scalar (or the reverse) is logged
//! as a type conflict.

use serde_yaml_ng::Value;

/// Merge `overlay` into `base` in place
pub fn deep_merge(base: &mut Value, overlay: Value) {
    deep_merge_at(base, overlay, "");
}

fn deep_merge_at(base: &mut Value, overlay: Value, path: &str) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let child_path = join_path(path, &key);
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge_at(existing, value, &child_path),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => {
            if base.is_mapping() != overlay.is_mapping() && !base.is_null() {
                tracing::warn!(
                    key = %display_path(path),
                    "configuration type conflict, overriding value"
                );
            }
            *base = overlay;
        }
    }
}

fn join_path(parent: &str, key: &Value) -> String {
    let key = match key {
        Value::String(s) => s.clone(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    };
    if parent.is_empty() {
        key
    } else {
        format!("{}.{}", parent, key)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
