//! Recursive JSON merge used for payload overlays.

use serde_json::Value;

/// Merge `overlay` into `base`.
///
/// Objects merge key by key, recursively. Every other value (scalars,
/// arrays, null) in `overlay` replaces what was in `base`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
