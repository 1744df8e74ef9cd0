//! JSON merge helpers for layered configuration.

use serde_json::Value;

/// Merge overlay values into the base, recursively overriding objects.
///
/// A domain block that switches `provider` replaces the base block wholesale,
/// so parameters of one backend never leak into another.
pub(super) fn merge_json_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if switches_backend(existing, value) => {
                        *existing = value.clone();
                    }
                    Some(existing) => merge_json_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

fn switches_backend(existing: &Value, overlay: &Value) -> bool {
    match (existing.get("provider"), overlay.get("provider")) {
        (Some(current), Some(next)) => current != next,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::merge_json_values;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn merges_nested_objects() {
        let mut base = json!({ "working": { "provider": "memory", "max_messages": 10 } });
        merge_json_values(&mut base, &json!({ "working": { "ttl_seconds": 5 } }));
        assert_eq!(
            base,
            json!({ "working": { "provider": "memory", "max_messages": 10, "ttl_seconds": 5 } })
        );
    }

    #[test]
    fn backend_switch_replaces_block() {
        let mut base = json!({ "profile": { "provider": "memory", "capacity": 3 } });
        merge_json_values(
            &mut base,
            &json!({ "profile": { "provider": "sqlite", "path": "/tmp/p.db" } }),
        );
        assert_eq!(
            base,
            json!({ "profile": { "provider": "sqlite", "path": "/tmp/p.db" } })
        );
    }
}
