use serde_json::Value;

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-by-key; any other value (including arrays) replaces the
/// base wholesale. This is the merge used both for layering at startup and
/// for `settings.json` saves.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::deep_merge;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_key_by_key() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        deep_merge(&mut base, json!({"a": {"y": 20, "z": 30}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3}));
    }

    #[test]
    fn arrays_replace_rather_than_append() {
        let mut base = json!({"list": [1, 2, 3]});
        deep_merge(&mut base, json!({"list": [9]}));
        assert_eq!(base, json!({"list": [9]}));
    }

    #[test]
    fn scalar_overlay_replaces_object() {
        let mut base = json!({"a": {"x": 1}});
        deep_merge(&mut base, json!({"a": null}));
        assert_eq!(base, json!({"a": null}));
    }
}
