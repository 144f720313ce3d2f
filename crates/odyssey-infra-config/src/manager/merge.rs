//! Fragment merging for layered configuration.

use crate::{ConfigFragment, LayeredConfig};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Merge fragments over an optional defaults layer.
///
/// Fragments apply in ascending file-name order and overwrite top-level keys
/// only. Nested objects and arrays are replaced wholesale, never merged.
pub(super) fn merge_fragments(
    defaults: Option<&Map<String, Value>>,
    fragments: &[ConfigFragment],
) -> LayeredConfig {
    let mut ordered = fragments.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| left.name().as_bytes().cmp(right.name().as_bytes()));

    let mut values = defaults.cloned().unwrap_or_default();
    let mut origins = BTreeMap::new();
    for fragment in &ordered {
        for (key, value) in fragment.values() {
            values.insert(key.clone(), value.clone());
            origins.insert(key.clone(), fragment.path().to_path_buf());
        }
    }

    let merged_paths = ordered
        .iter()
        .map(|fragment| fragment.path().to_path_buf())
        .collect();
    LayeredConfig::new(values, origins, merged_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fragment(name: &str, value: Value) -> ConfigFragment {
        match value {
            Value::Object(map) => ConfigFragment::new(name, map),
            _ => panic!("fragment must be an object"),
        }
    }

    #[test]
    fn later_fragment_overrides_top_level_keys() {
        let merged = merge_fragments(
            None,
            &[
                fragment("00-base.json", json!({ "name": "orders", "timeout": 30 })),
                fragment("10-override.json", json!({ "timeout": 60 })),
            ],
        );
        assert_eq!(merged.get("name"), Some(&json!("orders")));
        assert_eq!(merged.get("timeout"), Some(&json!(60)));
        assert_eq!(
            merged.origin("timeout").map(|path| path.display().to_string()),
            Some("10-override.json".to_string())
        );
    }

    #[test]
    fn nested_objects_are_replaced_not_merged() {
        let merged = merge_fragments(
            None,
            &[
                fragment(
                    "a.json",
                    json!({ "env": { "A": "1", "B": "2" }, "tags": ["x", "y"] }),
                ),
                fragment("b.json", json!({ "env": { "C": "3" }, "tags": ["z"] })),
            ],
        );
        assert_eq!(merged.get("env"), Some(&json!({ "C": "3" })));
        assert_eq!(merged.get("tags"), Some(&json!(["z"])));
    }

    #[test]
    fn merge_order_follows_names_not_input_order() {
        let merged = merge_fragments(
            None,
            &[
                fragment("b.json", json!({ "value": "b" })),
                fragment("a.json", json!({ "value": "a" })),
            ],
        );
        assert_eq!(merged.get("value"), Some(&json!("b")));
        let order = merged
            .fragments()
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["a.json", "b.json"]);
    }

    #[test]
    fn ordering_is_case_sensitive() {
        // Uppercase sorts before lowercase byte-wise.
        let merged = merge_fragments(
            None,
            &[
                fragment("a.json", json!({ "value": "lower" })),
                fragment("Z.json", json!({ "value": "upper" })),
            ],
        );
        assert_eq!(merged.get("value"), Some(&json!("lower")));
    }

    #[test]
    fn defaults_sit_beneath_every_fragment() {
        let defaults = json!({ "billing_mode": "PAY_PER_REQUEST", "pitr": true });
        let merged = merge_fragments(
            defaults.as_object(),
            &[fragment("table.json", json!({ "pitr": false }))],
        );
        assert_eq!(merged.get("billing_mode"), Some(&json!("PAY_PER_REQUEST")));
        assert_eq!(merged.get("pitr"), Some(&json!(false)));
        assert_eq!(merged.origin("billing_mode"), None);
    }

    #[test]
    fn grouping_does_not_change_the_result() {
        let a = fragment("00.json", json!({ "x": 1, "y": 1, "z": 1 }));
        let b = fragment("10.json", json!({ "y": 2, "z": 2 }));
        let c = fragment("20.json", json!({ "z": 3 }));

        let flat = merge_fragments(None, &[a.clone(), b.clone(), c.clone()]);

        let left = merge_fragments(None, &[a.clone(), b.clone()]);
        let left_grouped = merge_fragments(
            None,
            &[ConfigFragment::new("10.json", left.values().clone()), c.clone()],
        );

        let right = merge_fragments(None, &[b, c]);
        let right_grouped = merge_fragments(
            None,
            &[a, ConfigFragment::new("20.json", right.values().clone())],
        );

        assert_eq!(flat.values(), left_grouped.values());
        assert_eq!(flat.values(), right_grouped.values());
        assert_eq!(flat.get("x"), Some(&json!(1)));
        assert_eq!(flat.get("y"), Some(&json!(2)));
        assert_eq!(flat.get("z"), Some(&json!(3)));
    }
}
