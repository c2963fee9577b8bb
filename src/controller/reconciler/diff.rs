//! # Diff
//!
//! Derivative equality between a desired object and the live one. The live
//! side may carry extra fields (defaults filled by the API server, fields
//! owned by other writers); only what the desired side sets is compared, and
//! empty desired values are treated as unset.

use serde_json::Value;

/// Metadata maintained by the API server, never part of a comparison
const BOOKKEEPING: [&str; 5] = [
    "managedFields",
    "resourceVersion",
    "generation",
    "uid",
    "creationTimestamp",
];

/// Remove the server-maintained metadata fields
#[must_use]
pub fn strip_bookkeeping(mut value: Value) -> Value {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in BOOKKEEPING {
            meta.remove(field);
        }
    }
    value
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Whether `live` already holds everything `desired` sets.
///
/// Unset desired values always match. Objects match when every desired key
/// matches the live one (a missing live key counts as null). Arrays must have
/// the same length and match element by element.
#[must_use]
pub fn contains(desired: &Value, live: &Value) -> bool {
    if is_unset(desired) {
        return true;
    }
    match (desired, live) {
        (Value::Object(want), Value::Object(got)) => want
            .iter()
            .all(|(k, v)| contains(v, got.get(k).unwrap_or(&Value::Null))),
        (Value::Array(want), Value::Array(got)) => {
            want.len() == got.len() && want.iter().zip(got).all(|(w, g)| contains(w, g))
        }
        (Value::Number(want), Value::Number(got)) => want.as_f64() == got.as_f64(),
        (want, got) => want == got,
    }
}

/// Both sides stripped of bookkeeping, then compared
#[must_use]
pub fn up_to_date(desired: Value, live: Value) -> bool {
    contains(&strip_bookkeeping(desired), &strip_bookkeeping(live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_live_fields_are_tolerated() {
        let desired = json!({"spec": {"replicas": 1, "template": {"metadata": {"labels": {"a": "b"}}}}});
        let live = json!({
            "spec": {
                "replicas": 1,
                "progressDeadlineSeconds": 600,
                "template": {"metadata": {"labels": {"a": "b", "pod-template-hash": "x"}}}
            },
            "status": {"availableReplicas": 1}
        });
        assert!(contains(&desired, &live));
    }

    #[test]
    fn test_differing_or_missing_field_is_a_change() {
        let desired = json!({"spec": {"replicas": 2}});
        assert!(!contains(&desired, &json!({"spec": {"replicas": 1}})));
        assert!(!contains(&desired, &json!({"spec": {}})));
        assert!(!contains(&desired, &json!({})));
    }

    #[test]
    fn test_empty_desired_values_are_ignored() {
        let desired = json!({"a": "", "b": [], "c": {}, "d": null});
        assert!(contains(&desired, &json!({"a": "x", "b": [1], "c": {"k": "v"}})));
        assert!(contains(&desired, &json!({})));
    }

    #[test]
    fn test_false_and_zero_are_compared() {
        assert!(!contains(&json!({"x": false}), &json!({})));
        assert!(!contains(&json!({"x": 0}), &json!({"x": 1})));
        assert!(contains(&json!({"x": 1}), &json!({"x": 1.0})));
    }

    #[test]
    fn test_arrays_compare_by_position() {
        let desired = json!({"ports": [{"port": 25}, {"port": 587}]});
        assert!(contains(
            &desired,
            &json!({"ports": [{"port": 25, "protocol": "TCP"}, {"port": 587, "protocol": "TCP"}]})
        ));
        assert!(!contains(&desired, &json!({"ports": [{"port": 587}, {"port": 25}]})));
        assert!(!contains(&desired, &json!({"ports": [{"port": 25}]})));
    }

    #[test]
    fn test_bookkeeping_is_stripped() {
        let desired = json!({"metadata": {"name": "a", "resourceVersion": "7", "generation": 3}});
        let live = json!({"metadata": {"name": "a", "resourceVersion": "9", "generation": 4, "uid": "u"}});
        assert!(!contains(&desired, &live));
        assert!(up_to_date(desired, live));
    }
}
