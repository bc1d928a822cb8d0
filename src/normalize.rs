use serde_json::Value;

/// Replaces top-level string values that hold JSON with the decoded value.
///
/// Permissive on purpose: strings that do not parse stay as they are. A value
/// is decoded until it is no longer a JSON-bearing string, which makes the
/// function idempotent. Nested values below the top level are left alone.
pub fn normalize_state(mut state: Value) -> Value {
    if let Value::Object(map) = &mut state {
        for value in map.values_mut() {
            while let Some(decoded) = decode_embedded(value) {
                *value = decoded;
            }
        }
    }
    state
}

fn decode_embedded(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_json_strings_only() {
        let state = json!({ "a": "5", "b": "[1,2,3]", "c": "not json" });
        assert_eq!(
            normalize_state(state),
            json!({ "a": 5, "b": [1, 2, 3], "c": "not json" })
        );
    }

    #[test]
    fn nested_strings_are_not_decoded() {
        let state = json!({
            "outer": "{\"inner\":\"[1]\"}",
            "obj": { "deep": "42" }
        });
        assert_eq!(
            normalize_state(state),
            json!({ "outer": { "inner": "[1]" }, "obj": { "deep": "42" } })
        );
    }

    #[test]
    fn double_encoded_values_settle() {
        let once = serde_json::to_string(&json!({ "listing": {} })).unwrap();
        let twice = serde_json::to_string(&once).unwrap();
        let state = json!({ "s": twice, "q": "\"plain\"" });
        assert_eq!(
            normalize_state(state),
            json!({ "s": { "listing": {} }, "q": "plain" })
        );
    }

    #[test]
    fn idempotent() {
        let inputs = [
            json!({ "a": "5", "b": "\"\\\"7\\\"\"", "c": "x", "d": "{\"k\":\"[2]\"}" }),
            json!({ "empty": "", "ws": "  ", "null": "null", "t": "true" }),
            json!([ "1", "2" ]),
            json!("123"),
            json!({}),
        ];
        for input in inputs {
            let once = normalize_state(input.clone());
            let twice = normalize_state(once.clone());
            assert_eq!(once, twice, "input {input}");
        }
    }

    #[test]
    fn non_objects_pass_through() {
        assert_eq!(normalize_state(json!(["5"])), json!(["5"]));
        assert_eq!(normalize_state(json!("5")), json!("5"));
    }

    #[test]
    fn key_order_is_kept() {
        let state = json!({ "z": "1", "a": "2", "m": "x" });
        let keys: Vec<_> = normalize_state(state)
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }
}
