// Cache key construction.
// Keys look like `{namespace}:{feature}:{params}` with params rendered as JSON
// with sorted object keys, so field order never produces distinct keys.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Namespace used for AI feature responses.
pub const AI_NAMESPACE: &str = "ai";

/// Build the cache key for a feature call.
pub fn cache_key<P: Serialize + ?Sized>(namespace: &str, feature: &str, params: &P) -> String {
    let params = match serde_json::to_value(params) {
        Ok(value) => value,
        Err(e) => {
            warn!(feature, "cache key params are not JSON-serializable: {}", e);
            Value::Null
        }
    };
    format!("{}:{}:{}", namespace, feature, sorted_json(&params))
}

/// Prefix shared by every key of a feature, for `invalidate_by_prefix`.
pub fn feature_prefix(namespace: &str, feature: &str) -> String {
    format!("{}:{}:", namespace, feature)
}

/// Storage key for a persisted cache, e.g. `ai-cache-store`.
pub fn storage_key(prefix: &str) -> String {
    format!("{}-store", prefix)
}

/// Compact JSON with object keys sorted at every depth.
pub fn sorted_json(value: &Value) -> String {
    let mut out = String::new();
    write_sorted(value, &mut out);
    out
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_sorted(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_order_does_not_matter() {
        let a = json!({ "question": "2+2?", "course": 7, "opts": { "z": 1, "a": [ { "y": 2, "b": 1 } ] } });
        let b = json!({ "opts": { "a": [ { "b": 1, "y": 2 } ], "z": 1 }, "course": 7, "question": "2+2?" });

        assert_eq!(cache_key("ai", "hint", &a), cache_key("ai", "hint", &b));
        assert_eq!(
            cache_key("ai", "hint", &a),
            r#"ai:hint:{"course":7,"opts":{"a":[{"b":1,"y":2}],"z":1},"question":"2+2?"}"#
        );
    }

    #[test]
    fn test_struct_params() {
        #[derive(Serialize)]
        struct Params<'a> {
            topic: &'a str,
            level: u8,
        }

        let key = cache_key("ai", "feedback", &Params { topic: "fractions", level: 2 });
        assert_eq!(key, r#"ai:feedback:{"level":2,"topic":"fractions"}"#);
        assert!(key.starts_with(&feature_prefix("ai", "feedback")));
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("ai-cache"), "ai-cache-store");
    }

    #[test]
    fn test_strings_are_escaped() {
        let key = cache_key("ai", "chat", &json!({ "q": "say \"hi\"" }));
        assert_eq!(key, r#"ai:chat:{"q":"say \"hi\""}"#);
    }
}
