use std::collections::BTreeMap;

use serde_json::Value;
use sha1::{Digest, Sha1};

/// Parameters that impact a computation's outcome. Keys iterate in
/// sorted order, which is what makes the derived identity stable.
pub type ParamSet = BTreeMap<String, Value>;

/// Derive the cache-namespace identity for a (computation type, version,
/// impacts-result parameters) tuple.
///
/// The string doubles as the human-readable log/result tag. Parameters
/// that do not impact the result must never be passed here.
pub fn computation_id(kind: &str, version: &str, params: Option<&ParamSet>) -> String {
    let mut id = format!("{kind}_V{version}");
    if let Some(params) = params {
        if !params.is_empty() {
            id.push('_');
            id.push_str(&normalized_param_string(params));
        }
    }
    id
}

fn normalized_param_string(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}_{}", param_token(value)))
        .collect::<Vec<_>>()
        .join("_")
}

/// Bare strings keep their raw form; everything else is rendered as
/// canonical JSON so that nested maps serialize order-stably.
fn param_token(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => canonical_json(other),
    }
}

/// Canonical JSON: compact, with object keys recursively sorted.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => Value::String(text.clone()).to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut sorted: BTreeMap<&String, String> = BTreeMap::new();
            for (key, item) in map {
                sorted.insert(key, canonical_json(item));
            }
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(key, item)| format!("{}:{item}", Value::String(key.clone())))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

pub fn sha1_hex(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_without_params_is_type_and_version() {
        assert_eq!(computation_id("psnr", "1.0", None), "psnr_V1.0");
        assert_eq!(computation_id("psnr", "1.0", Some(&ParamSet::new())), "psnr_V1.0");
    }

    #[test]
    fn id_appends_sorted_params() {
        let mut params = ParamSet::new();
        params.insert("model".to_string(), json!("v0.6.1"));
        params.insert("block_size".to_string(), json!(16));

        assert_eq!(
            computation_id("vqm", "2.3", Some(&params)),
            "vqm_V2.3_block_size_16_model_v0.6.1"
        );
    }

    #[test]
    fn id_is_insertion_order_independent() {
        let mut forward = ParamSet::new();
        forward.insert("a".to_string(), json!(1));
        forward.insert("b".to_string(), json!(2));

        let mut reverse = ParamSet::new();
        reverse.insert("b".to_string(), json!(2));
        reverse.insert("a".to_string(), json!(1));

        assert_eq!(
            computation_id("m", "1", Some(&forward)),
            computation_id("m", "1", Some(&reverse))
        );
    }

    #[test]
    fn differing_param_values_produce_differing_ids() {
        let mut first = ParamSet::new();
        first.insert("model".to_string(), json!("a"));
        let mut second = ParamSet::new();
        second.insert("model".to_string(), json!("b"));

        assert_ne!(
            computation_id("m", "1", Some(&first)),
            computation_id("m", "1", Some(&second))
        );
    }

    #[test]
    fn canonical_json_sorts_nested_object_keys() {
        let value = json!({"z": {"b": 2, "a": 1}, "a": [1, "two", null]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[1,"two",null],"z":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn sha1_hex_matches_known_digest() {
        // sha1("abc")
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
