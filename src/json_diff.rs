//! Semantic comparison of JSON and YAML documents.
//!
//! Documents stored as strings (dashboard presets, pipeline configs) come back
//! from the API reformatted. Comparing them after parsing avoids reporting
//! whitespace or key-order changes as drift.

use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

/// Whether two JSON texts describe the same value.
///
/// Falls back to exact string comparison if either side does not parse.
pub fn json_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<JsonValue>(a),
        serde_json::from_str::<JsonValue>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Whether two YAML texts describe the same value.
///
/// Falls back to exact string comparison if either side does not parse.
pub fn yaml_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_yaml::from_str::<YamlValue>(a),
        serde_yaml::from_str::<YamlValue>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Pick the text to keep in state: the local text if the remote one is
/// equivalent to it, otherwise the remote text.
pub fn reconcile<F>(local: Option<&str>, remote: &str, equivalent: F) -> String
where
    F: Fn(&str, &str) -> bool,
{
    match local {
        Some(local) if equivalent(local, remote) => local.to_string(),
        _ => remote.to_string(),
    }
}

/// [`reconcile`] for JSON documents.
pub fn reconcile_json(local: Option<&str>, remote: &str) -> String {
    reconcile(local, remote, json_equivalent)
}

/// [`reconcile`] for YAML documents.
pub fn reconcile_yaml(local: Option<&str>, remote: &str) -> String {
    reconcile(local, remote, yaml_equivalent)
}

/// Whether a string is valid JSON.
pub fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<JsonValue>(text).is_ok()
}

/// Whether a string is valid YAML.
pub fn is_valid_yaml(text: &str) -> bool {
    serde_yaml::from_str::<YamlValue>(text).is_ok()
}
