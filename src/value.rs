//! Dynamic values for free-form attributes.
//!
//! Some attributes (policy data scopes, connected app settings, data
//! integration configs) accept arbitrary nested maps and lists. They are
//! carried as [`DynamicValue`], converted explicitly to and from JSON.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::error::{ProviderError, Result};

/// A dynamically typed, non-null value.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    /// A string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// A number, integer or float.
    Number(Number),
    /// An ordered list.
    List(Vec<DynamicValue>),
    /// A string-keyed map.
    Map(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    /// Convert from JSON.
    ///
    /// A top-level `null` is `Ok(None)` (absent). `null` map entries are
    /// dropped; `null` list elements are rejected, naming the element path.
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        convert(value, "")
    }

    /// Convert a JSON object into a map, dropping `null` entries.
    pub fn map_from_json(value: &Value) -> Result<Option<BTreeMap<String, DynamicValue>>> {
        match Self::from_json(value)? {
            None => Ok(None),
            Some(Self::Map(map)) => Ok(Some(map)),
            Some(other) => Err(ProviderError::Validation(format!(
                "expected a map, got {}",
                other.type_name()
            ))),
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert a map to a JSON object.
    pub fn map_to_json(map: &BTreeMap<String, DynamicValue>) -> Value {
        Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }

    /// Short name of the variant, for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

fn convert(value: &Value, path: &str) -> Result<Option<DynamicValue>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::String(s) => DynamicValue::String(s.clone()),
        Value::Bool(b) => DynamicValue::Bool(*b),
        Value::Number(n) => DynamicValue::Number(n.clone()),
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = child_path(path, &i.to_string());
                match convert(item, &item_path)? {
                    Some(v) => list.push(v),
                    None => {
                        return Err(ProviderError::Validation(format!(
                            "null is not allowed in a list (at '{}')",
                            item_path
                        )))
                    },
                }
            }
            DynamicValue::List(list)
        },
        Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (key, item) in obj {
                if let Some(v) = convert(item, &child_path(path, key))? {
                    map.insert(key.clone(), v);
                }
            }
            DynamicValue::Map(map)
        },
    }))
}

fn child_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

impl Serialize for DynamicValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DynamicValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DynamicValue::from_json(&value)
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("expected a value, got null"))
    }
}

impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for DynamicValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for DynamicValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}
