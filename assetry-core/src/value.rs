//! Argument values.
//!
//! A [Value] is what gets bound to a materializer parameter. Templates resolve
//! placeholders against values, so besides scalars a value can be a sequence,
//! a mapping or a whole [AssetDefinition], which lets one asset's template
//! refer to another asset's resolved `name` or `path`.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use serde::ser::{Serialize, Serializer};

use crate::asset::AssetDefinition;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Asset(Arc<AssetDefinition>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Asset(_) => "asset",
        }
    }

    /// Build an object value from key/value pairs.
    pub fn object<K: Into<String>, V: Into<Value>>(items: impl IntoIterator<Item = (K, V)>) -> Value {
        Value::Object(items.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Value {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_asset(&self) -> Option<&AssetDefinition> {
        match self {
            Value::Asset(asset) => Some(asset.as_ref()),
            _ => None,
        }
    }

    /// Text substituted into a template.
    pub fn render(&self) -> String {
        match self {
            Value::None => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::I64(i) => i.to_string(),
            Value::F64(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
            Value::Asset(asset) => asset.path().to_owned(),
        }
    }

    /// `.name` access
    pub fn attribute(&self, name: &str) -> Result<Value, String> {
        match self {
            Value::Object(map) => map
                .get(name)
                .cloned()
                .ok_or_else(|| format!("object has no attribute '{}'", name)),
            Value::Asset(asset) => asset
                .attribute(name)
                .ok_or_else(|| format!("asset '{}' has no attribute '{}'", asset.fn_name(), name)),
            _ => Err(format!("{} has no attribute '{}'", self.type_name(), name)),
        }
    }

    /// `[n]` access; negative indices count from the end.
    pub fn index(&self, index: i64) -> Result<Value, String> {
        fn normalize(index: i64, len: usize) -> Option<usize> {
            let i = if index < 0 { len as i64 + index } else { index };
            if i >= 0 && (i as usize) < len {
                Some(i as usize)
            } else {
                None
            }
        }
        match self {
            Value::Array(items) => normalize(index, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| format!("index {} out of range for array of length {}", index, items.len())),
            Value::Text(s) => {
                let chars = s.chars().collect::<Vec<_>>();
                normalize(index, chars.len())
                    .map(|i| Value::Text(chars[i].to_string()))
                    .ok_or_else(|| format!("index {} out of range for text of length {}", index, chars.len()))
            }
            _ => Err(format!("{} is not indexable", self.type_name())),
        }
    }

    /// `[key]` access
    pub fn key(&self, key: &str) -> Result<Value, String> {
        match self {
            Value::Object(map) => map.get(key).cloned().ok_or_else(|| {
                format!(
                    "key '{}' not found, available keys: {}",
                    key,
                    map.keys().join(", ")
                )
            }),
            _ => Err(format!("{} is not a mapping", self.type_name())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::I64(i) => serde_json::Value::from(*i),
            Value::F64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Asset(asset) => serde_json::json!({
                "asset": asset.fn_name(),
                "name": asset.name(),
                "path": asset.path(),
            }),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::I64(i),
                None => Value::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I64(i as i64)
    }
}
impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::I64(i as i64)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}
impl From<AssetDefinition> for Value {
    fn from(asset: AssetDefinition) -> Self {
        Value::Asset(Arc::new(asset))
    }
}
impl From<&AssetDefinition> for Value {
    fn from(asset: &AssetDefinition) -> Self {
        Value::Asset(Arc::new(asset.clone()))
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

/// Conversion of a bound argument into a typed materializer parameter.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::I64(_) | Value::F64(_) | Value::Bool(_) => Ok(value.render()),
            _ => Err(Error::conversion_error(value.type_name(), "string")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::I64(i) => Ok(*i),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::conversion_error(s, "integer")),
            _ => Err(Error::conversion_error(value.type_name(), "integer")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::F64(f) => Ok(*f),
            Value::I64(i) => Ok(*i as f64),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::conversion_error(s, "float")),
            _ => Err(Error::conversion_error(value.type_name(), "float")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::I64(i) => Ok(*i != 0),
            Value::Text(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(true),
                "false" | "f" | "no" | "n" | "0" | "" => Ok(false),
                _ => Err(Error::conversion_error(s, "bool")),
            },
            _ => Err(Error::conversion_error(value.type_name(), "bool")),
        }
    }
}

impl FromValue for AssetDefinition {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Asset(asset) => Ok(asset.as_ref().clone()),
            _ => Err(Error::conversion_error(value.type_name(), "asset")),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.to_json())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::None => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            _ => Err(Error::conversion_error(value.type_name(), "array")),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(v)?)))
                .collect(),
            _ => Err(Error::conversion_error(value.type_name(), "object")),
        }
    }
}
