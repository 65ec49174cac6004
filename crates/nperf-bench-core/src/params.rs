//! Role parameters and their translation to workload flags.
//!
//! A parameter value has exactly three meanings on the workload command
//! line, so it is modelled as a tagged variant rather than a loose JSON
//! value:
//!
//! | config value         | [`ParamValue`]      | emitted          |
//! |----------------------|---------------------|------------------|
//! | `false` / `null`     | `Absent`            | nothing          |
//! | `true`               | `Present`           | `--key`          |
//! | string / number      | `Value(text)`       | `--key text`     |

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ConfigError;

/// A single resolved parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Flag omitted.
    Absent,
    /// Bare `--key`.
    Present,
    /// `--key value`.
    Value(String),
}

impl ParamValue {
    /// Convert a configuration value. Arrays and objects have no flag form.
    pub fn from_json(scope: &str, key: &str, value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Null | Value::Bool(false) => Ok(ParamValue::Absent),
            Value::Bool(true) => Ok(ParamValue::Present),
            Value::String(s) => Ok(ParamValue::Value(s.clone())),
            Value::Number(n) => Ok(ParamValue::Value(n.to_string())),
            Value::Array(_) | Value::Object(_) => Err(ConfigError::UnsupportedValue {
                scope: scope.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Text of a `Value`, `None` for the flag-only variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Value(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Absent => serializer.serialize_bool(false),
            ParamValue::Present => serializer.serialize_bool(true),
            ParamValue::Value(s) => serializer.serialize_str(s),
        }
    }
}

/// Ordered parameter map.
///
/// Keys keep the position of their first insertion; inserting an existing
/// key replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, ParamValue)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a configuration object, preserving key order.
    pub fn from_json_object(scope: &str, object: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut map = ParamMap::new();
        for (key, value) in object {
            map.insert(key.clone(), ParamValue::from_json(scope, key, value)?);
        }
        Ok(map)
    }

    /// Insert or override a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Overlay `other` on top of `self`: same key, `other` wins.
    pub fn merge(&mut self, other: &ParamMap) {
        for (key, value) in &other.entries {
            self.insert(key.clone(), value.clone());
        }
    }

    /// Return `base` overlaid with each layer in turn.
    pub fn layered(base: &ParamMap, layers: &[&ParamMap]) -> ParamMap {
        let mut merged = base.clone();
        for layer in layers {
            merged.merge(layer);
        }
        merged
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Parse a `Value` parameter as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)
            .and_then(ParamValue::as_str)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.ceil() as u64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the map as workload flags, in map order.
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in &self.entries {
            match value {
                ParamValue::Absent => {}
                ParamValue::Present => flags.push(format!("--{}", key)),
                ParamValue::Value(v) => {
                    flags.push(format!("--{}", key));
                    flags.push(v.clone());
                }
            }
        }
        flags
    }
}

impl fmt::Display for ParamMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_flags().join(" "))
    }
}

impl Serialize for ParamMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
