//! Header values
//!
//! Header sections nest arbitrarily (`<FILER>` holds `<COMPANY-DATA>` holds
//! `<CONFORMED-NAME>`), and a tag may repeat within one scope. Values are a
//! tagged variant so that shape stays checkable.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A decoded header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    Map(OrderedMap),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&OrderedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Empty scalar or empty map
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(s) => s.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::List(items) => items.is_empty(),
        }
    }

    /// Convert into a JSON value, renaming keys with `key_fn`
    pub fn to_json_with(&self, key_fn: &dyn Fn(&str) -> String) -> serde_json::Value {
        match self {
            Value::Scalar(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => serde_json::Value::Object(m.to_json_with(key_fn)),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json_with(key_fn)).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Scalar(s) => serializer.serialize_str(s),
            Value::Map(m) => m.serialize(serializer),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Insertion-ordered map. Inserting an existing key turns its value into a
/// `List` holding every occurrence in encounter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap {
    entries: Vec<(String, Value)>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// First scalar stored under `key` (the first element if it repeated)
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Scalar(s) => Some(s),
            Value::List(items) => items.first().and_then(Value::as_str),
            Value::Map(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert a value, merging repeats into a list
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => match existing {
                Value::List(items) => items.push(value),
                other => {
                    let first = std::mem::replace(other, Value::List(Vec::new()));
                    *other = Value::List(vec![first, value]);
                }
            },
            None => self.entries.push((key, value)),
        }
    }

    pub fn to_json_with(&self, key_fn: &dyn Fn(&str) -> String) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (key, value) in &self.entries {
            let key = key_fn(key);
            let value = value.to_json_with(key_fn);
            match out.get_mut(&key) {
                // Two raw keys can standardize to the same name.
                Some(serde_json::Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = serde_json::Value::Array(vec![first, value]);
                }
                None => {
                    out.insert(key, value);
                }
            }
        }
        out
    }
}

impl IntoIterator for OrderedMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
