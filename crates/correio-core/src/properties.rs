use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Wire tag marking a binary value. An object with this single key is binary
/// data, never a nested document; the `~` keeps it out of the escaped key
/// space.
const BINARY_TAG: &str = "~bin";

/// Document stores treat `.` in field names as a path separator, so property
/// keys are escaped on the wire: `~` becomes `~~`, `.` becomes `~d`.
fn escape_key(key: &str) -> String {
    key.replace('~', "~~").replace('.', "~d")
}

fn unescape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('~') => out.push('~'),
            Some('d') => out.push('.'),
            // Unknown escape: keep it verbatim rather than lose data.
            Some(other) => {
                out.push('~');
                out.push(other);
            }
            None => out.push('~'),
        }
    }
    out
}

/// A single tagged value in a message's property bag.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Binary(Vec<u8>),
    Document(Properties),
}

impl PropertyValue {
    fn to_wire(&self) -> Value {
        match self {
            PropertyValue::String(s) => Value::from(s.clone()),
            PropertyValue::Int(n) => Value::from(*n),
            PropertyValue::Float(f) => Value::from(*f),
            PropertyValue::Bool(b) => Value::from(*b),
            PropertyValue::Binary(bytes) => {
                let array: Vec<Value> = bytes.iter().map(|b| Value::from(*b)).collect();
                let mut tagged = serde_json::Map::with_capacity(1);
                tagged.insert(BINARY_TAG.to_string(), Value::from(array));
                Value::Object(tagged)
            }
            PropertyValue::Document(doc) => doc.to_wire(),
        }
    }

    fn from_wire(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::String(s) => Ok(PropertyValue::String(s)),
            Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PropertyValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(PropertyValue::Float(f))
                } else {
                    Err(format!("property number out of range: {n}"))
                }
            }
            Value::Object(map) => {
                if map.len() == 1 && map.contains_key(BINARY_TAG) {
                    let Some(Value::Array(items)) = map.get(BINARY_TAG) else {
                        return Err("binary property must hold a byte array".to_string());
                    };
                    let mut bytes = Vec::with_capacity(items.len());
                    for item in items {
                        let byte = item
                            .as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| format!("invalid byte in binary property: {item}"))?;
                        bytes.push(byte);
                    }
                    Ok(PropertyValue::Binary(bytes))
                } else {
                    Properties::from_wire_map(map).map(PropertyValue::Document)
                }
            }
            other => Err(format!("unsupported property value: {other}")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Binary(value)
    }
}

impl From<Properties> for PropertyValue {
    fn from(value: Properties) -> Self {
        PropertyValue::Document(value)
    }
}

/// Open property bag carried by every message: string keys to tagged values,
/// accessed through explicit get/set rather than dynamic member resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_binary(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key)? {
            PropertyValue::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn get_document(&self, key: &str) -> Option<&Properties> {
        match self.0.get(key)? {
            PropertyValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn to_wire(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            map.insert(escape_key(key), value.to_wire());
        }
        Value::Object(map)
    }

    fn from_wire_map(
        map: serde_json::Map<String, Value>,
    ) -> std::result::Result<Self, String> {
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(unescape_key(&key), PropertyValue::from_wire(value)?);
        }
        Ok(Self(out))
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Self::from_wire_map(map).map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "properties must be a document, got {other}"
            ))),
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(value).map_err(serde::de::Error::custom)
    }
}
