//! Property value models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PropertyKey;

/// Value types a property can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int32,
    Int64,
    Float,
    Bool,
    Bytes,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::Bytes => "bytes",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int32" => Ok(ValueType::Int32),
            "int64" => Ok(ValueType::Int64),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "bytes" => Ok(ValueType::Bytes),
            _ => Err(format!("Unknown value type: '{}'", s)),
        }
    }
}

/// Tagged property payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    /// The tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float(_) => ValueType::Float,
            Value::Bool(_) => ValueType::Bool,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Availability of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    #[default]
    Available,
    Unavailable,
    Error,
}

/// A property value as produced by the service
///
/// Values are immutable once built. A newer reading is a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    key: PropertyKey,
    value: Value,
    timestamp: DateTime<Utc>,
    status: PropertyStatus,
}

impl PropertyValue {
    /// Create an available value stamped with the current time
    pub fn new(key: PropertyKey, value: impl Into<Value>) -> Self {
        Self::with_status(key, value, PropertyStatus::Available)
    }

    pub fn with_status(key: PropertyKey, value: impl Into<Value>, status: PropertyStatus) -> Self {
        Self {
            key,
            value: value.into(),
            timestamp: Utc::now(),
            status,
        }
    }

    /// Create a value with an explicit timestamp
    pub fn at(
        key: PropertyKey,
        value: impl Into<Value>,
        timestamp: DateTime<Utc>,
        status: PropertyStatus,
    ) -> Self {
        Self {
            key,
            value: value.into(),
            timestamp,
            status,
        }
    }

    pub fn key(&self) -> PropertyKey {
        self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> PropertyStatus {
        self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == PropertyStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::from(7i32).value_type(), ValueType::Int32);
        assert_eq!(Value::from(7i64).value_type(), ValueType::Int64);
        assert_eq!(Value::from(0.5f32).value_type(), ValueType::Float);
        assert_eq!(Value::from(true).value_type(), ValueType::Bool);
        assert_eq!(Value::from(vec![1u8]).value_type(), ValueType::Bytes);
    }

    #[test]
    fn test_typed_accessors_reject_other_tags() {
        let v = Value::Int32(42);
        assert_eq!(v.as_i32(), Some(42));
        assert_eq!(v.as_i64(), None);
        assert_eq!(v.as_bool(), None);
    }

    #[test]
    fn test_value_serde_shape() {
        let json = serde_json::to_value(Value::Int32(3)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int32", "value": 3}));
    }

    #[test]
    fn test_value_type_from_str() {
        assert_eq!("float".parse::<ValueType>().unwrap(), ValueType::Float);
        assert!("double".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_bytes_display_is_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "dead");
    }
}
