//! Scalar values stored as dictionary items.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_cbor::Value as CborValue;

/// First byte of every stored item value. Never equal to
/// [`crate::codec::POINTER_TAG`].
pub const ITEM_TAG: u8 = 0x01;

/// Item payload: a scalar or a nested composite of scalars.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Member of a `Map` value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(name),
            _ => None,
        }
    }

    fn to_cbor(&self) -> CborValue {
        match self {
            Value::Null => CborValue::Null,
            Value::Bool(b) => CborValue::Bool(*b),
            Value::Int(n) => CborValue::Integer(i128::from(*n)),
            Value::Float(x) => CborValue::Float(*x),
            Value::Text(s) => CborValue::Text(s.clone()),
            Value::Bytes(b) => CborValue::Bytes(b.clone()),
            Value::List(items) => CborValue::Array(items.iter().map(Value::to_cbor).collect()),
            Value::Map(entries) => CborValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (CborValue::Text(k.clone()), v.to_cbor()))
                    .collect(),
            ),
        }
    }

    fn from_cbor(value: CborValue) -> Result<Value, String> {
        Ok(match value {
            CborValue::Null => Value::Null,
            CborValue::Bool(b) => Value::Bool(b),
            CborValue::Integer(n) => {
                Value::Int(i64::try_from(n).map_err(|_| format!("integer {n} out of range"))?)
            }
            CborValue::Float(x) => Value::Float(x),
            CborValue::Text(s) => Value::Text(s),
            CborValue::Bytes(b) => Value::Bytes(b),
            CborValue::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_cbor)
                    .collect::<Result<_, _>>()?,
            ),
            CborValue::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let CborValue::Text(key) = key else {
                        return Err(format!("map key must be text, found {key:?}"));
                    };
                    map.insert(key, Value::from_cbor(value)?);
                }
                Value::Map(map)
            }
            other => return Err(format!("unsupported CBOR item {other:?}")),
        })
    }
}

/// Serialize an item for storage: [`ITEM_TAG`] followed by CBOR.
pub fn encode_item(value: &Value) -> Result<Vec<u8>, serde_cbor::Error> {
    let mut buf = vec![ITEM_TAG];
    serde_cbor::to_writer(&mut buf, &value.to_cbor())?;
    Ok(buf)
}

/// Inverse of [`encode_item`]; the error describes why the bytes are not an item.
pub fn decode_item(bytes: &[u8]) -> Result<Value, String> {
    let Some(body) = bytes.strip_prefix(&[ITEM_TAG]) else {
        return Err(format!("item value starts with {:?}", bytes.first()));
    };
    let cbor: CborValue = serde_cbor::from_slice(body).map_err(|err| err.to_string())?;
    Value::from_cbor(cbor)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => {
                Value::Map(entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(bytes) => {
                write!(f, "0x")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{POINTER_TAG, decode_pointer};

    fn sample() -> Value {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Value::Int(-3));
        map.insert("blob".to_string(), Value::Bytes(b"abc".to_vec()));
        Value::List(vec![
            Value::Null,
            Value::Bool(true),
            Value::Float(2.5),
            Value::Text("abc".into()),
            Value::Map(map),
        ])
    }

    #[test]
    fn nested_value_survives_storage_encoding() {
        let value = sample();
        let bytes = encode_item(&value).unwrap();
        assert_eq!(bytes[0], ITEM_TAG);
        assert_eq!(decode_item(&bytes).unwrap(), value);
    }

    #[test]
    fn bytes_and_text_stay_distinct() {
        let text = encode_item(&Value::Text("abc".into())).unwrap();
        let blob = encode_item(&Value::Bytes(b"abc".to_vec())).unwrap();
        assert_eq!(decode_item(&text).unwrap(), Value::Text("abc".into()));
        assert_eq!(decode_item(&blob).unwrap(), Value::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn item_values_are_never_pointers() {
        assert_ne!(ITEM_TAG, POINTER_TAG);
        for value in [Value::Int(5), Value::Int(300), Value::Bytes(vec![POINTER_TAG, 5])] {
            let bytes = encode_item(&value).unwrap();
            assert_eq!(decode_pointer(&bytes), None);
        }
    }

    #[test]
    fn decode_rejects_foreign_bytes() {
        assert!(decode_item(&[]).is_err());
        assert!(decode_item(&[POINTER_TAG, 1]).is_err());
        assert!(decode_item(&[ITEM_TAG, 0xff]).is_err());
    }

    #[test]
    fn accessors_and_display() {
        let value = sample();
        let list = value.as_list().unwrap();
        assert!(list[0].is_null());
        assert_eq!(list[1].as_bool(), Some(true));
        assert_eq!(list[2].as_f64(), Some(2.5));
        assert_eq!(list[3].as_str(), Some("abc"));
        assert_eq!(list[4].get("n").and_then(Value::as_i64), Some(-3));
        assert_eq!(list[4].get("blob").and_then(Value::as_bytes), Some(&b"abc"[..]));
        assert_eq!(Value::Int(4).as_f64(), Some(4.0));
        assert_eq!(value.to_string(), r#"[null, true, 2.5, "abc", {"blob": 0x616263, "n": -3}]"#);
    }

    #[test]
    fn json_conversion() {
        let json: serde_json::Value = serde_json::from_str(r#"{"a": [1, 2.5, "x", null]}"#).unwrap();
        let value = Value::from(json);
        let inner = value.get("a").and_then(Value::as_list).unwrap();
        assert_eq!(inner[0], Value::Int(1));
        assert_eq!(inner[1], Value::Float(2.5));
        assert_eq!(inner[2], Value::Text("x".into()));
        assert_eq!(inner[3], Value::Null);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"a":[1,2.5,"x",null]}"#);
    }
}
