//! Ordered/named parameter sets for query requests.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::value::{EcSqlValue, ParamKind};

/// A parameter slot: 1-based positional index or a name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    Index(u32),
    Name(String),
}

impl ParamKey {
    fn wire_key(&self) -> String {
        match self {
            ParamKey::Index(i) => i.to_string(),
            ParamKey::Name(name) => name.clone(),
        }
    }
}

impl From<u32> for ParamKey {
    fn from(index: u32) -> Self {
        ParamKey::Index(index)
    }
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        ParamKey::Name(name.to_string())
    }
}

impl From<String> for ParamKey {
    fn from(name: String) -> Self {
        ParamKey::Name(name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_key())
    }
}

/// Bound parameter values keyed by positional index or name.
///
/// Wire form is a JSON object whose keys are the positional index rendered
/// as a string, or the parameter name; entries are `EcSqlValue` wire
/// entries. Keys serialize in sorted order so re-serialization is
/// byte-stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EcSqlParams {
    entries: BTreeMap<String, EcSqlValue>,
}

impl EcSqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bind a value, replacing any previous binding for the same slot.
    pub fn bind(mut self, key: impl Into<ParamKey>, value: EcSqlValue) -> Self {
        self.entries.insert(key.into().wire_key(), value);
        self
    }

    pub fn bind_bool(self, key: impl Into<ParamKey>, v: bool) -> Self {
        self.bind(key, EcSqlValue::Boolean(v))
    }

    pub fn bind_double(self, key: impl Into<ParamKey>, v: f64) -> Self {
        self.bind(key, EcSqlValue::Double(v))
    }

    pub fn bind_id(self, key: impl Into<ParamKey>, id: u64) -> Self {
        self.bind(key, EcSqlValue::Id(id))
    }

    pub fn bind_id_set(self, key: impl Into<ParamKey>, ids: Vec<u64>) -> Self {
        self.bind(key, EcSqlValue::IdSet(ids))
    }

    pub fn bind_int(self, key: impl Into<ParamKey>, v: i32) -> Self {
        self.bind(key, EcSqlValue::Integer(v))
    }

    pub fn bind_long(self, key: impl Into<ParamKey>, v: i64) -> Self {
        self.bind(key, EcSqlValue::Long(v))
    }

    pub fn bind_null(self, key: impl Into<ParamKey>) -> Self {
        self.bind(key, EcSqlValue::Null)
    }

    pub fn bind_point2d(self, key: impl Into<ParamKey>, x: f64, y: f64) -> Self {
        self.bind(key, EcSqlValue::Point2d { x, y })
    }

    pub fn bind_point3d(self, key: impl Into<ParamKey>, x: f64, y: f64, z: f64) -> Self {
        self.bind(key, EcSqlValue::Point3d { x, y, z })
    }

    pub fn bind_string(self, key: impl Into<ParamKey>, v: impl Into<String>) -> Self {
        self.bind(key, EcSqlValue::String(v.into()))
    }

    pub fn bind_blob(self, key: impl Into<ParamKey>, bytes: Vec<u8>) -> Self {
        self.bind(key, EcSqlValue::Blob(bytes))
    }

    pub fn get(&self, key: impl Into<ParamKey>) -> Option<&EcSqlValue> {
        self.entries.get(&key.into().wire_key())
    }

    /// Kind of the value bound at `key`, if any.
    pub fn kind_of(&self, key: impl Into<ParamKey>) -> Option<ParamKind> {
        self.get(key).map(EcSqlValue::kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EcSqlValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode the whole set as its wire JSON object.
    pub fn to_js(&self) -> Value {
        let mut obj = Map::new();
        for (key, value) in &self.entries {
            obj.insert(key.clone(), value.to_js());
        }
        Value::Object(obj)
    }

    /// Decode a wire JSON object back into a parameter set.
    pub fn from_js(js: &Value) -> Result<Self> {
        let obj = js.as_object().ok_or(ProtocolError::NotAnObject)?;
        let mut entries = BTreeMap::new();
        for (key, entry) in obj {
            entries.insert(key.clone(), EcSqlValue::from_js(key, entry)?);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_of_each() -> EcSqlParams {
        EcSqlParams::new()
            .bind_bool(1u32, true)
            .bind_double(2u32, 2.5)
            .bind_id(3u32, 0x1234abcd)
            .bind_id_set(4u32, vec![1, 2, 3, 4, 8])
            .bind_int(5u32, -42)
            .bind_long(6u32, 1_099_511_627_776)
            .bind_null(7u32)
            .bind_point2d(8u32, 1.5, -2.5)
            .bind_point3d(9u32, 0.25, 0.5, 0.75)
            .bind_string(10u32, "hello")
            .bind_blob("named", vec![0xde, 0xad, 0xbe, 0xef])
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let params = one_of_each();

        let first = serde_json::to_string(&params.to_js()).unwrap();
        let decoded = EcSqlParams::from_js(&params.to_js()).unwrap();
        let second = serde_json::to_string(&decoded.to_js()).unwrap();
        assert_eq!(first, second);

        let decoded_again =
            EcSqlParams::from_js(&serde_json::from_str::<Value>(&second).unwrap()).unwrap();
        let third = serde_json::to_string(&decoded_again.to_js()).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn test_round_trip_preserves_kinds() {
        let params = one_of_each();
        let decoded = EcSqlParams::from_js(&params.to_js()).unwrap();

        let expected = [
            ("1", ParamKind::Boolean),
            ("2", ParamKind::Double),
            ("3", ParamKind::Id),
            ("4", ParamKind::IdSet),
            ("5", ParamKind::Integer),
            ("6", ParamKind::Long),
            ("7", ParamKind::Null),
            ("8", ParamKind::Point2d),
            ("9", ParamKind::Point3d),
            ("10", ParamKind::String),
            ("named", ParamKind::Blob),
        ];
        for (key, kind) in expected {
            assert_eq!(decoded.kind_of(key).unwrap(), kind, "slot {}", key);
        }
        assert_eq!(decoded.len(), 11);
    }

    #[test]
    fn test_wire_entry_shape() {
        let params = EcSqlParams::new().bind_id(1u32, 0xff);
        let js = params.to_js();
        assert_eq!(js["1"]["type"], 2);
        assert_eq!(js["1"]["value"], "0xff");
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(EcSqlParams::from_js(&Value::Array(vec![])).is_err());
    }
}
