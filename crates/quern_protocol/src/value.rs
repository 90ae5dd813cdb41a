//! Bindable parameter values and their JSON encoding.
//!
//! Each value kind carries a stable integer type code used on the wire.
//! The codes are a compatibility contract - do not renumber.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Parameter value kind with its stable wire type code.
/// This is the CANONICAL kind enumeration - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Boolean,
    Double,
    Id,
    IdSet,
    Integer,
    Long,
    Null,
    Point2d,
    Point3d,
    String,
    Blob,
}

impl ParamKind {
    /// Wire type code for this kind.
    pub fn type_code(self) -> u8 {
        match self {
            ParamKind::Boolean => 0,
            ParamKind::Double => 1,
            ParamKind::Id => 2,
            ParamKind::IdSet => 3,
            ParamKind::Integer => 4,
            ParamKind::Long => 5,
            ParamKind::Null => 6,
            ParamKind::Point2d => 7,
            ParamKind::Point3d => 8,
            ParamKind::String => 9,
            ParamKind::Blob => 10,
        }
    }

    /// Convert a wire type code back to a kind.
    pub fn from_type_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(ParamKind::Boolean),
            1 => Ok(ParamKind::Double),
            2 => Ok(ParamKind::Id),
            3 => Ok(ParamKind::IdSet),
            4 => Ok(ParamKind::Integer),
            5 => Ok(ParamKind::Long),
            6 => Ok(ParamKind::Null),
            7 => Ok(ParamKind::Point2d),
            8 => Ok(ParamKind::Point3d),
            9 => Ok(ParamKind::String),
            10 => Ok(ParamKind::Blob),
            other => Err(ProtocolError::InvalidTypeCode(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::Boolean => "Boolean",
            ParamKind::Double => "Double",
            ParamKind::Id => "Id",
            ParamKind::IdSet => "IdSet",
            ParamKind::Integer => "Integer",
            ParamKind::Long => "Long",
            ParamKind::Null => "Null",
            ParamKind::Point2d => "Point2d",
            ParamKind::Point3d => "Point3d",
            ParamKind::String => "String",
            ParamKind::Blob => "Blob",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bindable parameter value. Exactly one kind per bound slot.
#[derive(Debug, Clone, PartialEq)]
pub enum EcSqlValue {
    Boolean(bool),
    Double(f64),
    /// 64-bit id, rendered on the wire as a "0x..." hex string.
    Id(u64),
    /// Set of ids, rendered on the wire as a compact range-encoded string.
    IdSet(Vec<u64>),
    Integer(i32),
    Long(i64),
    Null,
    Point2d { x: f64, y: f64 },
    Point3d { x: f64, y: f64, z: f64 },
    String(String),
    /// Raw bytes, rendered on the wire as base64.
    Blob(Vec<u8>),
}

impl EcSqlValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            EcSqlValue::Boolean(_) => ParamKind::Boolean,
            EcSqlValue::Double(_) => ParamKind::Double,
            EcSqlValue::Id(_) => ParamKind::Id,
            EcSqlValue::IdSet(_) => ParamKind::IdSet,
            EcSqlValue::Integer(_) => ParamKind::Integer,
            EcSqlValue::Long(_) => ParamKind::Long,
            EcSqlValue::Null => ParamKind::Null,
            EcSqlValue::Point2d { .. } => ParamKind::Point2d,
            EcSqlValue::Point3d { .. } => ParamKind::Point3d,
            EcSqlValue::String(_) => ParamKind::String,
            EcSqlValue::Blob(_) => ParamKind::Blob,
        }
    }

    /// Encode as a `{ "type": <code>, "value": <encoded> }` wire entry.
    pub fn to_js(&self) -> Value {
        let encoded = match self {
            EcSqlValue::Boolean(v) => json!(v),
            EcSqlValue::Double(v) => json!(v),
            EcSqlValue::Id(id) => Value::String(format_id(*id)),
            EcSqlValue::IdSet(ids) => Value::String(encode_id_set(ids)),
            EcSqlValue::Integer(v) => json!(v),
            EcSqlValue::Long(v) => json!(v),
            EcSqlValue::Null => Value::Null,
            EcSqlValue::Point2d { x, y } => json!({ "x": x, "y": y }),
            EcSqlValue::Point3d { x, y, z } => json!({ "x": x, "y": y, "z": z }),
            EcSqlValue::String(v) => json!(v),
            EcSqlValue::Blob(bytes) => Value::String(BASE64.encode(bytes)),
        };
        json!({ "type": self.kind().type_code(), "value": encoded })
    }

    /// Decode one wire entry. `key` is only used to shape error messages.
    pub fn from_js(key: &str, entry: &Value) -> Result<Self> {
        let obj = entry
            .as_object()
            .ok_or_else(|| ProtocolError::MalformedEntry { key: key.into() })?;
        let code = obj
            .get("type")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::MalformedEntry { key: key.into() })?;
        let kind = ParamKind::from_type_code(code)?;
        let value = obj.get("value").unwrap_or(&Value::Null);

        let malformed = |detail: String| ProtocolError::MalformedValue {
            key: key.into(),
            kind: kind.as_str(),
            detail,
        };

        match kind {
            ParamKind::Boolean => value
                .as_bool()
                .map(EcSqlValue::Boolean)
                .ok_or_else(|| malformed("expected a JSON bool".into())),
            ParamKind::Double => value
                .as_f64()
                .map(EcSqlValue::Double)
                .ok_or_else(|| malformed("expected a JSON number".into())),
            ParamKind::Id => {
                let text = value
                    .as_str()
                    .ok_or_else(|| malformed("expected a hex string".into()))?;
                Ok(EcSqlValue::Id(parse_id(text)?))
            }
            ParamKind::IdSet => {
                let text = value
                    .as_str()
                    .ok_or_else(|| malformed("expected a compact id-set string".into()))?;
                Ok(EcSqlValue::IdSet(decode_id_set(text)?))
            }
            ParamKind::Integer => {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| malformed("expected a JSON integer".into()))?;
                i32::try_from(wide)
                    .map(EcSqlValue::Integer)
                    .map_err(|_| malformed(format!("{} does not fit in 32 bits", wide)))
            }
            ParamKind::Long => value
                .as_i64()
                .map(EcSqlValue::Long)
                .ok_or_else(|| malformed("expected a JSON integer".into())),
            ParamKind::Null => Ok(EcSqlValue::Null),
            ParamKind::Point2d => {
                let (x, y) = (point_coord(value, "x"), point_coord(value, "y"));
                match (x, y) {
                    (Some(x), Some(y)) => Ok(EcSqlValue::Point2d { x, y }),
                    _ => Err(malformed("expected an object with numeric x, y".into())),
                }
            }
            ParamKind::Point3d => {
                let (x, y, z) = (
                    point_coord(value, "x"),
                    point_coord(value, "y"),
                    point_coord(value, "z"),
                );
                match (x, y, z) {
                    (Some(x), Some(y), Some(z)) => Ok(EcSqlValue::Point3d { x, y, z }),
                    _ => Err(malformed("expected an object with numeric x, y, z".into())),
                }
            }
            ParamKind::String => value
                .as_str()
                .map(|s| EcSqlValue::String(s.to_string()))
                .ok_or_else(|| malformed("expected a JSON string".into())),
            ParamKind::Blob => {
                let text = value
                    .as_str()
                    .ok_or_else(|| malformed("expected a base64 string".into()))?;
                BASE64
                    .decode(text)
                    .map(EcSqlValue::Blob)
                    .map_err(|e| malformed(e.to_string()))
            }
        }
    }
}

/// Extract a numeric coordinate field from a point's JSON object.
fn point_coord(value: &Value, field: &str) -> Option<f64> {
    value.as_object()?.get(field)?.as_f64()
}

/// Render an id in the wire form: lowercase hex with a `0x` prefix.
pub fn format_id(id: u64) -> String {
    format!("{:#x}", id)
}

/// Parse a `0x`-prefixed hex id.
pub fn parse_id(text: &str) -> Result<u64> {
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| ProtocolError::InvalidId(text.into()))?;
    u64::from_str_radix(hex, 16).map_err(|_| ProtocolError::InvalidId(text.into()))
}

/// Compact range encoding for id sets.
///
/// Ids are sorted ascending and de-duplicated, then written as hex deltas
/// from the previous id, each prefixed with `+`. A run of equal deltas is
/// collapsed with a `*<hex count>` multiplier: `[1,2,3,4,8]` -> `"+1*4+4"`.
pub fn encode_id_set(ids: &[u64]) -> String {
    let mut sorted: Vec<u64> = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut prev = 0u64;
    let mut run_delta = 0u64;
    let mut run_len = 0u64;

    let mut flush = |out: &mut String, delta: u64, len: u64| {
        if len == 0 {
            return;
        }
        out.push('+');
        out.push_str(&format!("{:x}", delta));
        if len > 1 {
            out.push('*');
            out.push_str(&format!("{:x}", len));
        }
    };

    for id in sorted {
        let delta = id - prev;
        prev = id;
        if delta == run_delta {
            run_len += 1;
        } else {
            flush(&mut out, run_delta, run_len);
            run_delta = delta;
            run_len = 1;
        }
    }
    flush(&mut out, run_delta, run_len);
    out
}

/// Decode the compact range encoding produced by [`encode_id_set`].
pub fn decode_id_set(text: &str) -> Result<Vec<u64>> {
    let bad = || ProtocolError::InvalidIdSet(text.into());
    let mut ids = Vec::new();
    if text.is_empty() {
        return Ok(ids);
    }
    if !text.starts_with('+') {
        return Err(bad());
    }

    let mut prev = 0u64;
    for (pos, chunk) in text.split('+').enumerate() {
        if chunk.is_empty() {
            // The leading '+' yields one empty chunk; anything else is malformed.
            if pos == 0 {
                continue;
            }
            return Err(bad());
        }
        let (delta_hex, count) = match chunk.split_once('*') {
            Some((d, c)) => (d, u64::from_str_radix(c, 16).map_err(|_| bad())?),
            None => (chunk, 1),
        };
        let delta = u64::from_str_radix(delta_hex, 16).map_err(|_| bad())?;
        if count == 0 {
            return Err(bad());
        }
        for _ in 0..count {
            prev = prev.checked_add(delta).ok_or_else(bad)?;
            ids.push(prev);
        }
    }
    Ok(ids)
}
