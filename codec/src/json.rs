// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::error::CodecError;
use crate::value::Value;

const FORMAT: &str = "json";

/// The sentinel key JSON uses to carry byte arrays, since JSON has no
/// native byte-string type.
const BYTES_KEY: &str = "__bytes";

/// Encode a [`Value`] as a JSON string, returned as the UTF-8 bytes ready
/// for an MQTT publish payload.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let json = to_json(value)?;
    serde_json::to_vec(&json).map_err(|err| CodecError::encode(FORMAT, err.to_string()))
}

/// Decode a JSON payload into a [`Value`], resolving `{"__bytes": ...}`
/// sentinels back into [`Value::Bytes`].
pub fn decode(payload: &[u8]) -> Result<Value, CodecError> {
    let json: JsonValue =
        serde_json::from_slice(payload).map_err(|err| CodecError::decode(FORMAT, err.to_string()))?;
    from_json(json)
}

fn to_json(value: &Value) -> Result<JsonValue, CodecError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| CodecError::encode(FORMAT, "non-finite float has no JSON representation"))?,
        Value::Bytes(b) => {
            let mut obj = JsonMap::new();
            obj.insert(BYTES_KEY.to_string(), JsonValue::String(STANDARD.encode(b)));
            JsonValue::Object(obj)
        }
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_json(item)?);
            }
            JsonValue::Array(out)
        }
        Value::Map(map) => {
            let mut obj = JsonMap::new();
            for (k, v) in map {
                obj.insert(k.clone(), to_json(v)?);
            }
            JsonValue::Object(obj)
        }
    })
}

fn from_json(json: JsonValue) -> Result<Value, CodecError> {
    Ok(match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(CodecError::decode(FORMAT, "number out of range"));
            }
        }
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_json(item)?);
            }
            Value::Array(out)
        }
        JsonValue::Object(obj) => {
            if obj.len() == 1 {
                if let Some(JsonValue::String(encoded)) = obj.get(BYTES_KEY) {
                    let bytes = STANDARD
                        .decode(encoded)
                        .map_err(|err| CodecError::decode(FORMAT, format!("invalid base64: {err}")))?;
                    return Ok(Value::Bytes(bytes));
                }
            }
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                out.insert(k, from_json(v)?);
            }
            Value::Map(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_scalars() {
        for v in [
            Value::Null,
            Value::Bool(false),
            Value::Int(7),
            Value::Float(2.25),
            Value::String("world".into()),
        ] {
            let encoded = encode(&v).unwrap();
            assert_eq!(decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn test_round_trip_bytes_via_sentinel() {
        let v = Value::Bytes(vec![1, 2, 3, 250]);
        let encoded = encode(&v).unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.contains("__bytes"));
        assert_eq!(decode(&encoded).unwrap(), v);
    }

    #[test]
    fn test_decode_invalid_json_fails() {
        assert!(decode(b"{not json").is_err());
    }
}
