// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::BTreeMap;

use ciborium::value::{Integer, Value as CborValue};

use crate::error::CodecError;
use crate::value::Value;

const FORMAT: &str = "cbor";

/// Encode a [`Value`] as compact binary object notation (CBOR).
///
/// Byte arrays round-trip through CBOR's native byte-string major type, so
/// no sentinel wrapping is needed here (contrast [`crate::json`]).
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let cbor = to_cbor(value);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut out)
        .map_err(|err| CodecError::encode(FORMAT, err.to_string()))?;
    Ok(out)
}

/// Decode a CBOR payload into a [`Value`].
pub fn decode(payload: &[u8]) -> Result<Value, CodecError> {
    let cbor: CborValue = ciborium::de::from_reader(payload)
        .map_err(|err| CodecError::decode(FORMAT, err.to_string()))?;
    from_cbor(cbor)
}

fn to_cbor(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Int(i) => CborValue::Integer(Integer::from(*i)),
        Value::Float(f) => CborValue::Float(*f),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::String(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor).collect()),
        Value::Map(map) => CborValue::Map(
            map.iter()
                .map(|(k, v)| (CborValue::Text(k.clone()), to_cbor(v)))
                .collect(),
        ),
    }
}

fn from_cbor(cbor: CborValue) -> Result<Value, CodecError> {
    Ok(match cbor {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(i) => {
            let i: i128 = i.into();
            let i: i64 = i
                .try_into()
                .map_err(|_| CodecError::decode(FORMAT, "integer out of i64 range"))?;
            Value::Int(i)
        }
        CborValue::Float(f) => Value::Float(f),
        CborValue::Bytes(b) => Value::Bytes(b),
        CborValue::Text(s) => Value::String(s),
        CborValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_cbor(item)?);
            }
            Value::Array(out)
        }
        CborValue::Map(entries) => {
            let mut out = BTreeMap::new();
            for (k, v) in entries {
                let key = k
                    .as_text()
                    .ok_or_else(|| CodecError::decode(FORMAT, "map key is not a string"))?
                    .to_owned();
                out.insert(key, from_cbor(v)?);
            }
            Value::Map(out)
        }
        // Unknown tags decode to their generic tagged value (here: the
        // tagged content itself, ignoring the tag number), per the "unknown
        // tags decode to their generic tagged value" rule; the envelope
        // parser rejects whatever results.
        CborValue::Tag(_, inner) => from_cbor(*inner)?,
        other => {
            return Err(CodecError::decode(
                FORMAT,
                format!("unsupported cbor value: {other:?}"),
            ))
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
            Value::Bool(true),
            Value::Int(-42),
            Value::Float(1.5),
            Value::String("hello".into()),
        ] {
            let encoded = encode(&v).unwrap();
            assert_eq!(decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn test_round_trip_bytes() {
        let v = Value::Bytes(vec![0u8, 1, 2, 255]);
        let encoded = encode(&v).unwrap();
        assert_eq!(decode(&encoded).unwrap(), v);
    }

    #[test]
    fn test_round_trip_nested() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert(
            "b".to_string(),
            Value::Array(vec![Value::Bytes(vec![9, 9]), Value::Null]),
        );
        let v = Value::Map(map);
        let encoded = encode(&v).unwrap();
        assert_eq!(decode(&encoded).unwrap(), v);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(&[0xff, 0x00, 0x12]).is_err());
    }
}
