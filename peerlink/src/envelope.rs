// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The tagged variant representing the six message kinds (five wire
//! `type` tags; `resource-transfer-response` is shared by two roles), plus
//! a validating parser from a decoded [`codec::Value`] into the typed
//! variant.

use std::collections::BTreeMap;

use codec::Value;

use crate::error::Error;
use crate::ids::CorrelationId;

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    EventEmission {
        id: CorrelationId,
        sender: Option<String>,
        receiver: Option<String>,
        event: String,
        params: Option<Vec<Value>>,
    },
    ServiceCallRequest {
        id: CorrelationId,
        sender: Option<String>,
        receiver: Option<String>,
        service: String,
        params: Option<Vec<Value>>,
    },
    ServiceCallResponse {
        id: CorrelationId,
        sender: Option<String>,
        receiver: Option<String>,
        result: Option<Value>,
        error: Option<String>,
    },
    ResourceTransferRequest {
        id: CorrelationId,
        sender: Option<String>,
        receiver: Option<String>,
        resource: String,
        params: Option<Vec<Value>>,
    },
    /// Used by both provisioner-to-fetcher responses and pusher-to-provisioner
    /// chunks; `resource` is present only in the push direction, which is how
    /// the two are told apart on the receiving side (see `resource.rs`).
    ResourceTransferResponse {
        id: CorrelationId,
        sender: Option<String>,
        receiver: Option<String>,
        resource: Option<String>,
        params: Option<Vec<Value>>,
        chunk: Option<Vec<u8>>,
        meta: Option<BTreeMap<String, Value>>,
        error: Option<String>,
        is_final: bool,
    },
}

impl Envelope {
    pub fn id(&self) -> &CorrelationId {
        match self {
            Envelope::EventEmission { id, .. }
            | Envelope::ServiceCallRequest { id, .. }
            | Envelope::ServiceCallResponse { id, .. }
            | Envelope::ResourceTransferRequest { id, .. }
            | Envelope::ResourceTransferResponse { id, .. } => id,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            Envelope::EventEmission { sender, .. }
            | Envelope::ServiceCallRequest { sender, .. }
            | Envelope::ServiceCallResponse { sender, .. }
            | Envelope::ResourceTransferRequest { sender, .. }
            | Envelope::ResourceTransferResponse { sender, .. } => sender.as_deref(),
        }
    }

    pub fn receiver(&self) -> Option<&str> {
        match self {
            Envelope::EventEmission { receiver, .. }
            | Envelope::ServiceCallRequest { receiver, .. }
            | Envelope::ServiceCallResponse { receiver, .. }
            | Envelope::ResourceTransferRequest { receiver, .. }
            | Envelope::ResourceTransferResponse { receiver, .. } => receiver.as_deref(),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Envelope::EventEmission { .. } => "event-emission",
            Envelope::ServiceCallRequest { .. } => "service-call-request",
            Envelope::ServiceCallResponse { .. } => "service-call-response",
            Envelope::ResourceTransferRequest { .. } => "resource-transfer-request",
            Envelope::ResourceTransferResponse { .. } => "resource-transfer-response",
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String(self.type_tag().to_string()));
        map.insert("id".to_string(), Value::String(self.id().as_str().to_string()));
        if let Some(sender) = self.sender() {
            map.insert("sender".to_string(), Value::String(sender.to_string()));
        }
        if let Some(receiver) = self.receiver() {
            map.insert("receiver".to_string(), Value::String(receiver.to_string()));
        }
        match self {
            Envelope::EventEmission { event, params, .. } => {
                map.insert("event".to_string(), Value::String(event.clone()));
                insert_params(&mut map, params);
            }
            Envelope::ServiceCallRequest { service, params, .. } => {
                map.insert("service".to_string(), Value::String(service.clone()));
                insert_params(&mut map, params);
            }
            Envelope::ServiceCallResponse { result, error, .. } => {
                if let Some(result) = result {
                    map.insert("result".to_string(), result.clone());
                }
                if let Some(error) = error {
                    map.insert("error".to_string(), Value::String(error.clone()));
                }
            }
            Envelope::ResourceTransferRequest { resource, params, .. } => {
                map.insert("resource".to_string(), Value::String(resource.clone()));
                insert_params(&mut map, params);
            }
            Envelope::ResourceTransferResponse {
                resource,
                params,
                chunk,
                meta,
                error,
                is_final,
                ..
            } => {
                if let Some(resource) = resource {
                    map.insert("resource".to_string(), Value::String(resource.clone()));
                }
                insert_params(&mut map, params);
                if let Some(chunk) = chunk {
                    map.insert("chunk".to_string(), Value::Bytes(chunk.clone()));
                }
                if let Some(meta) = meta {
                    map.insert("meta".to_string(), Value::Map(meta.clone()));
                }
                if let Some(error) = error {
                    map.insert("error".to_string(), Value::String(error.clone()));
                }
                map.insert("final".to_string(), Value::Bool(*is_final));
            }
        }
        Value::Map(map)
    }
}

fn insert_params(map: &mut BTreeMap<String, Value>, params: &Option<Vec<Value>>) {
    if let Some(params) = params {
        map.insert("params".to_string(), Value::Array(params.clone()));
    }
}

const EVENT_FIELDS: &[&str] = &["type", "id", "sender", "receiver", "event", "params"];
const SERVICE_REQUEST_FIELDS: &[&str] = &["type", "id", "sender", "receiver", "service", "params"];
const SERVICE_RESPONSE_FIELDS: &[&str] = &["type", "id", "sender", "receiver", "result", "error"];
const RESOURCE_REQUEST_FIELDS: &[&str] = &["type", "id", "sender", "receiver", "resource", "params"];
const RESOURCE_RESPONSE_FIELDS: &[&str] = &[
    "type", "id", "sender", "receiver", "resource", "params", "chunk", "meta", "error", "final",
];

/// Parse a generic decoded [`Value`] into a typed [`Envelope`], or fail
/// with [`Error::Protocol`] naming the offending field.
pub fn parse(value: Value) -> Result<Envelope, Error> {
    let map = value
        .as_map()
        .ok_or_else(|| Error::Protocol("envelope is not an object".to_string()))?;

    let type_tag = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("missing or non-string `type` field".to_string()))?;
    let id: CorrelationId = map
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("missing or non-string `id` field".to_string()))?
        .into();
    let sender = optional_string(map, "sender")?;
    let receiver = optional_string(map, "receiver")?;

    match type_tag {
        "event-emission" => {
            reject_unknown_fields(map, EVENT_FIELDS)?;
            let event = required_string(map, "event")?;
            let params = optional_params(map)?;
            Ok(Envelope::EventEmission {
                id,
                sender,
                receiver,
                event,
                params,
            })
        }
        "service-call-request" => {
            reject_unknown_fields(map, SERVICE_REQUEST_FIELDS)?;
            let service = required_string(map, "service")?;
            let params = optional_params(map)?;
            Ok(Envelope::ServiceCallRequest {
                id,
                sender,
                receiver,
                service,
                params,
            })
        }
        "service-call-response" => {
            reject_unknown_fields(map, SERVICE_RESPONSE_FIELDS)?;
            let result = map.get("result").cloned();
            let error = optional_string(map, "error")?;
            match (&result, &error) {
                (None, None) => {
                    return Err(Error::Protocol(
                        "service-call-response must carry `result` or `error`".to_string(),
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(Error::Protocol(
                        "service-call-response cannot carry both `result` and `error`".to_string(),
                    ))
                }
                _ => {}
            }
            Ok(Envelope::ServiceCallResponse {
                id,
                sender,
                receiver,
                result,
                error,
            })
        }
        "resource-transfer-request" => {
            reject_unknown_fields(map, RESOURCE_REQUEST_FIELDS)?;
            let resource = required_string(map, "resource")?;
            let params = optional_params(map)?;
            Ok(Envelope::ResourceTransferRequest {
                id,
                sender,
                receiver,
                resource,
                params,
            })
        }
        "resource-transfer-response" => {
            reject_unknown_fields(map, RESOURCE_RESPONSE_FIELDS)?;
            let resource = optional_string(map, "resource")?;
            let params = optional_params(map)?;
            let chunk = optional_bytes(map)?;
            let meta = optional_meta(map)?;
            let error = optional_string(map, "error")?;
            let is_final = map
                .get("final")
                .and_then(Value::as_bool)
                .ok_or_else(|| Error::Protocol("missing or non-bool `final` field".to_string()))?;
            Ok(Envelope::ResourceTransferResponse {
                id,
                sender,
                receiver,
                resource,
                params,
                chunk,
                meta,
                error,
                is_final,
            })
        }
        other => Err(Error::Protocol(format!("unknown envelope type `{other}`"))),
    }
}

fn reject_unknown_fields(map: &BTreeMap<String, Value>, allowed: &[&str]) -> Result<(), Error> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::Protocol(format!("unknown field `{key}`")));
        }
    }
    Ok(())
}

fn required_string(map: &BTreeMap<String, Value>, field: &str) -> Result<String, Error> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("missing or non-string `{field}` field")))
}

fn optional_string(map: &BTreeMap<String, Value>, field: &str) -> Result<Option<String>, Error> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::Protocol(format!("`{field}` must be a string"))),
    }
}

fn optional_params(map: &BTreeMap<String, Value>) -> Result<Option<Vec<Value>>, Error> {
    match map.get("params") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.clone())),
        Some(_) => Err(Error::Protocol("`params` must be an array".to_string())),
    }
}

fn optional_bytes(map: &BTreeMap<String, Value>) -> Result<Option<Vec<u8>>, Error> {
    match map.get("chunk") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bytes(b)) => Ok(Some(b.clone())),
        Some(_) => Err(Error::Protocol("`chunk` must be a byte sequence or null".to_string())),
    }
}

fn optional_meta(map: &BTreeMap<String, Value>) -> Result<Option<BTreeMap<String, Value>>, Error> {
    match map.get("meta") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Map(m)) => Ok(Some(m.clone())),
        Some(_) => Err(Error::Protocol("`meta` must be a map".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(env: Envelope) {
        let value = env.to_value();
        let parsed = parse(value).expect("valid envelope should parse");
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_round_trip_event_emission() {
        round_trip(Envelope::EventEmission {
            id: "rid1".into(),
            sender: Some("peer-a".to_string()),
            receiver: None,
            event: "example/sample".to_string(),
            params: Some(vec![Value::String("world".into()), Value::Int(42)]),
        });
    }

    #[test]
    fn test_round_trip_resource_response_push_with_bytes() {
        round_trip(Envelope::ResourceTransferResponse {
            id: "rid2".into(),
            sender: Some("peer-b".to_string()),
            receiver: Some("peer-a".to_string()),
            resource: Some("example/upload".to_string()),
            params: Some(vec![]),
            chunk: Some(vec![1, 2, 3, 4]),
            meta: None,
            error: None,
            is_final: false,
        });
    }

    #[test]
    fn test_missing_type_rejected() {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::String("x".into()));
        let err = parse(Value::Map(map)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String("event-emission".into()));
        map.insert("id".to_string(), Value::String("x".into()));
        map.insert("event".to_string(), Value::String("e".into()));
        map.insert("bogus".to_string(), Value::Bool(true));
        let err = parse(Value::Map(map)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_service_response_requires_exactly_one_of_result_error() {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String("service-call-response".into()));
        map.insert("id".to_string(), Value::String("x".into()));
        assert!(parse(Value::Map(map.clone())).is_err());

        map.insert("result".to_string(), Value::Int(1));
        map.insert("error".to_string(), Value::String("boom".into()));
        assert!(parse(Value::Map(map)).is_err());
    }

    #[test]
    fn test_params_must_be_array() {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String("event-emission".into()));
        map.insert("id".to_string(), Value::String("x".into()));
        map.insert("event".to_string(), Value::String("e".into()));
        map.insert("params".to_string(), Value::Int(1));
        assert!(parse(Value::Map(map)).is_err());
    }
}
