// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Pure functions mapping `(endpoint-name, operation, optional peer-id)` to
//! an MQTT topic string and back. The default scheme is
//! `${name}/${operation}/${peerId ?? "any"}`; both directions are
//! pluggable via [`TopicMake`]/[`TopicMatch`] so the core never has to
//! parse topic strings itself when a caller supplies a custom scheme.

use std::fmt;

/// The five wire operations a topic's middle segment can carry. These are
/// also the literal `type` tags used on the wire (see `envelope.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    EventEmission,
    ServiceCallRequest,
    ServiceCallResponse,
    ResourceTransferRequest,
    ResourceTransferResponse,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::EventEmission => "event-emission",
            Operation::ServiceCallRequest => "service-call-request",
            Operation::ServiceCallResponse => "service-call-response",
            Operation::ResourceTransferRequest => "resource-transfer-request",
            Operation::ResourceTransferResponse => "resource-transfer-response",
        }
    }

    pub fn from_str(s: &str) -> Option<Operation> {
        Some(match s {
            "event-emission" => Operation::EventEmission,
            "service-call-request" => Operation::ServiceCallRequest,
            "service-call-response" => Operation::ServiceCallResponse,
            "resource-transfer-request" => Operation::ResourceTransferRequest,
            "resource-transfer-response" => Operation::ResourceTransferResponse,
            _ => return None,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of successfully parsing a topic string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTopic {
    pub name: String,
    pub operation: Operation,
    /// Absent when the topic's terminal segment is the broadcast marker.
    pub peer_id: Option<String>,
}

pub trait TopicMake: Send + Sync {
    fn make(&self, name: &str, operation: Operation, peer_id: Option<&str>) -> String;
}

pub trait TopicMatch: Send + Sync {
    fn match_topic(&self, topic: &str) -> Option<MatchedTopic>;
}

/// `${name}/${operation}/${peerId ?? "any"}`. Endpoint names are themselves
/// allowed to contain `/` (e.g. `example/sample`), so matching splits from
/// the right: the last segment is the peer-id-or-broadcast marker, the
/// second-to-last must be one of the five known operation strings, and
/// everything remaining (rejoined) is the endpoint name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTopicScheme;

const BROADCAST_MARKER: &str = "any";

impl TopicMake for DefaultTopicScheme {
    fn make(&self, name: &str, operation: Operation, peer_id: Option<&str>) -> String {
        format!(
            "{}/{}/{}",
            name,
            operation.as_str(),
            peer_id.unwrap_or(BROADCAST_MARKER)
        )
    }
}

impl TopicMatch for DefaultTopicScheme {
    fn match_topic(&self, topic: &str) -> Option<MatchedTopic> {
        let mut parts = topic.rsplitn(3, '/');
        let peer_segment = parts.next()?;
        let operation_segment = parts.next()?;
        let name = parts.next()?;

        if name.is_empty() || peer_segment.is_empty() {
            return None;
        }
        let operation = Operation::from_str(operation_segment)?;
        let peer_id = if peer_segment == BROADCAST_MARKER {
            None
        } else {
            Some(peer_segment.to_string())
        };

        Some(MatchedTopic {
            name: name.to_string(),
            operation,
            peer_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_broadcast() {
        let scheme = DefaultTopicScheme;
        let topic = scheme.make("example/sample", Operation::EventEmission, None);
        assert_eq!(topic, "example/sample/event-emission/any");
        let matched = scheme.match_topic(&topic).unwrap();
        assert_eq!(matched.name, "example/sample");
        assert_eq!(matched.operation, Operation::EventEmission);
        assert_eq!(matched.peer_id, None);
    }

    #[test]
    fn test_round_trip_directed() {
        let scheme = DefaultTopicScheme;
        let topic = scheme.make("example/hello", Operation::ServiceCallResponse, Some("peer-1"));
        let matched = scheme.match_topic(&topic).unwrap();
        assert_eq!(matched.name, "example/hello");
        assert_eq!(matched.operation, Operation::ServiceCallResponse);
        assert_eq!(matched.peer_id.as_deref(), Some("peer-1"));
    }

    #[test]
    fn test_match_rejects_unknown_operation() {
        let scheme = DefaultTopicScheme;
        assert!(scheme.match_topic("example/foo/not-an-operation/any").is_none());
    }

    #[test]
    fn test_match_rejects_too_short_topic() {
        let scheme = DefaultTopicScheme;
        assert!(scheme.match_topic("just-two/parts").is_none());
    }
}
