// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The external collaborator interface this crate consumes from an MQTT
//! client: subscribe, unsubscribe, publish, an inbound-message stream, and
//! an error channel. Connecting to a broker, authentication, and wire
//! framing are the transport's problem, not this crate's.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;

/// MQTT quality of service, mirroring the three levels the `codec` crate's
/// own `QoS::{AtMostOnce,AtLeastOnce,ExactOnce}` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One inbound MQTT publish delivered to us.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The contract a Peer needs from an MQTT client. A real implementation
/// wraps a connected client (e.g. `rumqttc`, `paho-mqtt`, or `ruo`);
/// [`crate::mock::MockTransport`] provides an in-memory broker for tests
/// and [`NullTransport`] backs dry-run-only peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), Error>;
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Error>;

    /// Takes ownership of the transport's single inbound-message stream.
    /// This is the Rust-shaped equivalent of installing a callback via
    /// `on("message", cb)`: it may be called at most once, and the
    /// dispatcher holds onto the receiver for the lifetime of the Peer.
    /// Returns `None` if already taken, or if this transport never
    /// receives messages (e.g. [`NullTransport`]).
    fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>>;

    /// Surfaces a dispatcher-local error (decode/parse/handler failure)
    /// that has no specific caller to report to. Mirrors `emit("error",
    /// err)` on the transport's error channel.
    fn report_error(&self, err: Error);
}

/// A transport that is never connected, used solely to back a dry-run
/// peer that only ever calls `emit(.., dry: true)`. Every network
/// operation fails, since such a peer must never actually connect.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn subscribe(&self, _topic: &str, _qos: QoS) -> Result<(), Error> {
        Err(Error::Transport("null transport is not connected".to_string()))
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<(), Error> {
        Err(Error::Transport("null transport is not connected".to_string()))
    }

    async fn publish(&self, _topic: &str, _payload: Vec<u8>, _qos: QoS) -> Result<(), Error> {
        Err(Error::Transport("null transport is not connected".to_string()))
    }

    fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        None
    }

    fn report_error(&self, err: Error) {
        log::error!("error on null transport (dry-run peer): {err}");
    }
}
