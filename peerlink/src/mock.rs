// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! An in-memory broker used to exercise the full dispatcher/event/
//! service/resource state machines in tests without a real MQTT broker,
//! the way `hebo`'s own `tests/common` harness spins up a broker in
//! process for integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::transport::{InboundMessage, QoS, Transport};

type Subscriber = (u64, mpsc::UnboundedSender<InboundMessage>);

/// Shared, in-process broker state. Construct one [`MockBroker`] per test
/// and call [`MockBroker::connect`] once per simulated peer.
#[derive(Default)]
pub struct MockBroker {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Arc<MockBroker> {
        Arc::new(MockBroker::default())
    }

    pub fn connect(self: &Arc<Self>) -> Arc<MockTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(MockTransport {
            broker: Arc::clone(self),
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            sender: tx,
            receiver: Mutex::new(Some(rx)),
            errors: Mutex::new(Vec::new()),
        })
    }
}

/// One peer's connection to a [`MockBroker`].
pub struct MockTransport {
    broker: Arc<MockBroker>,
    id: u64,
    sender: mpsc::UnboundedSender<InboundMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    errors: Mutex<Vec<Error>>,
}

impl MockTransport {
    /// Errors reported via [`Transport::report_error`] since the last
    /// drain, for tests asserting on dispatcher-local failures.
    pub fn drain_errors(&self) -> Vec<Error> {
        std::mem::take(&mut self.errors.lock().unwrap())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.broker
            .subscribers
            .lock()
            .unwrap()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), Error> {
        self.broker
            .subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((self.id, self.sender.clone()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        if let Some(subs) = self.broker.subscribers.lock().unwrap().get_mut(topic) {
            subs.retain(|(id, _)| *id != self.id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), Error> {
        let subs = self.broker.subscribers.lock().unwrap();
        if let Some(subs) = subs.get(topic) {
            for (_, sender) in subs {
                let _ = sender.send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.receiver.lock().unwrap().take()
    }

    fn report_error(&self, err: Error) {
        log::warn!("mock transport observed dispatcher-local error: {err}");
        self.errors.lock().unwrap().push(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = MockBroker::new();
        let a = broker.connect();
        let b = broker.connect();
        a.subscribe("t/1", QoS::AtMostOnce).await.unwrap();
        let mut rx = a.take_message_receiver().unwrap();
        b.publish("t/1", b"hi".to_vec(), QoS::AtMostOnce).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"hi");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MockBroker::new();
        let a = broker.connect();
        a.subscribe("t/1", QoS::AtMostOnce).await.unwrap();
        a.unsubscribe("t/1").await.unwrap();
        assert_eq!(a.subscriber_count("t/1"), 0);
    }
}
