// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Fire-and-forget named events: subscribe/emit, including dry-run emit
//! that returns the would-be publish tuple instead of touching the
//! transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use codec::Value;

use crate::dispatcher::{Context, Routed};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::future::BoxFuture;
use crate::ids::CorrelationId;
use crate::topic::Operation;
use crate::transport::QoS;

/// Out-of-band context handed to an event handler alongside its
/// positional parameters.
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

pub type EventHandler = Arc<dyn Fn(Vec<Value>, EventInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// The `{topic, payload, options}` triple a dry-run `emit` returns instead
/// of publishing, intended for wiring an MQTT last-will.
#[derive(Debug, Clone)]
pub struct DryRunEmit {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

pub struct EventSubsystem {
    ctx: Arc<Context>,
    handlers: Mutex<HashMap<String, EventHandler>>,
}

impl EventSubsystem {
    pub fn new(ctx: Arc<Context>) -> Arc<EventSubsystem> {
        Arc::new(EventSubsystem {
            ctx,
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribes to both the broadcast and direct topics for `event`.
    /// Fails with [`Error::AlreadySubscribed`] if this peer already has a
    /// local handler for it.
    pub async fn subscribe(
        self: &Arc<Self>,
        event: &str,
        qos: Option<QoS>,
        handler: EventHandler,
    ) -> Result<EventSubscription, Error> {
        if self.handlers.lock().unwrap().contains_key(event) {
            return Err(Error::AlreadySubscribed(event.to_string()));
        }

        let broadcast = self.ctx.topic_make.make(event, Operation::EventEmission, None);
        let direct = self
            .ctx
            .topic_make
            .make(event, Operation::EventEmission, Some(self.ctx.peer_id.as_str()));
        let qos = qos.unwrap_or(QoS::AtMostOnce);
        self.ctx
            .subscribe_paired(&[(broadcast.clone(), qos), (direct.clone(), qos)])
            .await?;

        self.handlers.lock().unwrap().insert(event.to_string(), handler);

        Ok(EventSubscription {
            subsystem: Arc::clone(self),
            event: event.to_string(),
            topics: vec![broadcast, direct],
            torn_down: AtomicBool::new(false),
        })
    }

    fn build_envelope(&self, event: &str, params: Option<Vec<Value>>, receiver: Option<&str>) -> Envelope {
        Envelope::EventEmission {
            id: CorrelationId::random(),
            sender: Some(self.ctx.peer_id.as_str().to_string()),
            receiver: receiver.map(str::to_string),
            event: event.to_string(),
            params,
        }
    }

    pub async fn emit(
        &self,
        event: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<(), Error> {
        let envelope = self.build_envelope(event, params, receiver);
        let topic = self.ctx.topic_make.make(event, Operation::EventEmission, receiver);
        let payload = self.ctx.codec.encode(&envelope.to_value())?;
        self.ctx
            .transport
            .publish(&topic, payload, qos.unwrap_or(QoS::AtMostOnce))
            .await
    }

    /// Produces the `{topic, payload, options}` triple without publishing.
    /// The owning peer may have been constructed with a null transport.
    pub fn emit_dry(
        &self,
        event: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<DryRunEmit, Error> {
        let envelope = self.build_envelope(event, params, receiver);
        let topic = self.ctx.topic_make.make(event, Operation::EventEmission, receiver);
        let payload = self.ctx.codec.encode(&envelope.to_value())?;
        Ok(DryRunEmit {
            topic,
            payload,
            qos: qos.unwrap_or(QoS::AtMostOnce),
        })
    }

    pub(crate) async fn handle_routed(self: &Arc<Self>, routed: Routed) {
        if routed.matched.operation != Operation::EventEmission {
            return;
        }
        let Envelope::EventEmission {
            event,
            params,
            sender,
            receiver,
            ..
        } = routed.envelope
        else {
            return;
        };

        let handler = self.handlers.lock().unwrap().get(&event).cloned();
        if let Some(handler) = handler {
            let info = EventInfo { sender, receiver };
            handler(params.unwrap_or_default(), info).await;
        }
    }
}

/// Handle returned by [`EventSubsystem::subscribe`]. Tearing it down
/// removes the local handler and unsubscribes both topics it contributed.
/// A second teardown fails with [`Error::NotSubscribed`].
pub struct EventSubscription {
    subsystem: Arc<EventSubsystem>,
    event: String,
    topics: Vec<String>,
    torn_down: AtomicBool,
}

impl EventSubscription {
    pub async fn unsubscribe(&self) -> Result<(), Error> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Err(Error::NotSubscribed(self.event.clone()));
        }
        self.subsystem.handlers.lock().unwrap().remove(&self.event);
        self.subsystem.ctx.unsubscribe_all(&self.topics).await;
        Ok(())
    }
}
