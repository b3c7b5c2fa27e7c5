// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Owns the transport handle and the background task that decodes,
//! parses, filters, and routes every inbound message to the three
//! subsystem handlers. Also home to the scoped subscribe/unsubscribe
//! helpers the subsystems build their registration/teardown paths on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use codec::CodecKind;

use crate::envelope;
use crate::error::Error;
use crate::ids::PeerId;
use crate::refcount::TopicRefcount;
use crate::topic::{MatchedTopic, TopicMake, TopicMatch};
use crate::transport::{QoS, Transport};

/// Configuration and collaborators shared by the dispatcher and all three
/// subsystems. Cheap to clone (an `Arc` around this is what subsystems
/// actually hold).
pub struct Context {
    pub transport: Arc<dyn Transport>,
    pub peer_id: PeerId,
    pub codec: CodecKind,
    pub topic_make: Arc<dyn TopicMake>,
    pub topic_match: Arc<dyn TopicMatch>,
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl Context {
    /// Subscribes to every topic in `topics`; on a failure partway
    /// through, unsubscribes whatever had already succeeded before
    /// propagating the error.
    pub(crate) async fn subscribe_paired(&self, topics: &[(String, QoS)]) -> Result<(), Error> {
        let mut subscribed = Vec::with_capacity(topics.len());
        for (topic, qos) in topics {
            match self.transport.subscribe(topic, *qos).await {
                Ok(()) => subscribed.push(topic.clone()),
                Err(err) => {
                    for already in &subscribed {
                        let _ = self.transport.unsubscribe(already).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe_all(&self, topics: &[String]) {
        for topic in topics {
            if let Err(err) = self.transport.unsubscribe(topic).await {
                self.transport.report_error(err);
            }
        }
    }

    /// Refcount-subscribe a single response topic: issues a broker
    /// subscribe only for the first outstanding interest.
    pub(crate) async fn acquire_refcounted(
        &self,
        refcount: &TopicRefcount,
        topic: &str,
        qos: QoS,
    ) -> Result<(), Error> {
        if refcount.increment(topic) {
            if let Err(err) = self.transport.subscribe(topic, qos).await {
                refcount.decrement(topic);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Releases one outstanding interest in a refcounted response topic,
    /// unsubscribing once it reaches zero.
    pub(crate) async fn release_refcounted(&self, refcount: &TopicRefcount, topic: &str) {
        if refcount.decrement(topic) {
            if let Err(err) = self.transport.unsubscribe(topic).await {
                self.transport.report_error(err);
            }
        }
    }
}

/// A single decoded, parsed, and peer-filtered inbound envelope, handed to
/// each subsystem in turn. Subsystems that don't recognise the envelope's
/// kind/operation combination simply ignore it.
pub(crate) struct Routed {
    pub envelope: crate::envelope::Envelope,
    pub matched: MatchedTopic,
}

pub(crate) type SubsystemSink = Arc<dyn Fn(Routed) -> crate::future::BoxFuture<'static, ()> + Send + Sync>;

pub struct Dispatcher {
    pub ctx: Arc<Context>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts the background task that pumps `transport.take_message_receiver()`.
    /// `sinks` are invoked, in order, for every successfully decoded and
    /// peer-filtered envelope.
    pub fn start(ctx: Arc<Context>, sinks: Vec<SubsystemSink>) -> Arc<Dispatcher> {
        let rx = ctx.transport.take_message_receiver();
        let task = rx.map(|mut rx| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let payload: Vec<u8> = if ctx.codec.is_text() {
                        match std::str::from_utf8(&message.payload) {
                            Ok(_) => message.payload,
                            Err(err) => {
                                ctx.transport
                                    .report_error(Error::Protocol(format!("payload is not valid utf-8: {err}")));
                                continue;
                            }
                        }
                    } else {
                        message.payload
                    };

                    let value = match ctx.codec.decode(&payload) {
                        Ok(value) => value,
                        Err(err) => {
                            ctx.transport.report_error(Error::from(err));
                            continue;
                        }
                    };

                    let envelope = match envelope::parse(value) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            ctx.transport.report_error(err);
                            continue;
                        }
                    };

                    let matched = match ctx.topic_match.match_topic(&message.topic) {
                        Some(matched) => matched,
                        None => continue,
                    };

                    if let Some(peer_id) = &matched.peer_id {
                        if !peer_id.is_empty() && peer_id != ctx.peer_id.as_str() {
                            continue;
                        }
                    }

                    for sink in &sinks {
                        sink(Routed {
                            envelope: envelope.clone(),
                            matched: matched.clone(),
                        })
                        .await;
                    }
                }
            })
        });

        Arc::new(Dispatcher {
            ctx,
            task: tokio::sync::Mutex::new(task),
        })
    }

    /// Detaches the inbound handler. Does not retroactively fail in-flight
    /// requests; they will simply time out.
    pub async fn destroy(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}
