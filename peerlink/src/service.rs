// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Request/response service calls: register/call with per-request
//! correlation, timeout, refcounted response-topic subscription, and
//! error propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use codec::Value;
use tokio::sync::oneshot;

use crate::dispatcher::{Context, Routed};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::future::BoxFuture;
use crate::ids::CorrelationId;
use crate::refcount::TopicRefcount;
use crate::topic::Operation;
use crate::transport::QoS;

#[derive(Debug, Clone)]
pub struct ServiceCallInfo {
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

pub type ServiceHandler =
    Arc<dyn Fn(Vec<Value>, ServiceCallInfo) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

struct PendingCall {
    reply: oneshot::Sender<Result<Value, Error>>,
}

pub struct ServiceSubsystem {
    ctx: Arc<Context>,
    registrations: Mutex<HashMap<String, ServiceHandler>>,
    pending: Mutex<HashMap<CorrelationId, PendingCall>>,
    response_refcount: TopicRefcount,
}

impl ServiceSubsystem {
    pub fn new(ctx: Arc<Context>) -> Arc<ServiceSubsystem> {
        Arc::new(ServiceSubsystem {
            ctx,
            registrations: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            response_refcount: TopicRefcount::new(),
        })
    }

    pub async fn register(
        self: &Arc<Self>,
        service: &str,
        qos: Option<QoS>,
        handler: ServiceHandler,
    ) -> Result<ServiceRegistration, Error> {
        if self.registrations.lock().unwrap().contains_key(service) {
            return Err(Error::AlreadyRegistered(service.to_string()));
        }

        let broadcast = self.ctx.topic_make.make(service, Operation::ServiceCallRequest, None);
        let direct = self.ctx.topic_make.make(
            service,
            Operation::ServiceCallRequest,
            Some(self.ctx.peer_id.as_str()),
        );
        let qos = qos.unwrap_or(QoS::ExactOnce);
        self.ctx
            .subscribe_paired(&[(broadcast.clone(), qos), (direct.clone(), qos)])
            .await?;

        self.registrations.lock().unwrap().insert(service.to_string(), handler);

        Ok(ServiceRegistration {
            subsystem: Arc::clone(self),
            service: service.to_string(),
            topics: vec![broadcast, direct],
            torn_down: AtomicBool::new(false),
        })
    }

    pub async fn call(
        &self,
        service: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<Value, Error> {
        let qos = qos.unwrap_or(QoS::ExactOnce);
        let rid = CorrelationId::random();
        let response_topic = self.ctx.topic_make.make(
            service,
            Operation::ServiceCallResponse,
            Some(self.ctx.peer_id.as_str()),
        );

        // Pre-subscribe before publishing, to avoid a race where the
        // response arrives before the subscription is installed.
        self.ctx
            .acquire_refcounted(&self.response_refcount, &response_topic, qos)
            .await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(rid.clone(), PendingCall { reply: tx });

        let envelope = Envelope::ServiceCallRequest {
            id: rid.clone(),
            sender: Some(self.ctx.peer_id.as_str().to_string()),
            receiver: receiver.map(str::to_string),
            service: service.to_string(),
            params,
        };
        let payload = match self.ctx.codec.encode(&envelope.to_value()) {
            Ok(payload) => payload,
            Err(err) => {
                self.abandon(&rid, &response_topic).await;
                return Err(err.into());
            }
        };
        let request_topic = self.ctx.topic_make.make(service, Operation::ServiceCallRequest, receiver);

        if let Err(err) = self.ctx.transport.publish(&request_topic, payload, QoS::ExactOnce).await {
            self.abandon(&rid, &response_topic).await;
            return Err(err);
        }

        tokio::select! {
            result = rx => result.unwrap_or_else(|_| Err(Error::Service("call cancelled".to_string()))),
            _ = tokio::time::sleep(self.ctx.timeout) => {
                self.abandon(&rid, &response_topic).await;
                Err(Error::Timeout)
            }
        }
    }

    /// Removes a still-pending call's table entry and releases its
    /// response-topic subscription interest; used on publish failure and
    /// on timeout.
    async fn abandon(&self, rid: &CorrelationId, response_topic: &str) {
        self.pending.lock().unwrap().remove(rid);
        self.ctx.release_refcounted(&self.response_refcount, response_topic).await;
    }

    async fn handle_request(
        self: Arc<Self>,
        service: String,
        params: Option<Vec<Value>>,
        sender: Option<String>,
        receiver: Option<String>,
        rid: CorrelationId,
    ) {
        let Some(requester) = sender.clone() else {
            self.ctx.transport.report_error(Error::MissingSender);
            return;
        };

        let handler = self.registrations.lock().unwrap().get(&service).cloned();
        let (result, error) = match handler {
            None => (None, Some(format!("method not found: {service}"))),
            Some(handler) => {
                let info = ServiceCallInfo { sender, receiver };
                match handler(params.unwrap_or_default(), info).await {
                    Ok(value) => (Some(value), None),
                    Err(message) => (None, Some(Error::from_handler_failure(Some(message)))),
                }
            }
        };

        let response = Envelope::ServiceCallResponse {
            id: rid,
            sender: Some(self.ctx.peer_id.as_str().to_string()),
            receiver: Some(requester.clone()),
            result,
            error,
        };
        let topic = self
            .ctx
            .topic_make
            .make(&service, Operation::ServiceCallResponse, Some(&requester));
        match self.ctx.codec.encode(&response.to_value()) {
            Ok(payload) => {
                if let Err(err) = self.ctx.transport.publish(&topic, payload, QoS::ExactOnce).await {
                    self.ctx.transport.report_error(err);
                }
            }
            Err(err) => self.ctx.transport.report_error(err.into()),
        }
    }

    pub(crate) async fn handle_routed(self: &Arc<Self>, routed: Routed) {
        match (&routed.matched.operation, routed.envelope) {
            (
                Operation::ServiceCallRequest,
                Envelope::ServiceCallRequest {
                    id,
                    sender,
                    receiver,
                    service,
                    params,
                },
            ) => {
                let this = Arc::clone(self);
                tokio::spawn(this.handle_request(service, params, sender, receiver, id));
            }
            (Operation::ServiceCallResponse, Envelope::ServiceCallResponse { id, result, error, .. }) => {
                let pending = self.pending.lock().unwrap().remove(&id);
                if let Some(pending) = pending {
                    let outcome = match error {
                        Some(message) => Err(Error::Service(message)),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = pending.reply.send(outcome);
                    let response_topic = self.ctx.topic_make.make(
                        &routed.matched.name,
                        Operation::ServiceCallResponse,
                        Some(self.ctx.peer_id.as_str()),
                    );
                    self.ctx.release_refcounted(&self.response_refcount, &response_topic).await;
                }
            }
            _ => {}
        }
    }
}

/// Handle returned by [`ServiceSubsystem::register`].
pub struct ServiceRegistration {
    subsystem: Arc<ServiceSubsystem>,
    service: String,
    topics: Vec<String>,
    torn_down: AtomicBool,
}

impl ServiceRegistration {
    pub async fn unregister(&self) -> Result<(), Error> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Err(Error::NotRegistered(self.service.clone()));
        }
        self.subsystem.registrations.lock().unwrap().remove(&self.service);
        self.subsystem.ctx.unsubscribe_all(&self.topics).await;
        Ok(())
    }
}
