// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Bidirectional chunked byte transfers: `provision`/`fetch`/`push`, with
//! lazy buffer aggregation, first-chunk metadata, and push-stream timeout
//! cleanup.
//!
//! `resource-transfer-response` is the one envelope kind used in both
//! directions (provisioner answering a fetch, and a pusher streaming data
//! at a provisioner); the two are told apart on arrival by whether a
//! pending fetch entry claims the correlation id first, falling back to
//! the presence of the `resource` field.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use codec::Value;

use crate::dispatcher::{Context, Routed};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::future::BoxFuture;
use crate::ids::CorrelationId;
use crate::refcount::TopicRefcount;
use crate::topic::Operation;
use crate::transport::QoS;

/// A lazily-produced sequence of chunks, each either a byte slice or a
/// terminal failure message, fed to `push`/a fetch-response's chunking.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// Chunks of an in-progress transfer as they arrive over the wire,
/// handed to a provisioner's push-direction invocation.
pub type ChunkStream = mpsc::UnboundedReceiver<Result<Vec<u8>, Error>>;

/// Either form a payload may take: already-assembled, or produced
/// incrementally. Used both for a provisioner's fetch-response and for a
/// `push` call's outbound data.
pub enum ResourceData {
    Buffer(Vec<u8>),
    Stream(ByteStream),
}

/// What a provisioner handler hands back for the fetch direction: the
/// payload plus metadata to carry on the first response chunk.
pub struct ProvisionOutcome {
    pub meta: Option<BTreeMap<String, Value>>,
    pub data: ResourceData,
}

/// Context passed to a provisioner handler. `inbound` is `Some` only for a
/// push-direction invocation, carrying the live stream of chunks as they
/// arrive; a fetch-direction invocation leaves it `None` and expects
/// [`ResourceOutcome::Serve`] back.
pub struct ResourceInfo {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub meta: Option<BTreeMap<String, Value>>,
    pub inbound: Option<ChunkStream>,
}

/// A provisioner handler's result: data to serve back (fetch direction),
/// or an acknowledgement that it has finished draining `inbound` (push
/// direction; nothing is sent back).
pub enum ResourceOutcome {
    Serve(ProvisionOutcome),
    Consumed,
}

pub type ResourceHandler =
    Arc<dyn Fn(Vec<Value>, ResourceInfo) -> BoxFuture<'static, Result<ResourceOutcome, String>> + Send + Sync>;

/// Handle returned by [`ResourceSubsystem::fetch`].
pub struct FetchHandle {
    pub meta: oneshot::Receiver<Option<BTreeMap<String, Value>>>,
    pub stream: ChunkStream,
}

impl FetchHandle {
    /// Aggregates every chunk until the stream closes. Fails with whatever
    /// error terminated the transfer (remote error or timeout).
    pub async fn buffer(mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        while let Some(item) = self.stream.recv().await {
            out.extend(item?);
        }
        Ok(out)
    }
}

struct FetchEntry {
    meta_tx: Option<oneshot::Sender<Option<BTreeMap<String, Value>>>>,
    chunk_tx: mpsc::UnboundedSender<Result<Vec<u8>, Error>>,
    timer: Option<JoinHandle<()>>,
}

struct PushEntry {
    chunk_tx: mpsc::UnboundedSender<Result<Vec<u8>, Error>>,
    timer: JoinHandle<()>,
}

pub struct ResourceSubsystem {
    ctx: Arc<Context>,
    provisions: Mutex<HashMap<String, ResourceHandler>>,
    fetches: Mutex<HashMap<CorrelationId, FetchEntry>>,
    pushes: Mutex<HashMap<CorrelationId, PushEntry>>,
    response_refcount: TopicRefcount,
}

fn split_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return Vec::new();
    }
    bytes.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect()
}

impl ResourceSubsystem {
    pub fn new(ctx: Arc<Context>) -> Arc<ResourceSubsystem> {
        Arc::new(ResourceSubsystem {
            ctx,
            provisions: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            pushes: Mutex::new(HashMap::new()),
            response_refcount: TopicRefcount::new(),
        })
    }

    pub async fn provision(
        self: &Arc<Self>,
        resource: &str,
        qos: Option<QoS>,
        handler: ResourceHandler,
    ) -> Result<ResourceProvisioning, Error> {
        if self.provisions.lock().unwrap().contains_key(resource) {
            return Err(Error::AlreadyProvisioned(resource.to_string()));
        }

        let qos = qos.unwrap_or(QoS::ExactOnce);
        let topics = vec![
            self.ctx.topic_make.make(resource, Operation::ResourceTransferRequest, None),
            self.ctx
                .topic_make
                .make(resource, Operation::ResourceTransferRequest, Some(self.ctx.peer_id.as_str())),
            self.ctx.topic_make.make(resource, Operation::ResourceTransferResponse, None),
            self.ctx
                .topic_make
                .make(resource, Operation::ResourceTransferResponse, Some(self.ctx.peer_id.as_str())),
        ];
        let with_qos: Vec<_> = topics.iter().cloned().map(|t| (t, qos)).collect();
        self.ctx.subscribe_paired(&with_qos).await?;

        self.provisions.lock().unwrap().insert(resource.to_string(), handler);

        Ok(ResourceProvisioning {
            subsystem: Arc::clone(self),
            resource: resource.to_string(),
            topics,
            torn_down: AtomicBool::new(false),
        })
    }

    pub async fn fetch(
        self: &Arc<Self>,
        resource: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<FetchHandle, Error> {
        let qos = qos.unwrap_or(QoS::ExactOnce);
        let rid = CorrelationId::random();
        let response_topic = self.ctx.topic_make.make(
            resource,
            Operation::ResourceTransferResponse,
            Some(self.ctx.peer_id.as_str()),
        );
        self.ctx
            .acquire_refcounted(&self.response_refcount, &response_topic, qos)
            .await?;

        let (meta_tx, meta_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        self.fetches.lock().unwrap().insert(
            rid.clone(),
            FetchEntry {
                meta_tx: Some(meta_tx),
                chunk_tx,
                timer: None,
            },
        );

        let envelope = Envelope::ResourceTransferRequest {
            id: rid.clone(),
            sender: Some(self.ctx.peer_id.as_str().to_string()),
            receiver: receiver.map(str::to_string),
            resource: resource.to_string(),
            params,
        };
        let payload = match self.ctx.codec.encode(&envelope.to_value()) {
            Ok(payload) => payload,
            Err(err) => {
                self.abandon_fetch(&rid, &response_topic).await;
                return Err(err.into());
            }
        };
        let request_topic = self.ctx.topic_make.make(resource, Operation::ResourceTransferRequest, receiver);
        if let Err(err) = self.ctx.transport.publish(&request_topic, payload, QoS::ExactOnce).await {
            self.abandon_fetch(&rid, &response_topic).await;
            return Err(err);
        }

        let this = Arc::clone(self);
        let timer_rid = rid.clone();
        let timer_topic = response_topic.clone();
        let timeout = self.ctx.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = this.fetches.lock().unwrap().remove(&timer_rid);
            if let Some(entry) = entry {
                if let Some(meta_tx) = entry.meta_tx {
                    let _ = meta_tx.send(None);
                }
                let _ = entry.chunk_tx.send(Err(Error::Timeout));
                this.ctx.release_refcounted(&this.response_refcount, &timer_topic).await;
            }
        });
        if let Some(entry) = self.fetches.lock().unwrap().get_mut(&rid) {
            entry.timer = Some(timer);
        } else {
            timer.abort();
        }

        Ok(FetchHandle { meta: meta_rx, stream: chunk_rx })
    }

    async fn abandon_fetch(&self, rid: &CorrelationId, response_topic: &str) {
        self.fetches.lock().unwrap().remove(rid);
        self.ctx.release_refcounted(&self.response_refcount, response_topic).await;
    }

    pub async fn push(
        &self,
        resource: &str,
        data: ResourceData,
        params: Option<Vec<Value>>,
        meta: Option<BTreeMap<String, Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<(), Error> {
        let qos = qos.unwrap_or(QoS::ExactOnce);
        let rid = CorrelationId::random();
        let topic = self.ctx.topic_make.make(resource, Operation::ResourceTransferResponse, receiver);
        self.publish_transfer(
            &topic,
            rid,
            Some(resource.to_string()),
            params,
            meta,
            data,
            qos,
            receiver.map(str::to_string),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_one(
        &self,
        topic: &str,
        id: CorrelationId,
        resource: Option<String>,
        params: Option<Vec<Value>>,
        meta: Option<BTreeMap<String, Value>>,
        chunk: Option<Vec<u8>>,
        error: Option<String>,
        is_final: bool,
        qos: QoS,
        receiver: Option<String>,
    ) -> Result<(), Error> {
        let envelope = Envelope::ResourceTransferResponse {
            id,
            sender: Some(self.ctx.peer_id.as_str().to_string()),
            receiver,
            resource,
            params,
            chunk,
            meta,
            error,
            is_final,
        };
        let payload = self.ctx.codec.encode(&envelope.to_value())?;
        self.ctx.transport.publish(topic, payload, qos).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_transfer(
        &self,
        topic: &str,
        rid: CorrelationId,
        resource: Option<String>,
        params: Option<Vec<Value>>,
        mut meta: Option<BTreeMap<String, Value>>,
        data: ResourceData,
        qos: QoS,
        receiver: Option<String>,
    ) -> Result<(), Error> {
        match data {
            ResourceData::Buffer(buf) => {
                let chunks = split_chunks(&buf, self.ctx.chunk_size);
                if chunks.is_empty() {
                    self.publish_one(topic, rid, resource, params, meta.take(), None, None, true, qos, receiver)
                        .await
                } else {
                    let last = chunks.len() - 1;
                    for (i, chunk) in chunks.into_iter().enumerate() {
                        self.publish_one(
                            topic,
                            rid.clone(),
                            resource.clone(),
                            if i == 0 { params.clone() } else { None },
                            if i == 0 { meta.take() } else { None },
                            Some(chunk),
                            None,
                            i == last,
                            qos,
                            receiver.clone(),
                        )
                        .await?;
                    }
                    Ok(())
                }
            }
            ResourceData::Stream(mut stream) => {
                let mut first = true;
                loop {
                    match stream.next().await {
                        Some(Ok(bytes)) => {
                            for piece in split_chunks(&bytes, self.ctx.chunk_size) {
                                self.publish_one(
                                    topic,
                                    rid.clone(),
                                    resource.clone(),
                                    if first { params.clone() } else { None },
                                    if first { meta.take() } else { None },
                                    Some(piece),
                                    None,
                                    false,
                                    qos,
                                    receiver.clone(),
                                )
                                .await?;
                                first = false;
                            }
                        }
                        Some(Err(message)) => {
                            return self
                                .publish_one(
                                    topic,
                                    rid.clone(),
                                    resource.clone(),
                                    None,
                                    None,
                                    None,
                                    Some(message),
                                    true,
                                    qos,
                                    receiver.clone(),
                                )
                                .await;
                        }
                        None => {
                            return self
                                .publish_one(
                                    topic,
                                    rid.clone(),
                                    resource.clone(),
                                    if first { params.clone() } else { None },
                                    if first { meta.take() } else { None },
                                    None,
                                    None,
                                    true,
                                    qos,
                                    receiver.clone(),
                                )
                                .await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_request(
        self: Arc<Self>,
        resource: String,
        params: Option<Vec<Value>>,
        sender: Option<String>,
        receiver: Option<String>,
        rid: CorrelationId,
    ) {
        let Some(requester) = sender.clone() else {
            self.ctx.transport.report_error(Error::MissingSender);
            return;
        };
        let topic = self
            .ctx
            .topic_make
            .make(&resource, Operation::ResourceTransferResponse, Some(&requester));

        let handler = self.provisions.lock().unwrap().get(&resource).cloned();
        let Some(handler) = handler else {
            let _ = self
                .publish_one(
                    &topic,
                    rid,
                    None,
                    None,
                    None,
                    None,
                    Some(format!("no provisioner for resource: {resource}")),
                    true,
                    QoS::ExactOnce,
                    Some(requester),
                )
                .await;
            return;
        };

        let info = ResourceInfo {
            sender,
            receiver,
            meta: None,
            inbound: None,
        };
        match handler(params.unwrap_or_default(), info).await {
            Err(message) => {
                let error = Error::from_handler_failure(Some(message));
                let _ = self
                    .publish_one(&topic, rid, None, None, None, None, Some(error), true, QoS::ExactOnce, Some(requester))
                    .await;
            }
            Ok(ResourceOutcome::Consumed) => {
                let _ = self
                    .publish_one(
                        &topic,
                        rid,
                        None,
                        None,
                        None,
                        None,
                        Some(Error::MissingData.to_string()),
                        true,
                        QoS::ExactOnce,
                        Some(requester),
                    )
                    .await;
            }
            Ok(ResourceOutcome::Serve(outcome)) => {
                if let Err(err) = self
                    .publish_transfer(&topic, rid, None, None, outcome.meta, outcome.data, QoS::ExactOnce, Some(requester))
                    .await
                {
                    self.ctx.transport.report_error(err);
                }
            }
        }
    }

    async fn handle_fetch_chunk(
        &self,
        id: CorrelationId,
        resource_name: &str,
        chunk: Option<Vec<u8>>,
        meta: Option<BTreeMap<String, Value>>,
        error: Option<String>,
        is_final: bool,
    ) {
        let mut finalize = false;
        {
            let mut table = self.fetches.lock().unwrap();
            if let Some(entry) = table.get_mut(&id) {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                if let Some(meta_tx) = entry.meta_tx.take() {
                    let _ = meta_tx.send(meta);
                }
                if let Some(bytes) = &chunk {
                    if !bytes.is_empty() {
                        let _ = entry.chunk_tx.send(Ok(bytes.clone()));
                    }
                }
                if let Some(message) = error {
                    let _ = entry.chunk_tx.send(Err(Error::Resource(message)));
                    finalize = true;
                } else if is_final {
                    finalize = true;
                }
            }
            if finalize {
                table.remove(&id);
            }
        }
        if finalize {
            let topic = self
                .ctx
                .topic_make
                .make(resource_name, Operation::ResourceTransferResponse, Some(self.ctx.peer_id.as_str()));
            self.ctx.release_refcounted(&self.response_refcount, &topic).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_push_chunk(
        self: &Arc<Self>,
        id: CorrelationId,
        resource: String,
        params: Option<Vec<Value>>,
        chunk: Option<Vec<u8>>,
        meta: Option<BTreeMap<String, Value>>,
        error: Option<String>,
        is_final: bool,
        sender: Option<String>,
        receiver: Option<String>,
    ) {
        let mut spawn_handler = None;
        let mut finalize = false;
        {
            let mut table = self.pushes.lock().unwrap();
            if !table.contains_key(&id) {
                let (tx, rx) = mpsc::unbounded_channel::<Result<Vec<u8>, Error>>();
                let this = Arc::clone(self);
                let timer_id = id.clone();
                let timeout = self.ctx.timeout;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let entry = this.pushes.lock().unwrap().remove(&timer_id);
                    if let Some(entry) = entry {
                        let _ = entry.chunk_tx.send(Err(Error::PushStreamTimeout));
                    }
                });
                table.insert(id.clone(), PushEntry { chunk_tx: tx, timer });
                if let Some(handler) = self.provisions.lock().unwrap().get(&resource).cloned() {
                    spawn_handler = Some((handler, rx));
                }
            }

            if let Some(entry) = table.get(&id) {
                if let Some(bytes) = &chunk {
                    if !bytes.is_empty() {
                        let _ = entry.chunk_tx.send(Ok(bytes.clone()));
                    }
                }
                if let Some(message) = &error {
                    let _ = entry.chunk_tx.send(Err(Error::Resource(message.clone())));
                    finalize = true;
                } else if is_final {
                    finalize = true;
                }
            }
            if finalize {
                if let Some(entry) = table.remove(&id) {
                    entry.timer.abort();
                }
            }
        }

        if let Some((handler, stream)) = spawn_handler {
            let info = ResourceInfo {
                sender,
                receiver,
                meta,
                inbound: Some(stream),
            };
            tokio::spawn(async move {
                let _ = handler(params.unwrap_or_default(), info).await;
            });
        }
    }

    pub(crate) async fn handle_routed(self: &Arc<Self>, routed: Routed) {
        match (&routed.matched.operation, routed.envelope) {
            (
                Operation::ResourceTransferRequest,
                Envelope::ResourceTransferRequest {
                    id,
                    sender,
                    receiver,
                    resource,
                    params,
                },
            ) => {
                let this = Arc::clone(self);
                tokio::spawn(this.handle_request(resource, params, sender, receiver, id));
            }
            (
                Operation::ResourceTransferResponse,
                Envelope::ResourceTransferResponse {
                    id,
                    resource,
                    params,
                    chunk,
                    meta,
                    error,
                    is_final,
                    sender,
                    receiver,
                },
            ) => {
                let is_fetch = self.fetches.lock().unwrap().contains_key(&id);
                if is_fetch {
                    self.handle_fetch_chunk(id, &routed.matched.name, chunk, meta, error, is_final).await;
                } else if let Some(resource) = resource {
                    self.handle_push_chunk(id, resource, params, chunk, meta, error, is_final, sender, receiver)
                        .await;
                }
            }
            _ => {}
        }
    }
}

/// Handle returned by [`ResourceSubsystem::provision`].
pub struct ResourceProvisioning {
    subsystem: Arc<ResourceSubsystem>,
    resource: String,
    topics: Vec<String>,
    torn_down: AtomicBool,
}

impl ResourceProvisioning {
    pub async fn unprovision(&self) -> Result<(), Error> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Err(Error::NotProvisioned(self.resource.clone()));
        }
        self.subsystem.provisions.lock().unwrap().remove(&self.resource);
        self.subsystem.ctx.unsubscribe_all(&self.topics).await;
        Ok(())
    }
}
