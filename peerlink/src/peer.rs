// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Assembles the codec, topic scheme, dispatcher, and the three
//! subsystems into a single externally-facing [`Peer`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use codec::{CodecKind, Value};

use crate::args::{Meta, Receiver};
use crate::dispatcher::{Context, Dispatcher, Routed, SubsystemSink};
use crate::error::Error;
use crate::event::{DryRunEmit, EventHandler, EventSubscription, EventSubsystem};
use crate::future::BoxFuture;
use crate::ids::PeerId;
use crate::resource::{FetchHandle, ResourceData, ResourceHandler, ResourceProvisioning, ResourceSubsystem};
use crate::service::{ServiceHandler, ServiceRegistration, ServiceSubsystem};
use crate::topic::{DefaultTopicScheme, TopicMake, TopicMatch};
use crate::transport::{NullTransport, QoS, Transport};

const DEFAULT_TIMEOUT_MILLIS: u64 = 10_000;
const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// Construction-time configuration for a [`Peer`], mirroring the
/// set/get builder shape `ruo`'s `ConnectOptions` uses.
#[derive(Clone)]
pub struct PeerOptions {
    id: PeerId,
    codec: CodecKind,
    timeout: Duration,
    chunk_size: usize,
    topic_make: Arc<dyn TopicMake>,
    topic_match: Arc<dyn TopicMatch>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        PeerOptions {
            id: PeerId::random(),
            codec: CodecKind::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MILLIS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            topic_make: Arc::new(DefaultTopicScheme),
            topic_match: Arc::new(DefaultTopicScheme),
        }
    }
}

impl PeerOptions {
    pub fn new() -> Self {
        PeerOptions::default()
    }

    pub fn set_id(&mut self, id: impl Into<PeerId>) -> &mut Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn set_codec(&mut self, codec: CodecKind) -> &mut Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn set_topic_scheme(&mut self, make: Arc<dyn TopicMake>, match_: Arc<dyn TopicMatch>) -> &mut Self {
        self.topic_make = make;
        self.topic_match = match_;
        self
    }
}

/// One process-side instance of the communication engine, bound to one
/// transport. Cheap to clone: every clone shares the same dispatcher,
/// tables and transport handle.
#[derive(Clone)]
pub struct Peer {
    ctx: Arc<Context>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventSubsystem>,
    services: Arc<ServiceSubsystem>,
    resources: Arc<ResourceSubsystem>,
}

impl Peer {
    /// Builds a peer around a connected transport and starts its
    /// dispatch loop.
    pub fn new(transport: Arc<dyn Transport>, options: PeerOptions) -> Peer {
        let ctx = Arc::new(Context {
            transport,
            peer_id: options.id,
            codec: options.codec,
            topic_make: options.topic_make,
            topic_match: options.topic_match,
            timeout: options.timeout,
            chunk_size: options.chunk_size,
        });

        let events = EventSubsystem::new(Arc::clone(&ctx));
        let services = ServiceSubsystem::new(Arc::clone(&ctx));
        let resources = ResourceSubsystem::new(Arc::clone(&ctx));

        let sinks: Vec<SubsystemSink> = vec![
            {
                let events = Arc::clone(&events);
                Arc::new(move |routed: Routed| -> BoxFuture<'static, ()> {
                    let events = Arc::clone(&events);
                    Box::pin(async move { events.handle_routed(routed).await })
                })
            },
            {
                let services = Arc::clone(&services);
                Arc::new(move |routed: Routed| -> BoxFuture<'static, ()> {
                    let services = Arc::clone(&services);
                    Box::pin(async move { services.handle_routed(routed).await })
                })
            },
            {
                let resources = Arc::clone(&resources);
                Arc::new(move |routed: Routed| -> BoxFuture<'static, ()> {
                    let resources = Arc::clone(&resources);
                    Box::pin(async move { resources.handle_routed(routed).await })
                })
            },
        ];

        let dispatcher = Dispatcher::start(Arc::clone(&ctx), sinks);

        Peer {
            ctx,
            dispatcher,
            events,
            services,
            resources,
        }
    }

    /// Builds a peer that never touches the network: every call that
    /// would publish or subscribe fails. Its only legitimate use is
    /// producing dry-run emit tuples for last-will wiring.
    pub fn new_dry_run(options: PeerOptions) -> Peer {
        Peer::new(Arc::new(NullTransport), options)
    }

    pub fn id(&self) -> &PeerId {
        &self.ctx.peer_id
    }

    /// Wraps a peer id as a directed-call target.
    pub fn receiver(&self, id: impl Into<PeerId>) -> Receiver {
        Receiver::new(id)
    }

    /// Wraps a key-value map as out-of-band call metadata.
    pub fn meta(&self, map: BTreeMap<String, Value>) -> Meta {
        Meta::new(map)
    }

    // -- Events --------------------------------------------------------

    pub async fn subscribe(&self, event: &str, qos: Option<QoS>, handler: EventHandler) -> Result<EventSubscription, Error> {
        self.events.subscribe(event, qos, handler).await
    }

    pub async fn emit(&self, event: &str, params: Option<Vec<Value>>, receiver: Option<&str>, qos: Option<QoS>) -> Result<(), Error> {
        self.events.emit(event, params, receiver, qos).await
    }

    /// Produces the would-be publish tuple instead of publishing. The
    /// peer may have been built with [`Peer::new_dry_run`].
    pub fn emit_dry(
        &self,
        event: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<DryRunEmit, Error> {
        self.events.emit_dry(event, params, receiver, qos)
    }

    // -- Services --------------------------------------------------------

    pub async fn register(&self, service: &str, qos: Option<QoS>, handler: ServiceHandler) -> Result<ServiceRegistration, Error> {
        self.services.register(service, qos, handler).await
    }

    pub async fn call(
        &self,
        service: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<Value, Error> {
        self.services.call(service, params, receiver, qos).await
    }

    // -- Resources --------------------------------------------------------

    pub async fn provision(&self, resource: &str, qos: Option<QoS>, handler: ResourceHandler) -> Result<ResourceProvisioning, Error> {
        self.resources.provision(resource, qos, handler).await
    }

    pub async fn fetch(
        &self,
        resource: &str,
        params: Option<Vec<Value>>,
        receiver: Option<&str>,
        qos: Option<QoS>,
    ) -> Result<FetchHandle, Error> {
        self.resources.fetch(resource, params, receiver, qos).await
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
        self.resources.push(resource, data, params, meta, receiver, qos).await
    }

    /// Detaches the inbound-message handler. In-flight requests are not
    /// retroactively failed; they simply time out.
    pub async fn destroy(&self) {
        self.dispatcher.destroy().await;
    }
}
