// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Event/service/resource communication patterns layered over an
//! MQTT-shaped pub/sub transport: envelope wire format, topic naming,
//! request/response correlation, chunked transfers, and the dispatcher
//! tying it all to an external [`transport::Transport`].

mod args;
mod dispatcher;
mod envelope;
pub mod error;
mod event;
pub mod future;
mod ids;
pub mod mock;
mod peer;
mod refcount;
mod resource;
mod service;
mod topic;
pub mod transport;

pub use args::{classify, ClassifiedArgs, LeadingArg, Meta, PublishOptions, Receiver};
pub use error::Error;
pub use event::{DryRunEmit, EventHandler, EventInfo, EventSubscription};
pub use future::{ready, BoxFuture};
pub use ids::{CorrelationId, PeerId};
pub use peer::{Peer, PeerOptions};
pub use resource::{
    ByteStream, ChunkStream, FetchHandle, ProvisionOutcome, ResourceData, ResourceHandler, ResourceInfo,
    ResourceOutcome, ResourceProvisioning,
};
pub use service::{ServiceCallInfo, ServiceHandler, ServiceRegistration};
pub use topic::{DefaultTopicScheme, MatchedTopic, Operation, TopicMake, TopicMatch};
pub use transport::{InboundMessage, NullTransport, QoS, Transport};
