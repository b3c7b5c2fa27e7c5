// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Receiver/meta opaque wrappers and the variadic argument classifier.
//!
//! The source this system was distilled from offers both positional and
//! struct-like call shapes. Rust has no variadic overloading, so
//! `peerlink`'s public API (`Peer::emit`, `Peer::call`, ...) is
//! struct-shaped by construction; [`classify`] exists for callers building
//! a dynamic, positionally-mixed argument list (e.g. a scripting bridge)
//! who still need the same "receiver, then options, then meta, then
//! params" disambiguation rule spelled out in the design notes.

use std::collections::BTreeMap;

use codec::Value;

use crate::ids::PeerId;
use crate::transport::QoS;

/// Marks an argument as "send directly to this peer id" rather than a
/// positional parameter. Collapses to a plain `PeerId` once past this
/// module; it must never leak further into the subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver(PeerId);

impl Receiver {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Receiver(peer_id.into())
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.0
    }

    pub fn into_peer_id(self) -> PeerId {
        self.0
    }
}

/// Marks an argument as out-of-band metadata rather than a positional
/// parameter. Collapses to a plain key-value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta(BTreeMap<String, Value>);

impl Meta {
    pub fn new(map: BTreeMap<String, Value>) -> Self {
        Meta(map)
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.0
    }
}

/// Per-call overrides for the QoS a publish or subscribe uses. Detected,
/// in the classifier, "by containing only the known option keys" in the
/// source system; here it is simply its own tagged variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub qos: Option<QoS>,
}

/// One leading, positionally ambiguous argument to a dynamic call.
#[derive(Debug, Clone)]
pub enum LeadingArg {
    Receiver(PeerId),
    Options(PublishOptions),
    Meta(BTreeMap<String, Value>),
    Param(Value),
}

/// The result of classifying a dynamic argument list: an optional leading
/// receiver, optional publish-options, optional metadata, and the
/// remaining user parameters in order.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedArgs {
    pub receiver: Option<PeerId>,
    pub options: Option<PublishOptions>,
    pub meta: Option<BTreeMap<String, Value>>,
    pub params: Vec<Value>,
}

/// Classifies a leading run of `[receiver?, options?, meta?]` off the
/// front of `args`, in that fixed order, then takes everything else as
/// positional parameters.
pub fn classify(args: Vec<LeadingArg>) -> ClassifiedArgs {
    let mut out = ClassifiedArgs::default();
    let mut iter = args.into_iter().peekable();

    if matches!(iter.peek(), Some(LeadingArg::Receiver(_))) {
        if let Some(LeadingArg::Receiver(id)) = iter.next() {
            out.receiver = Some(id);
        }
    }
    if matches!(iter.peek(), Some(LeadingArg::Options(_))) {
        if let Some(LeadingArg::Options(options)) = iter.next() {
            out.options = Some(options);
        }
    }
    if matches!(iter.peek(), Some(LeadingArg::Meta(_))) {
        if let Some(LeadingArg::Meta(meta)) = iter.next() {
            out.meta = Some(meta);
        }
    }

    for arg in iter {
        if let LeadingArg::Param(value) = arg {
            out.params.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_receiver_then_params() {
        let args = vec![
            LeadingArg::Receiver(PeerId::from("peer-1")),
            LeadingArg::Param(Value::Int(1)),
            LeadingArg::Param(Value::Int(2)),
        ];
        let classified = classify(args);
        assert_eq!(classified.receiver, Some(PeerId::from("peer-1")));
        assert_eq!(classified.params.len(), 2);
        assert!(classified.options.is_none());
        assert!(classified.meta.is_none());
    }

    #[test]
    fn test_classify_full_prefix() {
        let mut meta = BTreeMap::new();
        meta.insert("trace".to_string(), Value::Bool(true));
        let args = vec![
            LeadingArg::Receiver(PeerId::from("peer-2")),
            LeadingArg::Options(PublishOptions { qos: Some(QoS::ExactOnce) }),
            LeadingArg::Meta(meta.clone()),
            LeadingArg::Param(Value::String("x".into())),
        ];
        let classified = classify(args);
        assert_eq!(classified.receiver, Some(PeerId::from("peer-2")));
        assert!(classified.options.is_some());
        assert_eq!(classified.meta, Some(meta));
        assert_eq!(classified.params.len(), 1);
    }

    #[test]
    fn test_classify_params_only() {
        let args = vec![LeadingArg::Param(Value::Null)];
        let classified = classify(args);
        assert!(classified.receiver.is_none());
        assert_eq!(classified.params.len(), 1);
    }
}
