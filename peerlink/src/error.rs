// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use thiserror::Error;

/// The full error taxonomy a [`crate::Peer`] can produce or observe.
///
/// Per-call errors (`ServiceError`, `ResourceError`, `TimeoutError`, the
/// `AlreadyXError`/`NotXError` pairs) reach the caller directly. Errors
/// discovered while decoding or dispatching an inbound message have no
/// caller to report to and are instead handed to
/// [`crate::transport::Transport::report_error`].
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] codec::CodecError),

    #[error("malformed envelope: {0}")]
    Protocol(String),

    #[error("already subscribed to event `{0}`")]
    AlreadySubscribed(String),

    #[error("not subscribed to event `{0}`")]
    NotSubscribed(String),

    #[error("already registered service `{0}`")]
    AlreadyRegistered(String),

    #[error("not registered as service `{0}`")]
    NotRegistered(String),

    #[error("already provisioned resource `{0}`")]
    AlreadyProvisioned(String),

    #[error("not provisioned as resource `{0}`")]
    NotProvisioned(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("communication timeout")]
    Timeout,

    #[error("push stream timeout")]
    PushStreamTimeout,

    #[error("{0}")]
    Service(String),

    #[error("{0}")]
    Resource(String),

    #[error("handler did not provide data via info.resource/buffer/stream")]
    MissingData,

    #[error("invalid request: missing sender")]
    MissingSender,
}

impl Error {
    /// `true` for the two timeout variants, useful for callers that want to
    /// retry only on timeout and not on remote-reported failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout | Error::PushStreamTimeout)
    }

    /// Derive the error string carried on a `service-call-response` or
    /// `resource-transfer-response` envelope from a handler's failure value,
    /// per the rule: empty value -> "undefined error"; string -> as-is;
    /// error-with-message -> its message; otherwise the value's string form.
    pub fn from_handler_failure(message: Option<String>) -> String {
        match message {
            None => "undefined error".to_string(),
            Some(s) if s.is_empty() => "undefined error".to_string(),
            Some(s) => s,
        }
    }
}
