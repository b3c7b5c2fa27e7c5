// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use thiserror::Error;

/// Failure encoding or decoding a [`crate::Value`] in one of the two wire
/// formats.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode value as {format}: {message}")]
    Encode { format: &'static str, message: String },

    #[error("failed to decode {format} payload: {message}")]
    Decode { format: &'static str, message: String },
}

impl CodecError {
    pub(crate) fn encode(format: &'static str, message: impl Into<String>) -> Self {
        CodecError::Encode {
            format,
            message: message.into(),
        }
    }

    pub(crate) fn decode(format: &'static str, message: impl Into<String>) -> Self {
        CodecError::Decode {
            format,
            message: message.into(),
        }
    }
}
