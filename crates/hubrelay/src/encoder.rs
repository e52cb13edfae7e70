// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-safe payload encoding.
//!
//! The destination API carries message values as base64 text. The encoded
//! length, not the raw payload length, is what counts against the batch
//! byte limit.

use base64::{engine::general_purpose, Engine as _};

/// A payload in its wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    data: String,
}

impl EncodedPayload {
    /// Encoded text as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the encoding of an empty payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume into the encoded string.
    pub fn into_string(self) -> String {
        self.data
    }
}

/// Encode an arbitrary byte payload. Total and deterministic.
pub fn encode(payload: &[u8]) -> EncodedPayload {
    EncodedPayload {
        data: general_purpose::STANDARD.encode(payload),
    }
}

/// Length `encode` would produce for a payload of `raw_len` bytes.
pub fn encoded_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Decode a wire payload back to raw bytes, the way the destination does.
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(encoded)
}
