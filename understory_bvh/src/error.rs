// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the binary codec.

use alloc::string::String;

use thiserror::Error;

/// Errors produced while encoding or decoding a serialized tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The row store or the tree holds more elements than the format can index.
    #[error("too many elements to encode: {count} exceeds {}", i32::MAX)]
    TooManyElements {
        /// Offending element count.
        count: usize,
    },

    /// Input ended before a complete field could be read.
    #[error("unexpected end of input at byte {offset}: needed {needed} more bytes")]
    UnexpectedEof {
        /// Byte offset where the read started.
        offset: usize,
        /// Bytes the read required.
        needed: usize,
    },

    /// A child marker byte used a reserved bit pattern.
    #[error("invalid child marker {byte:#010b} at byte {offset}")]
    InvalidMarker {
        /// Byte offset of the marker.
        offset: usize,
        /// The rejected byte.
        byte: u8,
    },

    /// The payload codec rejected a leaf payload.
    #[error("invalid payload at byte {offset}: {message}")]
    InvalidPayload {
        /// Byte offset where the payload started.
        offset: usize,
        /// Description supplied by the payload codec.
        message: String,
    },
}
