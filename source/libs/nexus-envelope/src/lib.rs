// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded, typed message envelope exchanged over rendezvous channels
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + golden vector + proptest round-trip
//!
//! Wire layout (little-endian):
//!
//! ```text
//! +--------+--------+-----------------+
//! | ty u32 | len u32| payload[len]    |
//! +--------+--------+-----------------+
//! ```
//!
//! INVARIANTS:
//!   - `len` never exceeds the negotiated maximum payload
//!   - decoders reject oversized, truncated or padded frames instead of truncating

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::convert::TryInto;
use core::fmt;

use thiserror::Error;

/// Size in bytes of the fixed envelope header.
pub const HEADER_LEN: usize = 8;

/// Conservative default payload bound.
pub const DEFAULT_MAX_PAYLOAD: usize = 100;

/// Discriminator reserved for error-typed replies produced on the server side.
pub const FAULT_TYPE: u32 = u32::MAX;

/// Result alias for codec operations.
pub type Result<T> = core::result::Result<T, EnvelopeError>;

/// Reasons a frame or envelope is rejected as malformed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Fewer bytes than the fixed header.
    #[error("truncated envelope: {actual} bytes, header needs 8")]
    Truncated {
        /// Number of bytes available.
        actual: usize,
    },
    /// Declared payload length disagrees with the bytes present.
    #[error("envelope length mismatch: header declares {declared} bytes, frame carries {actual}")]
    LengthMismatch {
        /// Payload length announced by the header.
        declared: usize,
        /// Payload bytes actually present after the header.
        actual: usize,
    },
    /// Payload exceeds the configured bound.
    #[error("envelope payload of {len} bytes exceeds limit of {max}")]
    Oversized {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Fixed header preceding every payload on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Message type discriminator.
    pub ty: u32,
    /// Payload length in bytes.
    pub len: u32,
}

impl EnvelopeHeader {
    /// Creates a header with all fields initialised.
    pub const fn new(ty: u32, len: u32) -> Self {
        Self { ty, len }
    }

    /// Serialises the header to its little-endian wire form.
    pub fn to_le_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.ty.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.len.to_le_bytes());
        bytes
    }

    /// Deserialises the little-endian wire form into a header.
    pub fn from_le_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        let ty = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self { ty, len }
    }
}

/// Typed message with a bounded payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Envelope {
    ty: u32,
    payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope. Bounds are enforced by [`Envelope::check`] and [`decode`].
    pub fn new(ty: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self { ty, payload: payload.into() }
    }

    /// Builds an error-typed envelope whose payload is `reason`, cut at a UTF-8 boundary so it
    /// fits within `max_payload`.
    pub fn fault(reason: &str, max_payload: usize) -> Self {
        let mut end = reason.len().min(max_payload);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        Self::new(FAULT_TYPE, &reason.as_bytes()[..end])
    }

    /// Type discriminator.
    pub fn ty(&self) -> u32 {
        self.ty
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the envelope and returns the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns `true` for replies built with [`Envelope::fault`].
    pub fn is_fault(&self) -> bool {
        self.ty == FAULT_TYPE
    }

    /// Size of the encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Validates the payload against `max_payload`.
    pub fn check(&self, max_payload: usize) -> Result<()> {
        let max = max_payload.min(u32::MAX as usize);
        if self.payload.len() > max {
            return Err(EnvelopeError::Oversized { len: self.payload.len(), max });
        }
        Ok(())
    }

    fn header(&self) -> EnvelopeHeader {
        // Payloads beyond u32::MAX cannot pass `check`; saturate so decode rejects the frame.
        let len: u32 = self.payload.len().try_into().unwrap_or(u32::MAX);
        EnvelopeHeader::new(self.ty, len)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("ty", &self.ty)
            .field("len", &self.payload.len())
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}

/// Encodes `envelope` into its wire frame.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let mut frame = Vec::with_capacity(envelope.encoded_len());
    frame.extend_from_slice(&envelope.header().to_le_bytes());
    frame.extend_from_slice(&envelope.payload);
    frame
}

/// Decodes a wire frame, rejecting anything that is not exactly one envelope within
/// `max_payload`.
pub fn decode(frame: &[u8], max_payload: usize) -> Result<Envelope> {
    let (raw, payload) = split_header(frame)?;
    let header = EnvelopeHeader::from_le_bytes(raw);
    let declared = header.len as usize;
    if declared > max_payload {
        return Err(EnvelopeError::Oversized { len: declared, max: max_payload });
    }
    if declared != payload.len() {
        return Err(EnvelopeError::LengthMismatch { declared, actual: payload.len() });
    }
    Ok(Envelope::new(header.ty, payload))
}

fn split_header(frame: &[u8]) -> Result<([u8; HEADER_LEN], &[u8])> {
    if frame.len() < HEADER_LEN {
        return Err(EnvelopeError::Truncated { actual: frame.len() });
    }
    let (head, rest) = frame.split_at(HEADER_LEN);
    let raw: [u8; HEADER_LEN] =
        head.try_into().map_err(|_| EnvelopeError::Truncated { actual: frame.len() })?;
    Ok((raw, rest))
}
