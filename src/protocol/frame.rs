//! Decoded capture with typed accessors.
//!
//! Uses `bytes::Bytes` so every capture of a batch shares the buffer of the
//! read it came from.

use bytes::Bytes;

use crate::link::LinkClass;

/// One captured link-layer frame. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Link-layer class guessed for the device.
    pub link: LinkClass,
    /// Captured bytes, link header included.
    pub payload: Bytes,
    /// Capture time in seconds since the epoch.
    pub timestamp: f64,
}

impl DecodedFrame {
    /// Create a new frame.
    pub fn new(link: LinkClass, payload: Bytes, timestamp: f64) -> Self {
        Self {
            link,
            payload,
            timestamp,
        }
    }

    /// Get a reference to the captured bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of captured bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether nothing was captured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Network-layer bytes with the link header removed.
    pub fn network_payload(&self) -> Option<Bytes> {
        self.link.decapsulate(&self.payload)
    }
}
