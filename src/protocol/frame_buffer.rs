//! Splitting one device read into captures, and holding them until consumed.
//!
//! A single `read(2)` on a BPF descriptor returns every capture the kernel
//! buffered since the last read. [`FrameDecoder`] walks that buffer with a
//! cursor and [`FrameQueue`] keeps the captures in arrival order so that
//! successive receive calls drain them one at a time.
//!
//! # Example
//!
//! ```
//! use bpfsock::link::LinkClass;
//! use bpfsock::platform::TimestampFormat;
//! use bpfsock::protocol::{BpfHeader, FrameDecoder, FrameQueue};
//! use bytes::Bytes;
//!
//! let decoder = FrameDecoder::new(TimestampFormat::Micro32, 4, LinkClass::Raw);
//! let mut buf = BpfHeader::new(1, 0, 4, 4, 20).encode(TimestampFormat::Micro32);
//! buf.extend_from_slice(b"ping");
//!
//! let mut queue = FrameQueue::new();
//! queue.extend(decoder.decode(&Bytes::from(buf)));
//! assert_eq!(queue.pop().unwrap().payload(), b"ping");
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

use super::frame::DecodedFrame;
use super::wire_format::{header_size, BpfHeader, MIN_NEXT_FRAME_SIZE};
use crate::link::LinkClass;
use crate::platform::{Platform, TimestampFormat};

/// Stateless decoder for the captures of one read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDecoder {
    format: TimestampFormat,
    alignment: usize,
    link: LinkClass,
}

impl FrameDecoder {
    /// Create a decoder for an explicit header layout.
    pub fn new(format: TimestampFormat, alignment: usize, link: LinkClass) -> Self {
        Self {
            format,
            alignment,
            link,
        }
    }

    /// Create a decoder using the layout of `platform`.
    pub fn for_platform(platform: &Platform, link: LinkClass) -> Self {
        Self::new(platform.timestamp_format(), platform.alignment(), link)
    }

    /// Link class tagged onto every decoded frame.
    #[inline]
    pub fn link(&self) -> LinkClass {
        self.link
    }

    /// Decode every capture in `buf`, in buffer order.
    ///
    /// Decoding stops when fewer than a header's worth of bytes remain, when
    /// a header declares an empty capture, when a capture runs past the end
    /// of the buffer, or when fewer than [`MIN_NEXT_FRAME_SIZE`] bytes follow
    /// the aligned end of the last capture.
    pub fn decode(&self, buf: &Bytes) -> Vec<DecodedFrame> {
        let hdr_size = header_size(self.format);
        let mut frames = Vec::new();
        let mut cursor = 0usize;

        loop {
            let remaining = &buf[cursor..];
            if remaining.len() < hdr_size {
                break;
            }

            let Some(header) = BpfHeader::decode(remaining, self.format) else {
                break;
            };

            // Kernel residue; parsing on would spin on the same offset.
            if header.caplen == 0 {
                tracing::debug!(offset = cursor, "Empty capture, stopping decode");
                break;
            }

            let start = cursor + usize::from(header.hdrlen);
            let end = start + header.caplen as usize;
            if end > buf.len() {
                tracing::debug!(
                    offset = cursor,
                    caplen = header.caplen,
                    available = buf.len(),
                    "Capture exceeds read buffer, stopping decode"
                );
                break;
            }

            frames.push(DecodedFrame::new(
                self.link,
                buf.slice(start..end),
                header.timestamp(self.format),
            ));

            let next = cursor + header.next_offset(self.alignment);
            if next >= buf.len() || buf.len() - next < MIN_NEXT_FRAME_SIZE {
                break;
            }
            cursor = next;
        }

        tracing::trace!(frames = frames.len(), bytes = buf.len(), "Decoded batch");
        frames
    }
}

/// FIFO of decoded frames not yet handed to the caller.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<DecodedFrame>,
}

impl FrameQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame.
    pub fn push(&mut self, frame: DecodedFrame) {
        self.frames.push_back(frame);
    }

    /// Take the oldest frame.
    pub fn pop(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_front()
    }

    /// Look at the oldest frame without removing it.
    pub fn peek(&self) -> Option<&DecodedFrame> {
        self.frames.front()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every buffered frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Extend<DecodedFrame> for FrameQueue {
    fn extend<I: IntoIterator<Item = DecodedFrame>>(&mut self, iter: I) {
        self.frames.extend(iter);
    }
}
