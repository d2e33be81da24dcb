//! Capture header layout.
//!
//! Every capture returned by a read on the BPF device starts with a
//! `struct bpf_hdr` in host byte order:
//! ```text
//! ┌──────────────────────────┬──────────┬──────────┬──────────┬─────────┐
//! │ Timestamp                │ Caplen   │ Datalen  │ Hdrlen   │ padding │
//! │ 8 or 16 bytes            │ uint32   │ uint32   │ uint16   │         │
//! └──────────────────────────┴──────────┴──────────┴──────────┴─────────┘
//! ```
//!
//! The captured bytes start `hdrlen` bytes after the header start, and the
//! next capture starts at `bpf_align(hdrlen + caplen)`.

use crate::platform::TimestampFormat;

/// Bytes after an aligned capture below which no further capture is parsed.
pub const MIN_NEXT_FRAME_SIZE: usize = 20;

/// Default size of the kernel buffer requested with `BIOCSBLEN`.
pub const BPF_BUFFER_LENGTH: u32 = 65_535;

/// Size of `struct bpf_hdr` (C padding included) for a timestamp layout.
pub const fn header_size(format: TimestampFormat) -> usize {
    match format {
        // 8 + 4 + 4 + 2, padded to 4
        TimestampFormat::Micro32 => 20,
        // 16 + 4 + 4 + 2, padded to 8
        TimestampFormat::Nano64 | TimestampFormat::Micro64 => 32,
    }
}

/// Offset of the capture following one with the given lengths.
///
/// Equivalent to the kernel's `BPF_WORDALIGN(hdrlen + caplen)`; `alignment`
/// must be a power of two.
#[inline]
pub fn bpf_align(hdrlen: usize, caplen: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    ((hdrlen + caplen) + (alignment - 1)) & !(alignment - 1)
}

/// Decoded capture header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfHeader {
    /// Seconds part of the capture timestamp.
    pub tv_sec: u64,
    /// Sub-second part, in micro- or nanoseconds depending on the format.
    pub tv_frac: u64,
    /// Number of bytes captured.
    pub caplen: u32,
    /// Original length of the packet on the wire.
    pub datalen: u32,
    /// Offset from the header start to the captured bytes.
    pub hdrlen: u16,
}

impl BpfHeader {
    /// Create a new header.
    pub fn new(tv_sec: u64, tv_frac: u64, caplen: u32, datalen: u32, hdrlen: u16) -> Self {
        Self {
            tv_sec,
            tv_frac,
            caplen,
            datalen,
            hdrlen,
        }
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `None` if the buffer is shorter than [`header_size`].
    pub fn decode(buf: &[u8], format: TimestampFormat) -> Option<Self> {
        if buf.len() < header_size(format) {
            return None;
        }

        let (tv_sec, tv_frac, rest) = match format {
            TimestampFormat::Micro32 => (
                u64::from(read_u32(buf, 0)),
                u64::from(read_u32(buf, 4)),
                8,
            ),
            TimestampFormat::Nano64 | TimestampFormat::Micro64 => {
                (read_u64(buf, 0), read_u64(buf, 8), 16)
            }
        };

        Some(Self {
            tv_sec,
            tv_frac,
            caplen: read_u32(buf, rest),
            datalen: read_u32(buf, rest + 4),
            hdrlen: u16::from_ne_bytes([buf[rest + 8], buf[rest + 9]]),
        })
    }

    /// Encode the header in host byte order, padded to [`header_size`].
    ///
    /// Timestamp fields are truncated to 32 bits for [`TimestampFormat::Micro32`].
    pub fn encode(&self, format: TimestampFormat) -> Vec<u8> {
        let mut buf = Vec::with_capacity(header_size(format));
        match format {
            TimestampFormat::Micro32 => {
                buf.extend_from_slice(&(self.tv_sec as u32).to_ne_bytes());
                buf.extend_from_slice(&(self.tv_frac as u32).to_ne_bytes());
            }
            TimestampFormat::Nano64 | TimestampFormat::Micro64 => {
                buf.extend_from_slice(&self.tv_sec.to_ne_bytes());
                buf.extend_from_slice(&self.tv_frac.to_ne_bytes());
            }
        }
        buf.extend_from_slice(&self.caplen.to_ne_bytes());
        buf.extend_from_slice(&self.datalen.to_ne_bytes());
        buf.extend_from_slice(&self.hdrlen.to_ne_bytes());
        buf.resize(header_size(format), 0);
        buf
    }

    /// Capture time in seconds since the epoch.
    pub fn timestamp(&self, format: TimestampFormat) -> f64 {
        self.tv_sec as f64 + format.fraction_scale() * self.tv_frac as f64
    }

    /// Offset of the next capture relative to this header.
    #[inline]
    pub fn next_offset(&self, alignment: usize) -> usize {
        bpf_align(usize::from(self.hdrlen), self.caplen as usize, alignment)
    }
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(raw)
}
