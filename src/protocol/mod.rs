//! Protocol module - capture header layout, batch decoding, frame types.
//!
//! This module implements the read side of the device:
//! - `bpf_hdr` decoding and the alignment rule between captures
//! - Iterative decoding of one read into a batch of frames
//! - The per-socket FIFO that holds frames until consumed

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::DecodedFrame;
pub use frame_buffer::{FrameDecoder, FrameQueue};
pub use wire_format::{
    bpf_align, header_size, BpfHeader, BPF_BUFFER_LENGTH, MIN_NEXT_FRAME_SIZE,
};
