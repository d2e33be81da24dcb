//! Socket tiers.
//!
//! - [`ListenSocket`]: capture only
//! - [`Layer2Socket`]: capture and inject complete frames
//! - [`Layer3Socket`]: network-layer packets with per-interface egress
//!
//! Each tier wraps the one before it. [`select()`] waits on any mix of them.

mod layer2;
mod layer3;
mod listen;
mod readiness;

pub use layer2::Layer2Socket;
pub use layer3::{frame_for, framing, Framing, Layer3Socket};
pub use listen::ListenSocket;
pub use readiness::{select, Selectable, DEFAULT_SELECT_TIMEOUT};
