//! # bpfsock
//!
//! Raw link-layer capture and injection over the BSD packet filter device.
//!
//! This crate opens `/dev/bpf*` nodes, configures them for one interface,
//! splits each kernel read into individual captures and writes frames back
//! out, with the per-family quirks of Darwin, FreeBSD, NetBSD and OpenBSD.
//!
//! ## Architecture
//!
//! - **Transport**: control calls and the device handle
//! - **Protocol**: capture header decoding and per-socket frame queues
//! - **Sockets**: capture, capture+inject and routing-aware layer-3 tiers,
//!   plus a readiness multiplexer aware of queued frames
//!
//! ## Example
//!
//! ```ignore
//! use bpfsock::{Backend, BpfConfig, Layer2Socket, SocketOptions};
//!
//! fn main() -> bpfsock::Result<()> {
//!     let backend = Backend::system();
//!     let config = BpfConfig::default();
//!     let mut socket = Layer2Socket::open(&backend, &config, SocketOptions::new().iface("en0"))?;
//!
//!     while let Some(frame) = socket.recv(65_535) {
//!         println!("{} bytes at {}", frame.len(), frame.timestamp);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod link;
pub mod packet;
pub mod platform;
pub mod protocol;
pub mod socket;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{Backend, DeviceAllocator, FilterCompiler, Router, StaticRoutes};
pub use config::{BpfConfig, SocketOptions};
pub use error::{BpfError, Result};
pub use packet::Packet;
pub use socket::{select, Layer2Socket, Layer3Socket, ListenSocket, Selectable};
