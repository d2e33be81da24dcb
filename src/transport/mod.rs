//! Transport module - the packet filter device and its control surface.
//!
//! Provides:
//! - Bit-exact BPF control call encoding
//! - The `PacketDevice` abstraction and the `/dev/bpf*` implementation
//! - The ordered setup sequence applied to every new device

mod configure;
mod device;
pub mod ioctl;

pub use configure::{compose_filter, DeviceConfigurator, FALLBACK_FILTER};
pub use device::{BpfDevice, DevBpfAllocator, PacketDevice, MAX_BPF_UNITS};
pub use ioctl::{Control, ControlReply};
