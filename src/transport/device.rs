//! Packet filter device handles.
//!
//! [`PacketDevice`] is the surface the socket layer needs from a device:
//! raw reads and writes, control calls, and a descriptor for `fcntl(2)` and
//! `poll(2)`. [`BpfDevice`] implements it over a `/dev/bpf*` node.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use super::ioctl::{Control, ControlReply};
use crate::backend::DeviceAllocator;

/// Number of `/dev/bpfN` units probed by [`DevBpfAllocator`].
pub const MAX_BPF_UNITS: u32 = 256;

/// Kernel-side packet filter connection.
pub trait PacketDevice: AsRawFd {
    /// Device node name, used in errors and logs.
    fn name(&self) -> &str;

    /// One raw read. A BPF read returns whole batches of captures.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One raw write of a complete link-layer frame.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Issue a control call.
    fn control(&mut self, control: &Control) -> io::Result<ControlReply>;
}

/// An open `/dev/bpf*` node. The descriptor is closed on drop.
#[derive(Debug)]
pub struct BpfDevice {
    fd: OwnedFd,
    path: String,
}

impl BpfDevice {
    /// Open the node at `path` for reading and writing.
    pub fn open(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            fd: OwnedFd::from(file),
            path: path.to_string(),
        })
    }
}

impl AsRawFd for BpfDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl PacketDevice for BpfDevice {
    fn name(&self) -> &str {
        &self.path
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        match unsafe { libc::read(self.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) } {
            ..=-1 => Err(io::Error::last_os_error()),
            len => Ok(len as usize),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        match unsafe { libc::write(self.as_raw_fd(), buf.as_ptr().cast(), buf.len()) } {
            ..=-1 => Err(io::Error::last_os_error()),
            len => Ok(len as usize),
        }
    }

    fn control(&mut self, control: &Control) -> io::Result<ControlReply> {
        let mut arg = control.argument();
        // SAFETY: `arg` is sized for the parameter length encoded in the
        // request code and outlives the call.
        match unsafe { libc::ioctl(self.as_raw_fd(), control.code() as _, arg.as_mut_ptr()) } {
            ..=-1 => Err(io::Error::last_os_error()),
            _ => Ok(ControlReply::from_argument(control, &arg)),
        }
    }
}

/// Allocates the first free `/dev/bpfN` node.
#[derive(Debug, Clone)]
pub struct DevBpfAllocator {
    prefix: String,
    units: u32,
}

impl DevBpfAllocator {
    /// Probe `{prefix}0` .. `{prefix}{units - 1}`.
    pub fn new(prefix: &str, units: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            units,
        }
    }
}

impl Default for DevBpfAllocator {
    fn default() -> Self {
        Self::new("/dev/bpf", MAX_BPF_UNITS)
    }
}

impl DeviceAllocator for DevBpfAllocator {
    type Device = BpfDevice;

    fn allocate(&self) -> io::Result<(BpfDevice, u32)> {
        let mut last_error = None;
        for unit in 0..self.units {
            let path = format!("{}{}", self.prefix, unit);
            match BpfDevice::open(&path) {
                Ok(device) => {
                    tracing::debug!(device = %path, "Allocated BPF device");
                    return Ok((device, unit));
                }
                // Busy units belong to other captures; keep looking.
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => last_error = Some(e),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    last_error.get_or_insert(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no /dev/bpf units to probe")
        }))
    }
}
