//! Capture and inject socket.

use std::ops::{Deref, DerefMut};
use std::os::fd::RawFd;

use super::listen::ListenSocket;
use super::readiness::Selectable;
use crate::backend::Backend;
use crate::config::{BpfConfig, SocketOptions};
use crate::error::{BpfError, Result};
use crate::transport::PacketDevice;

/// A [`ListenSocket`] that can also write complete link-layer frames.
///
/// Every read-side operation is reached through `Deref`.
pub struct Layer2Socket<D: PacketDevice> {
    listen: ListenSocket<D>,
}

impl<D: PacketDevice> Layer2Socket<D> {
    /// Open and configure a device. See [`ListenSocket::open`].
    pub fn open(backend: &Backend<D>, config: &BpfConfig, options: SocketOptions) -> Result<Self> {
        Ok(Self {
            listen: ListenSocket::open(backend, config, options)?,
        })
    }

    /// Write one frame, link header included. Returns bytes written.
    pub fn send(&mut self, frame: &[u8]) -> Result<usize> {
        let device = self.listen.device_mut().ok_or(BpfError::Closed)?;
        match device.write(frame) {
            Ok(written) => Ok(written),
            Err(source) => Err(BpfError::Send {
                iface: self.listen.iface().to_string(),
                source,
            }),
        }
    }

    /// Unwrap into the capture-only socket.
    pub fn into_inner(self) -> ListenSocket<D> {
        self.listen
    }
}

impl<D: PacketDevice> Deref for Layer2Socket<D> {
    type Target = ListenSocket<D>;

    fn deref(&self) -> &ListenSocket<D> {
        &self.listen
    }
}

impl<D: PacketDevice> DerefMut for Layer2Socket<D> {
    fn deref_mut(&mut self) -> &mut ListenSocket<D> {
        &mut self.listen
    }
}

impl<D: PacketDevice> Selectable for Layer2Socket<D> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.listen.raw_fd()
    }

    fn buffered_frames(&self) -> usize {
        self.listen.buffered_frames()
    }
}

impl<D: PacketDevice> std::fmt::Debug for Layer2Socket<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Layer2Socket").field(&self.listen).finish()
    }
}
