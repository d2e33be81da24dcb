//! Bare capture socket.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use bytes::BytesMut;

use super::readiness::Selectable;
use crate::backend::Backend;
use crate::config::{BpfConfig, SocketOptions};
use crate::error::{BpfError, Result};
use crate::link::{LinkClass, LinkRegistry};
use crate::protocol::{DecodedFrame, FrameDecoder, FrameQueue};
use crate::transport::{Control, ControlReply, DeviceConfigurator, PacketDevice};

/// A configured device bound to one interface, read side only.
///
/// Frames from one device read are queued and handed out one per
/// [`recv`](Self::recv). The device is released on [`close`](Self::close)
/// or drop, whichever comes first.
pub struct ListenSocket<D: PacketDevice> {
    device: Option<D>,
    unit: u32,
    iface: String,
    options: SocketOptions,
    promisc: bool,
    decoder: FrameDecoder,
    queue: FrameQueue,
    buffer_length: u32,
    fd_flags: Option<libc::c_int>,
}

impl<D: PacketDevice> ListenSocket<D> {
    /// Allocate a device, configure it for `options` and guess its link class.
    ///
    /// On any failure the allocated device is released before the error is
    /// returned.
    pub fn open(backend: &Backend<D>, config: &BpfConfig, options: SocketOptions) -> Result<Self> {
        let (mut device, unit) = backend.allocator.allocate().map_err(BpfError::Allocation)?;
        let iface = options.resolve_iface(config);
        let promisc = options.resolve_promisc(config);

        let buffer_length = DeviceConfigurator::new(&backend.platform, config.buffer_length)
            .filter_compiler(backend.filter.as_deref())
            .except_filter(config.except_filter.as_deref())
            .configure(&mut device, &iface, &options, promisc)?;

        let link = guess_link(&mut device, backend.links.as_ref(), config.default_link_type);
        tracing::debug!(device = device.name(), iface = %iface, ?link, "Socket open");

        Ok(Self {
            device: Some(device),
            unit,
            iface,
            options,
            promisc,
            decoder: FrameDecoder::for_platform(&backend.platform, link),
            queue: FrameQueue::new(),
            buffer_length,
            fd_flags: None,
        })
    }

    /// Next frame, from the queue or from one device read.
    ///
    /// Returns `None` when nothing is available, when the read would block,
    /// when the read fails (logged), and once closed.
    pub fn recv(&mut self, max_len: usize) -> Option<DecodedFrame> {
        if let Some(frame) = self.queue.pop() {
            return Some(frame);
        }

        let device = self.device.as_mut()?;
        let mut buf = BytesMut::zeroed(max_len.min(self.buffer_length as usize));
        match device.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                self.queue.extend(self.decoder.decode(&buf.freeze()));
                self.queue.pop()
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::warn!(iface = %self.iface, error = %e, "BPF read failed");
                None
            }
        }
    }

    /// Receive without blocking.
    ///
    /// A queued frame is returned directly; otherwise the descriptor is made
    /// non-blocking for a single read.
    pub fn nonblock_recv(&mut self) -> Option<DecodedFrame> {
        if let Some(frame) = self.queue.pop() {
            return Some(frame);
        }
        self.set_nonblocking(true);
        let frame = self.recv(self.buffer_length as usize);
        self.set_nonblocking(false);
        frame
    }

    /// Number of decoded frames not yet consumed.
    #[inline]
    pub fn buffered_frames(&self) -> usize {
        self.queue.len()
    }

    /// Take the oldest queued frame without touching the device.
    pub fn get_frame(&mut self) -> Option<DecodedFrame> {
        self.queue.pop()
    }

    /// Toggle `O_NONBLOCK` on the descriptor.
    ///
    /// The descriptor flags are read once, on first use. Failures are
    /// logged and leave the mode unchanged.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        let Some(fd) = self.raw_fd() else {
            return;
        };

        let flags = match self.fd_flags {
            Some(flags) => flags,
            // SAFETY: F_GETFL takes no argument and `fd` is open.
            None => match unsafe { libc::fcntl(fd, libc::F_GETFL) } {
                ..=-1 => {
                    tracing::warn!(
                        iface = %self.iface,
                        error = %io::Error::last_os_error(),
                        "Cannot get flags on this file descriptor"
                    );
                    return;
                }
                flags => {
                    self.fd_flags = Some(flags);
                    flags
                }
            },
        };

        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        // SAFETY: F_SETFL takes an int argument and `fd` is open.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } == -1 {
            tracing::warn!(
                iface = %self.iface,
                error = %io::Error::last_os_error(),
                "Cannot set file descriptor flags"
            );
        }
    }

    /// Buffer length the kernel accepted at open.
    #[inline]
    pub fn buffer_length(&self) -> u32 {
        self.buffer_length
    }

    /// Packets received and dropped by the kernel filter, `None` if unknown.
    pub fn get_stats(&mut self) -> (Option<u32>, Option<u32>) {
        match self.query(Control::GetStats) {
            Some(ControlReply::Stats { received, dropped }) => (Some(received), Some(dropped)),
            _ => {
                tracing::warn!(iface = %self.iface, "Unable to get stats from BPF");
                (None, None)
            }
        }
    }

    /// Kernel buffer length, `None` if unknown.
    pub fn get_buffer_length(&mut self) -> Option<u32> {
        match self.query(Control::GetBufferLength) {
            Some(ControlReply::Value(length)) => Some(length),
            _ => {
                tracing::warn!(iface = %self.iface, "Unable to get the BPF buffer length");
                None
            }
        }
    }

    fn query(&mut self, control: Control) -> Option<ControlReply> {
        self.device.as_mut()?.control(&control).ok()
    }

    /// Descriptor number, `-1` once closed.
    pub fn fileno(&self) -> RawFd {
        self.raw_fd().unwrap_or(-1)
    }

    /// Release the device. Further calls do nothing.
    pub fn close(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::debug!(device = device.name(), iface = %self.iface, "Socket closed");
        }
    }

    /// Whether [`close`](Self::close) has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }

    /// Bound interface.
    #[inline]
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Link class guessed at open.
    #[inline]
    pub fn link(&self) -> LinkClass {
        self.decoder.link()
    }

    /// Unit number of the device, as returned by the allocator.
    #[inline]
    pub fn device_index(&self) -> u32 {
        self.unit
    }

    /// Options the socket was opened with.
    #[inline]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Promiscuous flag after defaults were applied.
    #[inline]
    pub fn promisc(&self) -> bool {
        self.promisc
    }

    pub(crate) fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }
}

impl<D: PacketDevice> Selectable for ListenSocket<D> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.device.as_ref().map(|device| device.as_raw_fd())
    }

    fn buffered_frames(&self) -> usize {
        self.queue.len()
    }
}

impl<D: PacketDevice> std::fmt::Debug for ListenSocket<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenSocket")
            .field("iface", &self.iface)
            .field("unit", &self.unit)
            .field("link", &self.decoder.link())
            .field("buffered", &self.queue.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Ask the device for its data link type and map it to a class.
fn guess_link<D: PacketDevice>(
    device: &mut D,
    links: &dyn LinkRegistry,
    default_dlt: u32,
) -> LinkClass {
    let fallback = links.lookup(default_dlt).unwrap_or(LinkClass::Ethernet);
    match device.control(&Control::GetDataLinkType) {
        Ok(ControlReply::Value(dlt)) => links.lookup(dlt).unwrap_or_else(|| {
            tracing::warn!(dlt, ?fallback, "Unable to guess link type, using default");
            fallback
        }),
        Ok(_) => fallback,
        Err(e) => {
            tracing::warn!(error = %e, ?fallback, "BIOCGDLT failed, using default link type");
            fallback
        }
    }
}
