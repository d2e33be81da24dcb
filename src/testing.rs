//! In-memory device doubles for unit tests.
//!
//! A [`MockDevice`] reads from one end of a Unix datagram pair, so
//! `fcntl(2)` and `poll(2)` operate on a real descriptor. Batches are
//! injected from the [`MockPeer`] end; one datagram is one device read.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{DeviceAllocator, FilterCompiler};
use crate::error::{BpfError, Result};
use crate::platform::Platform;
use crate::protocol::{bpf_align, header_size, BpfHeader};
use crate::transport::{Control, ControlReply, PacketDevice};

/// Observable state of a mock device.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockState {
    pub controls: Vec<Control>,
    pub reads: usize,
    pub written: Vec<Vec<u8>>,
    pub drops: usize,
    pub fail_on: Option<&'static str>,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub max_buffer_length: Option<u32>,
    pub dlt: Option<u32>,
    pub stats: Option<(u32, u32)>,
    pub buffer_length: Option<u32>,
}

pub(crate) type SharedState = Arc<Mutex<MockState>>;

pub(crate) struct MockDevice {
    name: String,
    sock: UnixDatagram,
    state: SharedState,
}

impl MockDevice {
    pub fn pair(name: &str, state: MockState) -> (MockDevice, MockPeer) {
        let (sock, peer) = UnixDatagram::pair().unwrap();
        let device = MockDevice {
            name: name.to_string(),
            sock,
            state: Arc::new(Mutex::new(state)),
        };
        (device, MockPeer { sock: peer })
    }

    pub fn shared(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl AsRawFd for MockDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.drops += 1;
        }
    }
}

impl PacketDevice for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.reads += 1;
        if state.fail_reads {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        drop(state);
        self.sock.recv(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::Error::from_raw_os_error(libc::ENETDOWN));
        }
        state.written.push(buf.to_vec());
        Ok(buf.len())
    }

    fn control(&mut self, control: &Control) -> io::Result<ControlReply> {
        let mut state = self.state();
        state.controls.push(control.clone());
        if state.fail_on == Some(control.name()) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let unsupported = || io::Error::from_raw_os_error(libc::EINVAL);
        match control {
            Control::GetDataLinkType => state.dlt.map(ControlReply::Value).ok_or_else(unsupported),
            Control::SetBufferLength(requested) => Ok(ControlReply::Value(
                state.max_buffer_length.map_or(*requested, |max| (*requested).min(max)),
            )),
            Control::SetDataLinkType(dlt) => {
                state.dlt = Some(*dlt);
                Ok(ControlReply::Done)
            }
            Control::GetStats => state
                .stats
                .map(|(received, dropped)| ControlReply::Stats { received, dropped })
                .ok_or_else(unsupported),
            Control::GetBufferLength => state
                .buffer_length
                .map(ControlReply::Value)
                .ok_or_else(unsupported),
            _ => Ok(ControlReply::Done),
        }
    }
}

pub(crate) struct MockPeer {
    sock: UnixDatagram,
}

impl MockPeer {
    pub fn inject(&self, batch: &[u8]) {
        self.sock.send(batch).unwrap();
    }
}

/// One device handed out by a [`MockAllocator`].
pub(crate) struct Opened {
    pub state: SharedState,
    pub peer: MockPeer,
}

/// Allocator creating a fresh [`MockDevice`] per call from a template.
#[derive(Clone, Default)]
pub(crate) struct MockAllocator {
    template: MockState,
    fail: bool,
    opened: Arc<Mutex<Vec<Opened>>>,
}

impl MockAllocator {
    pub fn new(template: MockState) -> Self {
        Self {
            template,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> MutexGuard<'_, Vec<Opened>> {
        self.opened.lock().unwrap()
    }
}

impl DeviceAllocator for MockAllocator {
    type Device = MockDevice;

    fn allocate(&self) -> io::Result<(MockDevice, u32)> {
        if self.fail {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let mut opened = self.opened();
        let unit = opened.len() as u32;
        let (device, peer) = MockDevice::pair(&format!("mock{unit}"), self.template.clone());
        opened.push(Opened {
            state: device.shared(),
            peer,
        });
        Ok((device, unit))
    }
}

/// Filter compiler recording every attachment.
#[derive(Clone, Default)]
pub(crate) struct MockFilter {
    reject: Option<String>,
    attached: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockFilter {
    pub fn rejecting(expression: &str) -> Self {
        Self {
            reject: Some(expression.to_string()),
            ..Self::default()
        }
    }

    pub fn attached(&self) -> Vec<(String, String)> {
        self.attached.lock().unwrap().clone()
    }
}

impl FilterCompiler<MockDevice> for MockFilter {
    fn attach(&self, _device: &mut MockDevice, expression: &str, iface: &str) -> Result<()> {
        if self.reject.as_deref() == Some(expression) {
            return Err(BpfError::Filter {
                expression: expression.to_string(),
                reason: "syntax error".to_string(),
            });
        }
        self.attached
            .lock()
            .unwrap()
            .push((expression.to_string(), iface.to_string()));
        Ok(())
    }
}

/// Lay out `captures` as one read buffer for `platform`.
pub(crate) fn batch(platform: &Platform, captures: &[&[u8]]) -> Vec<u8> {
    let format = platform.timestamp_format();
    let hdrlen = header_size(format);
    let mut buf = Vec::new();
    for (i, capture) in captures.iter().enumerate() {
        let header = BpfHeader::new(
            1_700_000_000 + i as u64,
            250_000,
            capture.len() as u32,
            capture.len() as u32,
            hdrlen as u16,
        );
        buf.extend_from_slice(&header.encode(format));
        buf.extend_from_slice(capture);
        let padded = bpf_align(hdrlen, capture.len(), platform.alignment());
        buf.resize(buf.len() + padded - hdrlen - capture.len(), 0);
    }
    buf
}
