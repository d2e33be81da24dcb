//! Network-layer packets handled by the layer-3 socket.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::link::ip_version;

/// An IP packet with its capture or send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Raw network-layer bytes.
    pub data: Bytes,
    /// Capture time, for received packets.
    pub time: Option<f64>,
    /// Time the packet was handed to the device, set by a send.
    pub sent_time: Option<f64>,
}

impl Packet {
    /// Wrap network-layer bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            time: None,
            sent_time: None,
        }
    }

    /// Attach a capture time.
    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    /// IP version nibble.
    #[inline]
    pub fn version(&self) -> Option<u8> {
        ip_version(&self.data)
    }

    /// Destination address, if the header is long enough to hold one.
    pub fn destination(&self) -> Option<IpAddr> {
        match self.version()? {
            4 => {
                let raw: [u8; 4] = self.data.get(16..20)?.try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(raw)))
            }
            6 => {
                let raw: [u8; 16] = self.data.get(24..40)?.try_into().ok()?;
                Some(IpAddr::V6(Ipv6Addr::from(raw)))
            }
            _ => None,
        }
    }
}

/// Wall-clock time in seconds since the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
