//! Routing-aware network-layer socket.
//!
//! Receives strip the link header from captures of the primary device.
//! Sends look up the egress interface for each packet and write through a
//! device bound to that interface, opening one on first use.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use super::layer2::Layer2Socket;
use super::readiness;
use crate::backend::Backend;
use crate::config::{BpfConfig, SocketOptions};
use crate::error::{BpfError, Result};
use crate::link::LinkClass;
use crate::packet::{now_secs, Packet};
use crate::platform::Platform;
use crate::transport::PacketDevice;

/// How an outgoing packet is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Write the network-layer bytes as they are.
    Bare,
    /// Do not write at all.
    Refuse,
    /// Prepend the link class's empty header.
    Encapsulate,
}

/// Pick the framing for a packet leaving through `iface`.
///
/// Darwin `tun*` interfaces with a `DLT_NULL` link type take bare packets.
/// FreeBSD does not allow BPF writes to `tun*` and `tap*` interfaces.
pub fn framing(platform: &Platform, iface: &str, link: LinkClass) -> Framing {
    if platform.has_loopback_quirk() && iface.starts_with("tun") && link == LinkClass::Null {
        Framing::Bare
    } else if platform.restricts_tunnel_writes()
        && (iface.starts_with("tun") || iface.starts_with("tap"))
    {
        Framing::Refuse
    } else {
        Framing::Encapsulate
    }
}

/// Payload bytes written for `packet` on a `link` device, or `None` when
/// the write would be refused.
pub fn frame_for(
    platform: &Platform,
    iface: &str,
    link: LinkClass,
    packet: &[u8],
) -> Option<Bytes> {
    match framing(platform, iface, link) {
        Framing::Bare => Some(Bytes::copy_from_slice(packet)),
        Framing::Refuse => None,
        Framing::Encapsulate => Some(link.encapsulate(packet, platform)),
    }
}

/// Network-layer socket over one capture device and any number of egress
/// devices.
pub struct Layer3Socket<D: PacketDevice> {
    primary: Layer2Socket<D>,
    egress: HashMap<String, Layer2Socket<D>>,
    backend: Backend<D>,
    config: BpfConfig,
}

impl<D: PacketDevice> Layer3Socket<D> {
    /// Open the primary device. Egress devices are opened by [`send`](Self::send).
    pub fn open(backend: Backend<D>, config: BpfConfig, options: SocketOptions) -> Result<Self> {
        let primary = Layer2Socket::open(&backend, &config, options)?;
        Ok(Self {
            primary,
            egress: HashMap::new(),
            backend,
            config,
        })
    }

    /// Next network-layer packet captured on the primary device.
    ///
    /// The capture time is copied onto the packet. Captures too short to
    /// hold their link header are skipped.
    pub fn recv(&mut self) -> Option<Packet> {
        decapsulate(&mut self.primary)
    }

    /// Next network-layer packet captured on the device bound to `iface`.
    ///
    /// Reads a member reported ready by [`select`](Self::select). Returns
    /// `None` when no device is open for `iface`.
    pub fn recv_from(&mut self, iface: &str) -> Option<Packet> {
        decapsulate(self.member_mut(iface)?)
    }

    /// Send `packet` through the interface its destination routes to.
    ///
    /// Unroutable packets leave through the configured default interface.
    /// Sets [`Packet::sent_time`] just before writing. A refused write is
    /// logged and reported as zero bytes written.
    pub fn send(&mut self, packet: &mut Packet) -> Result<usize> {
        if self.primary.is_closed() {
            return Err(BpfError::Closed);
        }

        let iface = packet
            .destination()
            .and_then(|destination| self.backend.router.route(destination))
            .unwrap_or_else(|| self.config.iface.clone());
        let platform = self.backend.platform;
        let socket = self.egress_socket(&iface)?;

        let Some(frame) = frame_for(&platform, &iface, socket.link(), &packet.data) else {
            tracing::warn!(iface = %iface, "Cannot write to this interface according to the documentation");
            return Ok(0);
        };

        packet.sent_time = Some(now_secs());
        socket.send(&frame)
    }

    fn egress_socket(&mut self, iface: &str) -> Result<&mut Layer2Socket<D>> {
        if iface == self.primary.iface() {
            return Ok(&mut self.primary);
        }
        match self.egress.entry(iface.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let options = SocketOptions {
                    iface: Some(iface.to_string()),
                    eth_type: self.primary.options().eth_type,
                    promisc: Some(self.primary.promisc()),
                    filter: self.primary.options().filter.clone(),
                    ..SocketOptions::default()
                };
                let socket = Layer2Socket::open(&self.backend, &self.config, options)?;
                tracing::debug!(iface, "Opened egress device");
                Ok(entry.insert(socket))
            }
        }
    }

    /// Every physical socket: the primary first, then the egress devices.
    pub fn members(&self) -> Vec<&Layer2Socket<D>> {
        std::iter::once(&self.primary)
            .chain(self.egress.values())
            .collect()
    }

    /// Every physical socket, mutably, in the order of [`members`](Self::members).
    pub fn members_mut(&mut self) -> Vec<&mut Layer2Socket<D>> {
        std::iter::once(&mut self.primary)
            .chain(self.egress.values_mut())
            .collect()
    }

    /// The socket bound to `iface`, primary included.
    pub fn member_mut(&mut self, iface: &str) -> Option<&mut Layer2Socket<D>> {
        if iface == self.primary.iface() {
            Some(&mut self.primary)
        } else {
            self.egress.get_mut(iface)
        }
    }

    /// Interfaces with an open device, the primary's first.
    pub fn egress_interfaces(&self) -> Vec<&str> {
        std::iter::once(self.primary.iface())
            .chain(self.egress.keys().map(String::as_str))
            .collect()
    }

    /// The capture device.
    pub fn primary(&self) -> &Layer2Socket<D> {
        &self.primary
    }

    /// The capture device, mutably.
    pub fn primary_mut(&mut self) -> &mut Layer2Socket<D> {
        &mut self.primary
    }

    /// Descriptor of the primary device, `-1` once closed.
    pub fn fileno(&self) -> std::os::fd::RawFd {
        self.primary.fileno()
    }

    /// Close every device. Further calls do nothing.
    pub fn close(&mut self) {
        self.primary.close();
        for socket in self.egress.values_mut() {
            socket.close();
        }
    }

    /// Ready physical members of `sockets`.
    ///
    /// A layer-3 socket is ready when any of its members is. Drain a ready
    /// member with [`recv_from`](Self::recv_from) on its interface. Without
    /// a `timeout` the first socket's configured timeout applies.
    pub fn select<'a>(
        sockets: &[&'a Self],
        timeout: Option<Duration>,
    ) -> Result<Vec<&'a Layer2Socket<D>>> {
        let timeout =
            timeout.or_else(|| sockets.first().map(|socket| socket.config.select_timeout()));
        let members: Vec<&'a Layer2Socket<D>> =
            sockets.iter().flat_map(|socket| socket.members()).collect();
        readiness::select(&members, timeout)
    }
}

fn decapsulate<D: PacketDevice>(socket: &mut Layer2Socket<D>) -> Option<Packet> {
    let max_len = socket.buffer_length() as usize;
    let frame = socket.recv(max_len)?;
    match frame.network_payload() {
        Some(data) => Some(Packet::new(data).with_time(frame.timestamp)),
        None => {
            tracing::debug!(len = frame.len(), link = ?frame.link, "Truncated capture dropped");
            None
        }
    }
}

impl<D: PacketDevice> std::fmt::Debug for Layer3Socket<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer3Socket")
            .field("primary", &self.primary)
            .field("egress", &self.egress.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticRoutes;
    use crate::link::{DLT_EN10MB, DLT_NULL};
    use crate::platform::PlatformFamily;
    use crate::testing::{batch, MockAllocator, MockDevice, MockState};
    use crate::transport::Control;

    fn ipv4(dst: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0u8; 28];
        data[0] = 0x45;
        data[3] = 28;
        data[9] = 17;
        data[16..20].copy_from_slice(&dst);
        data
    }

    fn open(
        family: PlatformFamily,
        dlt: u32,
        routes: StaticRoutes,
    ) -> (Layer3Socket<MockDevice>, MockAllocator) {
        let allocator = MockAllocator::new(MockState {
            dlt: Some(dlt),
            ..MockState::default()
        });
        let backend = Backend::new(allocator.clone())
            .with_platform(Platform::new(family).with_os_version(140_000))
            .with_router(routes);
        let socket = Layer3Socket::open(backend, BpfConfig::default(), SocketOptions::new()).unwrap();
        (socket, allocator)
    }

    fn bound_iface(alloc: &MockAllocator, index: usize) -> Option<String> {
        alloc.opened()[index]
            .state
            .lock()
            .unwrap()
            .controls
            .iter()
            .find_map(|control| match control {
                Control::SetInterface(iface) => Some(iface.clone()),
                _ => None,
            })
    }

    fn written(alloc: &MockAllocator, index: usize) -> Vec<Vec<u8>> {
        alloc.opened()[index].state.lock().unwrap().written.clone()
    }

    #[test]
    fn test_framing_policy() {
        let darwin = Platform::new(PlatformFamily::Darwin);
        let freebsd = Platform::new(PlatformFamily::FreeBsd);

        assert_eq!(framing(&darwin, "tun0", LinkClass::Null), Framing::Bare);
        assert_eq!(framing(&darwin, "utun3", LinkClass::Null), Framing::Encapsulate);
        assert_eq!(framing(&darwin, "tun0", LinkClass::Ethernet), Framing::Encapsulate);
        assert_eq!(framing(&freebsd, "tun0", LinkClass::Null), Framing::Refuse);
        assert_eq!(framing(&freebsd, "tap1", LinkClass::Ethernet), Framing::Refuse);
        assert_eq!(framing(&freebsd, "em0", LinkClass::Ethernet), Framing::Encapsulate);
    }

    #[test]
    fn test_frame_for() {
        let darwin = Platform::new(PlatformFamily::Darwin);
        let packet = ipv4([10, 0, 0, 1]);

        assert_eq!(frame_for(&darwin, "tun0", LinkClass::Null, &packet).unwrap(), packet);
        let framed = frame_for(&darwin, "lo0", LinkClass::Null, &packet).unwrap();
        assert_eq!(&framed[..4], &2u32.to_ne_bytes());
        assert_eq!(&framed[4..], &packet[..]);
        let freebsd = Platform::new(PlatformFamily::FreeBsd);
        assert!(frame_for(&freebsd, "tun0", LinkClass::Null, &packet).is_none());
    }

    #[test]
    fn test_unrouted_send_uses_primary() {
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, StaticRoutes::new());
        let mut packet = Packet::new(ipv4([192, 0, 2, 1]));

        assert_eq!(socket.send(&mut packet).unwrap(), 14 + 28);
        assert!(packet.sent_time.is_some());
        assert_eq!(alloc.opened().len(), 1);

        let frame = &written(&alloc, 0)[0];
        assert_eq!(&frame[..6], &[0xFF; 6]);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);
        assert_eq!(&frame[14..], &packet.data[..]);
    }

    #[test]
    fn test_two_routes_open_two_egress_devices() {
        let routes = StaticRoutes::new()
            .add("192.0.2.0".parse().unwrap(), 24, "en1")
            .add("198.51.100.0".parse().unwrap(), 24, "en2");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, routes);

        socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))).unwrap();
        socket.send(&mut Packet::new(ipv4([198, 51, 100, 9]))).unwrap();
        socket.send(&mut Packet::new(ipv4([192, 0, 2, 10]))).unwrap();

        assert_eq!(alloc.opened().len(), 3);
        assert_eq!(bound_iface(&alloc, 1).as_deref(), Some("en1"));
        assert_eq!(bound_iface(&alloc, 2).as_deref(), Some("en2"));
        assert_eq!(written(&alloc, 1).len(), 2);
        assert_eq!(written(&alloc, 2).len(), 1);
        assert!(written(&alloc, 0).is_empty());

        let mut ifaces = socket.egress_interfaces();
        ifaces.sort_unstable();
        assert_eq!(ifaces, ["en0", "en1", "en2"]);

        let platform = Platform::new(PlatformFamily::Darwin);
        alloc.opened()[1].peer.inject(&batch(&platform, &[&[1; 60]]));
        alloc.opened()[2].peer.inject(&batch(&platform, &[&[2; 60]]));

        let ready = Layer3Socket::select(&[&socket], Some(Duration::from_secs(1))).unwrap();
        let mut ready: Vec<&str> = ready.iter().map(|member| member.iface()).collect();
        ready.sort_unstable();
        assert_eq!(ready, ["en1", "en2"]);
    }

    #[test]
    fn test_ready_egress_member_can_be_drained() {
        let routes = StaticRoutes::new().add("192.0.2.0".parse().unwrap(), 24, "en1");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, routes);
        socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))).unwrap();

        let platform = Platform::new(PlatformFamily::Darwin);
        let inner = ipv4([192, 0, 2, 200]);
        let frame = LinkClass::Ethernet.encapsulate(&inner, &platform);
        alloc.opened()[1].peer.inject(&batch(&platform, &[&frame]));

        let ready = Layer3Socket::select(&[&socket], Some(Duration::from_secs(1))).unwrap();
        let ready: Vec<String> = ready.iter().map(|member| member.iface().to_string()).collect();
        assert_eq!(ready, ["en1"]);

        let packet = socket.recv_from(&ready[0]).unwrap();
        assert_eq!(packet.data, inner);
        assert!(Layer3Socket::select(&[&socket], Some(Duration::ZERO))
            .unwrap()
            .is_empty());
        assert!(socket.recv_from("en9").is_none());
    }

    #[test]
    fn test_members_mut_reaches_egress_devices() {
        let routes = StaticRoutes::new().add("192.0.2.0".parse().unwrap(), 24, "en1");
        let (mut socket, _alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, routes);
        socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))).unwrap();

        let mut members = socket.members_mut();
        assert_eq!(members.len(), 2);
        members[1].close();
        assert!(socket.member_mut("en1").unwrap().is_closed());
        assert!(!socket.member_mut("en0").unwrap().is_closed());
    }

    #[test]
    fn test_select_without_timeout_uses_configured_one() {
        let allocator = MockAllocator::new(MockState {
            dlt: Some(DLT_EN10MB),
            ..MockState::default()
        });
        let backend = Backend::new(allocator).with_platform(Platform::new(PlatformFamily::Darwin));
        let config = BpfConfig {
            select_timeout_ms: 200,
            ..BpfConfig::default()
        };
        let socket = Layer3Socket::open(backend, config, SocketOptions::new()).unwrap();

        let start = std::time::Instant::now();
        assert!(Layer3Socket::select(&[&socket], None).unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_egress_devices_inherit_configuration() {
        let routes = StaticRoutes::new().add("192.0.2.0".parse().unwrap(), 24, "en1");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, routes);
        socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))).unwrap();

        let member = socket.members()[1];
        assert_eq!(member.iface(), "en1");
        assert!(member.promisc());
        assert!(!member.options().monitor);
        assert!(alloc.opened()[1]
            .state
            .lock()
            .unwrap()
            .controls
            .contains(&Control::SetPromiscuous(true)));
    }

    #[test]
    fn test_darwin_tun_loopback_sends_bare_packet() {
        let routes = StaticRoutes::new().add("10.8.0.0".parse().unwrap(), 16, "tun0");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_NULL, routes);
        let mut packet = Packet::new(ipv4([10, 8, 0, 1]));

        assert_eq!(socket.send(&mut packet).unwrap(), 28);
        assert_eq!(written(&alloc, 1), [packet.data.to_vec()]);
    }

    #[test]
    fn test_loopback_default_path_prepends_family() {
        let routes = StaticRoutes::new().add("127.0.0.0".parse().unwrap(), 8, "lo0");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_NULL, routes);
        let mut packet = Packet::new(ipv4([127, 0, 0, 1]));

        socket.send(&mut packet).unwrap();
        let frame = &written(&alloc, 1)[0];
        assert_eq!(&frame[..4], &2u32.to_ne_bytes());
        assert_eq!(&frame[4..], &packet.data[..]);
    }

    #[test]
    fn test_freebsd_tunnel_write_refused() {
        let routes = StaticRoutes::new().add("10.8.0.0".parse().unwrap(), 16, "tun0");
        let (mut socket, alloc) = open(PlatformFamily::FreeBsd, DLT_NULL, routes);
        let mut packet = Packet::new(ipv4([10, 8, 0, 1]));

        assert_eq!(socket.send(&mut packet).unwrap(), 0);
        assert!(packet.sent_time.is_none());
        assert!(written(&alloc, 1).is_empty());
    }

    #[test]
    fn test_recv_strips_link_header_and_keeps_time() {
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, StaticRoutes::new());
        let platform = Platform::new(PlatformFamily::Darwin);
        let inner = ipv4([192, 0, 2, 1]);
        let frame = LinkClass::Ethernet.encapsulate(&inner, &platform);
        alloc.opened()[0].peer.inject(&batch(&platform, &[&frame]));

        let packet = socket.recv().unwrap();
        assert_eq!(packet.data, inner);
        assert!((packet.time.unwrap() - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn test_close_closes_every_member() {
        let routes = StaticRoutes::new().add("192.0.2.0".parse().unwrap(), 24, "en1");
        let (mut socket, alloc) = open(PlatformFamily::Darwin, DLT_EN10MB, routes);
        socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))).unwrap();

        socket.close();
        socket.close();
        assert!(socket.members().iter().all(|member| member.is_closed()));
        assert!(alloc.opened().iter().all(|o| o.state.lock().unwrap().drops == 1));
        assert!(matches!(
            socket.send(&mut Packet::new(ipv4([192, 0, 2, 9]))),
            Err(BpfError::Closed)
        ));
    }
}
