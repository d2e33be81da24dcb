//! Link-layer classes and the data-link-type registry.
//!
//! The device reports a numeric data link type (`DLT_*`). A [`LinkRegistry`]
//! maps it to a [`LinkClass`], which knows how to strip its header from a
//! capture and how to build the canonical empty header for an outgoing
//! network-layer packet.

use bytes::Bytes;

use crate::platform::Platform;

/// BSD loopback encapsulation, address family in host byte order.
pub const DLT_NULL: u32 = 0;
/// Ethernet (10Mb and up).
pub const DLT_EN10MB: u32 = 1;
/// Raw IP, no link header.
pub const DLT_RAW: u32 = 12;
/// Raw IP as numbered on OpenBSD.
pub const DLT_RAW_OPENBSD: u32 = 14;
/// OpenBSD loopback encapsulation, address family in network byte order.
pub const DLT_LOOP: u32 = 108;
/// 802.11 frames preceded by a radiotap header.
pub const DLT_IEEE802_11_RADIO: u32 = 127;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHER_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const AF_INET: u32 = 2;

/// Decoding strategy selected from the device's data link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkClass {
    /// `DLT_NULL`: 4-byte address family, host byte order.
    Null,
    /// `DLT_LOOP`: 4-byte address family, network byte order.
    Loop,
    /// `DLT_EN10MB`: Ethernet II.
    Ethernet,
    /// `DLT_RAW`: bare IP.
    Raw,
    /// `DLT_IEEE802_11_RADIO`: radiotap + 802.11.
    Ieee80211Radio,
}

impl LinkClass {
    /// Map a data link type to its class.
    pub fn from_dlt(dlt: u32) -> Option<Self> {
        match dlt {
            DLT_NULL => Some(LinkClass::Null),
            DLT_EN10MB => Some(LinkClass::Ethernet),
            DLT_RAW | DLT_RAW_OPENBSD => Some(LinkClass::Raw),
            DLT_LOOP => Some(LinkClass::Loop),
            DLT_IEEE802_11_RADIO => Some(LinkClass::Ieee80211Radio),
            _ => None,
        }
    }

    /// Canonical data link type of this class.
    pub fn dlt(&self) -> u32 {
        match self {
            LinkClass::Null => DLT_NULL,
            LinkClass::Loop => DLT_LOOP,
            LinkClass::Ethernet => DLT_EN10MB,
            LinkClass::Raw => DLT_RAW,
            LinkClass::Ieee80211Radio => DLT_IEEE802_11_RADIO,
        }
    }

    /// True for the loopback encapsulations.
    pub fn is_loopback(&self) -> bool {
        matches!(self, LinkClass::Null | LinkClass::Loop)
    }

    /// Header with every field left at its default, for `packet`.
    ///
    /// Protocol selectors (address family, ethertype) follow the IP
    /// version of `packet`. Ethernet frames are addressed to broadcast from
    /// an all-zero source.
    pub fn empty_header(&self, packet: &[u8], platform: &Platform) -> Vec<u8> {
        let is_v6 = ip_version(packet) == Some(6);
        match self {
            LinkClass::Null => {
                let family = if is_v6 { platform.af_inet6() } else { AF_INET };
                family.to_ne_bytes().to_vec()
            }
            LinkClass::Loop => {
                let family = if is_v6 { platform.af_inet6() } else { AF_INET };
                family.to_be_bytes().to_vec()
            }
            LinkClass::Ethernet => {
                let ethertype = if is_v6 { ETHERTYPE_IPV6 } else { ETHERTYPE_IPV4 };
                let mut header = Vec::with_capacity(ETHER_HEADER_LEN);
                header.extend_from_slice(&[0xFF; 6]);
                header.extend_from_slice(&[0x00; 6]);
                header.extend_from_slice(&ethertype.to_be_bytes());
                header
            }
            LinkClass::Raw => Vec::new(),
            // version 0, pad, length 8 (LE), no present fields
            LinkClass::Ieee80211Radio => vec![0, 0, 8, 0, 0, 0, 0, 0],
        }
    }

    /// Prepend the empty header to `packet`.
    pub fn encapsulate(&self, packet: &[u8], platform: &Platform) -> Bytes {
        let mut frame = self.empty_header(packet, platform);
        frame.extend_from_slice(packet);
        Bytes::from(frame)
    }

    /// Strip the link header from a captured frame.
    ///
    /// For radiotap captures only the radiotap header is removed; the
    /// 802.11 frame is returned as is. Returns `None` for frames too short
    /// to carry the header.
    pub fn decapsulate(&self, frame: &Bytes) -> Option<Bytes> {
        match self {
            LinkClass::Null | LinkClass::Loop => (frame.len() >= 4).then(|| frame.slice(4..)),
            LinkClass::Ethernet => {
                if frame.len() < ETHER_HEADER_LEN {
                    return None;
                }
                let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
                let offset = if ethertype == ETHERTYPE_VLAN {
                    ETHER_HEADER_LEN + VLAN_TAG_LEN
                } else {
                    ETHER_HEADER_LEN
                };
                (frame.len() >= offset).then(|| frame.slice(offset..))
            }
            LinkClass::Raw => Some(frame.clone()),
            LinkClass::Ieee80211Radio => {
                if frame.len() < 4 {
                    return None;
                }
                let len = usize::from(u16::from_le_bytes([frame[2], frame[3]]));
                (frame.len() >= len).then(|| frame.slice(len..))
            }
        }
    }
}

/// IP version nibble of a network-layer packet.
pub fn ip_version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b >> 4)
}

/// Maps numeric data link types to decoding classes.
pub trait LinkRegistry {
    /// Class for `dlt`, or `None` when it is not known.
    fn lookup(&self, dlt: u32) -> Option<LinkClass>;
}

/// Registry covering the link types in [`LinkClass`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLinkRegistry;

impl LinkRegistry for DefaultLinkRegistry {
    fn lookup(&self, dlt: u32) -> Option<LinkClass> {
        LinkClass::from_dlt(dlt)
    }
}
