//! BPF control calls.
//!
//! Request codes follow the BSD `<sys/ioccom.h>` encoding:
//! ```text
//! ┌────────┬──────────────────┬──────────┬──────────┐
//! │ inout  │ parameter length │ group    │ number   │
//! │ 3 bits │ 13 bits          │ 8 bits   │ 8 bits   │
//! └────────┴──────────────────┴──────────┴──────────┘
//! ```
//! and must stay bit-for-bit identical to the kernel headers.

use std::mem::size_of;

const IOCPARM_MASK: u32 = 0x1fff;
const IOC_VOID: u32 = 0x2000_0000;
const IOC_OUT: u32 = 0x4000_0000;
const IOC_IN: u32 = 0x8000_0000;
const IOC_INOUT: u32 = IOC_IN | IOC_OUT;

const fn ioc(inout: u32, group: u8, num: u8, len: usize) -> u32 {
    inout | ((len as u32 & IOCPARM_MASK) << 16) | ((group as u32) << 8) | num as u32
}

/// Size of `struct ifreq` as passed to `BIOCSETIF`.
pub const IFREQ_SIZE: usize = 32;
/// Width of the interface name field of `struct ifreq`.
pub const IFNAMSIZ: usize = 16;
/// Size of `struct bpf_stat`.
const BPF_STAT_SIZE: usize = 8;
/// Size of `struct bpf_program` (instruction count + pointer).
const BPF_PROGRAM_SIZE: usize = 2 * size_of::<usize>();

/// Get the buffer length.
pub const BIOCGBLEN: u32 = ioc(IOC_OUT, b'B', 102, size_of::<u32>());
/// Set the buffer length.
pub const BIOCSBLEN: u32 = ioc(IOC_INOUT, b'B', 102, size_of::<u32>());
/// Attach a filter program.
pub const BIOCSETF: u32 = ioc(IOC_IN, b'B', 103, BPF_PROGRAM_SIZE);
/// Enable promiscuous mode on the bound interface.
pub const BIOCPROMISC: u32 = ioc(IOC_VOID, b'B', 105, 0);
/// Get the data link type.
pub const BIOCGDLT: u32 = ioc(IOC_OUT, b'B', 106, size_of::<u32>());
/// Bind to an interface.
pub const BIOCSETIF: u32 = ioc(IOC_IN, b'B', 108, IFREQ_SIZE);
/// Get received/dropped counters.
pub const BIOCGSTATS: u32 = ioc(IOC_OUT, b'B', 111, BPF_STAT_SIZE);
/// Return reads as soon as a packet arrives.
pub const BIOCIMMEDIATE: u32 = ioc(IOC_IN, b'B', 112, size_of::<u32>());
/// Caller supplies the complete link header on writes.
pub const BIOCSHDRCMPLT: u32 = ioc(IOC_IN, b'B', 117, size_of::<u32>());
/// Set the data link type.
pub const BIOCSDLT: u32 = ioc(IOC_IN, b'B', 120, size_of::<u32>());
/// Set the timestamp format (FreeBSD).
pub const BIOCSTSTAMP: u32 = ioc(IOC_IN, b'B', 132, size_of::<u32>());

/// Nanosecond resolution `bpf_timespec` timestamps (FreeBSD).
pub const BPF_T_NANOTIME: u32 = 0x0001;

/// One control call with its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `BIOCSBLEN`
    SetBufferLength(u32),
    /// `BIOCGBLEN`
    GetBufferLength,
    /// `BIOCSETIF`
    SetInterface(String),
    /// `BIOCPROMISC`
    SetPromiscuous(bool),
    /// `BIOCIMMEDIATE`
    SetImmediate(bool),
    /// `BIOCSHDRCMPLT`
    SetHeaderComplete(bool),
    /// `BIOCGDLT`
    GetDataLinkType,
    /// `BIOCSDLT`
    SetDataLinkType(u32),
    /// `BIOCSTSTAMP`
    SetTimestampFormat(u32),
    /// `BIOCGSTATS`
    GetStats,
}

impl Control {
    /// Request code passed to `ioctl(2)`.
    pub fn code(&self) -> u32 {
        match self {
            Control::SetBufferLength(_) => BIOCSBLEN,
            Control::GetBufferLength => BIOCGBLEN,
            Control::SetInterface(_) => BIOCSETIF,
            Control::SetPromiscuous(_) => BIOCPROMISC,
            Control::SetImmediate(_) => BIOCIMMEDIATE,
            Control::SetHeaderComplete(_) => BIOCSHDRCMPLT,
            Control::GetDataLinkType => BIOCGDLT,
            Control::SetDataLinkType(_) => BIOCSDLT,
            Control::SetTimestampFormat(_) => BIOCSTSTAMP,
            Control::GetStats => BIOCGSTATS,
        }
    }

    /// Kernel name of the call, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Control::SetBufferLength(_) => "BIOCSBLEN",
            Control::GetBufferLength => "BIOCGBLEN",
            Control::SetInterface(_) => "BIOCSETIF",
            Control::SetPromiscuous(_) => "BIOCPROMISC",
            Control::SetImmediate(_) => "BIOCIMMEDIATE",
            Control::SetHeaderComplete(_) => "BIOCSHDRCMPLT",
            Control::GetDataLinkType => "BIOCGDLT",
            Control::SetDataLinkType(_) => "BIOCSDLT",
            Control::SetTimestampFormat(_) => "BIOCSTSTAMP",
            Control::GetStats => "BIOCGSTATS",
        }
    }

    /// Argument bytes in host order, sized for the call.
    ///
    /// Query calls carry a zeroed buffer the kernel fills in.
    pub fn argument(&self) -> Vec<u8> {
        match self {
            Control::SetBufferLength(v)
            | Control::SetDataLinkType(v)
            | Control::SetTimestampFormat(v) => v.to_ne_bytes().to_vec(),
            Control::SetImmediate(on) => u32::from(*on).to_ne_bytes().to_vec(),
            Control::SetPromiscuous(on) | Control::SetHeaderComplete(on) => {
                i32::from(*on).to_ne_bytes().to_vec()
            }
            Control::SetInterface(name) => pack_ifreq(name).to_vec(),
            Control::GetBufferLength | Control::GetDataLinkType => vec![0; 4],
            Control::GetStats => vec![0; BPF_STAT_SIZE],
        }
    }
}

/// Result of a control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// Setter completed.
    Done,
    /// Scalar query result.
    Value(u32),
    /// `BIOCGSTATS` result.
    Stats {
        /// Packets received by the filter.
        received: u32,
        /// Packets dropped for lack of buffer space.
        dropped: u32,
    },
}

impl ControlReply {
    /// Interpret the argument buffer after the kernel returned.
    pub fn from_argument(control: &Control, arg: &[u8]) -> Self {
        let word = |at: usize| {
            arg.get(at..at + 4)
                .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(0)
        };
        match control {
            // BIOCSBLEN is in/out: the kernel writes back the length it accepted.
            Control::SetBufferLength(_)
            | Control::GetBufferLength
            | Control::GetDataLinkType => ControlReply::Value(word(0)),
            Control::GetStats => ControlReply::Stats {
                received: word(0),
                dropped: word(4),
            },
            _ => ControlReply::Done,
        }
    }
}

/// Whether `name` fits the `ifreq` name field with its terminating NUL.
pub fn fits_ifreq(name: &str) -> bool {
    name.len() < IFNAMSIZ
}

/// Lay out `name` as a `struct ifreq`: 16-byte NUL-padded name followed by
/// 16 reserved bytes. Longer names are truncated to keep a terminating NUL;
/// check them with [`fits_ifreq`] first.
pub fn pack_ifreq(name: &str) -> [u8; IFREQ_SIZE] {
    let mut ifreq = [0u8; IFREQ_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(IFNAMSIZ - 1);
    ifreq[..len].copy_from_slice(&bytes[..len]);
    ifreq
}
