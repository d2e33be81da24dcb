//! Kernel family detection and the per-family quirks of the BPF device.
//!
//! The packet filter device differs across BSD descendants in three ways
//! that matter here:
//! - the timestamp layout inside each capture header,
//! - the alignment used between consecutive captures,
//! - which link types may be written to (tunnel interfaces, monitor mode).
//!
//! [`Platform`] is a plain value so the decoding and framing rules of every
//! family can be exercised from any host.

use std::process::Command;

/// Kernel families with distinct BPF behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    /// macOS / Darwin.
    Darwin,
    /// FreeBSD.
    FreeBsd,
    /// NetBSD.
    NetBsd,
    /// OpenBSD.
    OpenBsd,
    /// Anything else (the default header layout applies).
    Other,
}

/// Layout of the timestamp at the start of every capture header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// 64-bit seconds + 64-bit nanoseconds (`bpf_timespec`).
    Nano64,
    /// 64-bit seconds + 64-bit microseconds.
    Micro64,
    /// 32-bit seconds + 32-bit microseconds (`bpf_timeval32`).
    Micro32,
}

impl TimestampFormat {
    /// Size in bytes of the timestamp field.
    pub const fn size(self) -> usize {
        match self {
            TimestampFormat::Nano64 | TimestampFormat::Micro64 => 16,
            TimestampFormat::Micro32 => 8,
        }
    }

    /// Scale applied to the sub-second field.
    pub const fn fraction_scale(self) -> f64 {
        match self {
            TimestampFormat::Nano64 => 1e-9,
            TimestampFormat::Micro64 | TimestampFormat::Micro32 => 1e-6,
        }
    }
}

/// What enabling monitor mode would do on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSupport {
    /// Switch the data link type to 802.11 + radiotap.
    Radiotap,
    /// The kernel is known to crash when monitoring is enabled through BPF.
    UnsafeKernel,
    /// Not available natively on this family.
    Unsupported,
}

/// First macOS release (10.15) on which enabling 802.11 monitoring through
/// BPF panics the kernel, encoded as `major * 10000 + minor * 100 + patch`.
pub const MACOS_MONITOR_UNSAFE_FROM: u32 = 101_500;

/// Platform description used by the decoder, configurator and framing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    family: PlatformFamily,
    long_size: usize,
    os_version: Option<u32>,
}

impl Platform {
    /// Describe a family using the host's `long` width.
    pub fn new(family: PlatformFamily) -> Self {
        Self {
            family,
            long_size: std::mem::size_of::<libc::c_long>(),
            os_version: None,
        }
    }

    /// Detect the platform this process runs on.
    pub fn current() -> Self {
        let family = if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
            PlatformFamily::Darwin
        } else if cfg!(target_os = "freebsd") {
            PlatformFamily::FreeBsd
        } else if cfg!(target_os = "netbsd") {
            PlatformFamily::NetBsd
        } else if cfg!(target_os = "openbsd") {
            PlatformFamily::OpenBsd
        } else {
            PlatformFamily::Other
        };

        let platform = Self::new(family);
        if family == PlatformFamily::Darwin {
            match detect_macos_version() {
                Some(version) => platform.with_os_version(version),
                None => {
                    tracing::warn!("Could not determine your macOS version!");
                    platform
                }
            }
        } else {
            platform
        }
    }

    /// Override the width of the native `long` (4 or 8).
    pub fn with_long_size(mut self, long_size: usize) -> Self {
        self.long_size = long_size;
        self
    }

    /// Set the encoded OS version (`major * 10000 + minor * 100 + patch`).
    pub fn with_os_version(mut self, version: u32) -> Self {
        self.os_version = Some(version);
        self
    }

    /// Kernel family.
    #[inline]
    pub fn family(&self) -> PlatformFamily {
        self.family
    }

    /// Encoded OS version, when known.
    #[inline]
    pub fn os_version(&self) -> Option<u32> {
        self.os_version
    }

    /// Alignment between captures in one read buffer (`BPF_ALIGNMENT`).
    pub fn alignment(&self) -> usize {
        match self.family {
            PlatformFamily::FreeBsd | PlatformFamily::NetBsd => self.long_size,
            _ => 4,
        }
    }

    /// Timestamp layout of the capture header.
    pub fn timestamp_format(&self) -> TimestampFormat {
        match self.family {
            PlatformFamily::FreeBsd => TimestampFormat::Nano64,
            PlatformFamily::NetBsd => TimestampFormat::Micro64,
            _ => TimestampFormat::Micro32,
        }
    }

    /// Whether the timestamp format must be requested with `BIOCSTSTAMP`.
    pub fn requests_nanotime(&self) -> bool {
        self.family == PlatformFamily::FreeBsd
    }

    /// Unfiltered descriptors receive nothing on this family.
    pub fn requires_filter(&self) -> bool {
        self.family == PlatformFamily::NetBsd
    }

    /// Writes of bare network-layer packets are expected on `tun*`
    /// interfaces reporting the loopback link type.
    pub fn has_loopback_quirk(&self) -> bool {
        self.family == PlatformFamily::Darwin
    }

    /// BPF refuses writes to `tun*` and `tap*` interfaces.
    pub fn restricts_tunnel_writes(&self) -> bool {
        self.family == PlatformFamily::FreeBsd
    }

    /// How a monitor-mode request should be handled.
    pub fn monitor_support(&self) -> MonitorSupport {
        if self.family != PlatformFamily::Darwin {
            return MonitorSupport::Unsupported;
        }
        // An unknown version is treated as too recent.
        match self.os_version {
            Some(version) if version < MACOS_MONITOR_UNSAFE_FROM => MonitorSupport::Radiotap,
            _ => MonitorSupport::UnsafeKernel,
        }
    }

    /// Value of `AF_INET6` in loopback link headers.
    pub fn af_inet6(&self) -> u32 {
        match self.family {
            PlatformFamily::Darwin => 30,
            PlatformFamily::FreeBsd => 28,
            _ => 24,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// Parse a dotted macOS product version (`10.14.6`) into its encoded form.
///
/// A missing patch component counts as zero.
pub fn parse_macos_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = match parts.next() {
        Some(patch) => patch.ok()?,
        None => 0,
    };
    Some(major * 10_000 + minor * 100 + patch)
}

fn detect_macos_version() -> Option<u32> {
    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_macos_version(&String::from_utf8_lossy(&output.stdout))
}
