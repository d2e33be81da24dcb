//! Ambient defaults and per-socket options.
//!
//! [`BpfConfig`] holds what every socket falls back on when the caller does
//! not say otherwise: the default interface, promiscuous flag, global
//! exclusion filter and default link type. It is an explicit value, loadable
//! from JSON.
//!
//! # Example
//!
//! ```
//! use bpfsock::config::{BpfConfig, SocketOptions};
//!
//! let config = BpfConfig::from_json(r#"{"iface": "en1", "except_filter": "port 22"}"#).unwrap();
//! assert_eq!(config.iface, "en1");
//! assert!(config.sniff_promisc);
//!
//! let options = SocketOptions::new().filter("udp").promisc(false);
//! assert_eq!(options.resolve_iface(&config), "en1");
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::link::DLT_EN10MB;
use crate::protocol::BPF_BUFFER_LENGTH;

/// Capture every ethertype.
pub const ETH_P_ALL: u16 = 0x0003;

/// Default interface when none is configured.
pub const DEFAULT_IFACE: &str = "en0";

/// Default readiness poll timeout, in milliseconds.
pub const DEFAULT_SELECT_TIMEOUT_MS: u64 = 50;

/// Defaults shared by every socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpfConfig {
    /// Interface used when a socket names none, and the fallback egress
    /// interface of layer-3 sends.
    pub iface: String,
    /// Promiscuous mode when a socket does not specify it.
    pub sniff_promisc: bool,
    /// Traffic excluded from every filtered socket.
    pub except_filter: Option<String>,
    /// Data link type assumed when the device's type is unknown.
    pub default_link_type: u32,
    /// Kernel buffer length requested with `BIOCSBLEN`. Reads use the length
    /// the kernel accepts, which may be smaller.
    pub buffer_length: u32,
    /// Readiness poll timeout used when the caller gives none.
    pub select_timeout_ms: u64,
}

impl Default for BpfConfig {
    fn default() -> Self {
        Self {
            iface: DEFAULT_IFACE.to_string(),
            sniff_promisc: true,
            except_filter: None,
            default_link_type: DLT_EN10MB,
            buffer_length: BPF_BUFFER_LENGTH,
            select_timeout_ms: DEFAULT_SELECT_TIMEOUT_MS,
        }
    }
}

impl BpfConfig {
    /// Parse a configuration from JSON text. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Readiness poll timeout.
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }
}

/// Arguments of a socket open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Interface to bind; `None` uses [`BpfConfig::iface`].
    pub iface: Option<String>,
    /// Ethertype of interest. BPF captures everything; kept for callers.
    pub eth_type: u16,
    /// Promiscuous mode; `None` uses [`BpfConfig::sniff_promisc`].
    pub promisc: Option<bool>,
    /// Filter expression.
    pub filter: Option<String>,
    /// Attach no filter at all, not even the exclusion filter.
    pub nofilter: bool,
    /// Request 802.11 monitor mode.
    pub monitor: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            iface: None,
            eth_type: ETH_P_ALL,
            promisc: None,
            filter: None,
            nofilter: false,
            monitor: false,
        }
    }
}

impl SocketOptions {
    /// Options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `iface`.
    pub fn iface(mut self, iface: &str) -> Self {
        self.iface = Some(iface.to_string());
        self
    }

    /// Set the ethertype of interest.
    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = eth_type;
        self
    }

    /// Force promiscuous mode on or off.
    pub fn promisc(mut self, promisc: bool) -> Self {
        self.promisc = Some(promisc);
        self
    }

    /// Attach a filter expression.
    pub fn filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    /// Skip every filter.
    pub fn nofilter(mut self, nofilter: bool) -> Self {
        self.nofilter = nofilter;
        self
    }

    /// Request monitor mode.
    pub fn monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    /// Interface after applying the configured default.
    pub fn resolve_iface(&self, config: &BpfConfig) -> String {
        self.iface.clone().unwrap_or_else(|| config.iface.clone())
    }

    /// Promiscuous flag after applying the configured default.
    pub fn resolve_promisc(&self, config: &BpfConfig) -> bool {
        self.promisc.unwrap_or(config.sniff_promisc)
    }
}
