//! External collaborators of the socket layer.
//!
//! Sockets never reach for global state: the device allocator, the filter
//! compiler, the link-type registry, the routing table and the platform
//! description are bundled in a [`Backend`] handed over at construction.
//! Layer-3 sockets keep a clone so they can open more devices later.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::link::{DefaultLinkRegistry, LinkRegistry};
use crate::platform::Platform;
use crate::transport::{BpfDevice, DevBpfAllocator, PacketDevice};

/// Hands out unused packet filter devices.
pub trait DeviceAllocator {
    /// Device type produced.
    type Device: PacketDevice;

    /// Open a free device, returning it with its unit number.
    fn allocate(&self) -> io::Result<(Self::Device, u32)>;
}

/// Compiles a filter expression and loads it into a device.
pub trait FilterCompiler<D> {
    /// Attach `expression` to `device`, bound to `iface`.
    ///
    /// Failures should be reported as [`crate::BpfError::Filter`].
    fn attach(&self, device: &mut D, expression: &str, iface: &str) -> Result<()>;
}

/// Chooses the egress interface for a destination.
pub trait Router {
    /// Interface name, or `None` when no route matches.
    fn route(&self, destination: IpAddr) -> Option<String>;
}

/// Router with no routes; every packet leaves through the default interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoutes;

impl Router for NoRoutes {
    fn route(&self, _destination: IpAddr) -> Option<String> {
        None
    }
}

/// One entry of a [`StaticRoutes`] table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    network: IpAddr,
    prefix_len: u8,
    iface: String,
}

impl Route {
    fn matches(&self, destination: IpAddr) -> bool {
        match (self.network, destination) {
            (IpAddr::V4(net), IpAddr::V4(dst)) => prefix_match(
                u128::from(u32::from(net)),
                u128::from(u32::from(dst)),
                self.prefix_len,
                32,
            ),
            (IpAddr::V6(net), IpAddr::V6(dst)) => {
                prefix_match(u128::from(net), u128::from(dst), self.prefix_len, 128)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: u128, dst: u128, prefix_len: u8, width: u32) -> bool {
    let prefix_len = u32::from(prefix_len).min(width);
    if prefix_len == 0 {
        return true;
    }
    let shift = width - prefix_len;
    (net >> shift) == (dst >> shift)
}

/// Longest-prefix-match routing table.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    routes: Vec<Route>,
}

impl StaticRoutes {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `network/prefix_len` through `iface`.
    pub fn add(mut self, network: IpAddr, prefix_len: u8, iface: &str) -> Self {
        self.routes.push(Route {
            network,
            prefix_len,
            iface: iface.to_string(),
        });
        self
    }
}

impl Router for StaticRoutes {
    fn route(&self, destination: IpAddr) -> Option<String> {
        self.routes
            .iter()
            .filter(|route| route.matches(destination))
            .max_by_key(|route| route.prefix_len)
            .map(|route| route.iface.clone())
    }
}

/// Bundle of collaborators used to open and configure sockets.
pub struct Backend<D: PacketDevice> {
    /// Source of device descriptors.
    pub allocator: Arc<dyn DeviceAllocator<Device = D>>,
    /// Filter compiler; without one, any requested filter is an error.
    pub filter: Option<Arc<dyn FilterCompiler<D>>>,
    /// Data link type registry.
    pub links: Arc<dyn LinkRegistry>,
    /// Routing table for layer-3 sends.
    pub router: Arc<dyn Router>,
    /// Kernel family quirks.
    pub platform: Platform,
}

impl<D: PacketDevice> Backend<D> {
    /// Create a backend around `allocator` with default collaborators.
    pub fn new<A>(allocator: A) -> Self
    where
        A: DeviceAllocator<Device = D> + 'static,
    {
        Self {
            allocator: Arc::new(allocator),
            filter: None,
            links: Arc::new(DefaultLinkRegistry),
            router: Arc::new(NoRoutes),
            platform: Platform::current(),
        }
    }

    /// Set the filter compiler.
    pub fn with_filter_compiler<F>(mut self, compiler: F) -> Self
    where
        F: FilterCompiler<D> + 'static,
    {
        self.filter = Some(Arc::new(compiler));
        self
    }

    /// Set the link-type registry.
    pub fn with_link_registry<L: LinkRegistry + 'static>(mut self, links: L) -> Self {
        self.links = Arc::new(links);
        self
    }

    /// Set the router.
    pub fn with_router<R: Router + 'static>(mut self, router: R) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Override the platform description.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

impl Backend<BpfDevice> {
    /// Backend using the `/dev/bpf*` nodes of this host.
    pub fn system() -> Self {
        Self::new(DevBpfAllocator::default())
    }
}

impl<D: PacketDevice> Clone for Backend<D> {
    fn clone(&self) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
            filter: self.filter.clone(),
            links: Arc::clone(&self.links),
            router: Arc::clone(&self.router),
            platform: self.platform,
        }
    }
}

impl<D: PacketDevice> std::fmt::Debug for Backend<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("filter", &self.filter.is_some())
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}
