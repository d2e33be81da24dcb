//! Turning a freshly allocated device into a capture/inject endpoint.
//!
//! [`DeviceConfigurator::configure`] issues the control calls in a fixed
//! order and aborts on the first failure. Nothing is rolled back: a device
//! that failed configuration is in an unknown state and must be dropped.

use std::io;

use super::device::PacketDevice;
use super::ioctl::{fits_ifreq, Control, ControlReply, BPF_T_NANOTIME};
use crate::backend::FilterCompiler;
use crate::config::SocketOptions;
use crate::error::{BpfError, Result};
use crate::link::DLT_IEEE802_11_RADIO;
use crate::platform::{MonitorSupport, Platform};

/// Filter attached on platforms that drop everything on unfiltered devices.
pub const FALLBACK_FILTER: &str = "greater 0";

/// Combine a caller filter with the global exclusion expression.
///
/// An empty exclusion is ignored.
pub fn compose_filter(filter: Option<&str>, except: Option<&str>) -> Option<String> {
    match (filter, except.filter(|e| !e.is_empty())) {
        (Some(filter), Some(except)) => Some(format!("({filter}) and not ({except})")),
        (None, Some(except)) => Some(format!("not ({except})")),
        (Some(filter), None) => Some(filter.to_string()),
        (None, None) => None,
    }
}

/// Issues the setup sequence for one device.
pub struct DeviceConfigurator<'a, D> {
    platform: &'a Platform,
    buffer_length: u32,
    compiler: Option<&'a dyn FilterCompiler<D>>,
    except_filter: Option<&'a str>,
}

impl<'a, D: PacketDevice> DeviceConfigurator<'a, D> {
    /// Create a configurator requesting a kernel buffer of `buffer_length`.
    pub fn new(platform: &'a Platform, buffer_length: u32) -> Self {
        Self {
            platform,
            buffer_length,
            compiler: None,
            except_filter: None,
        }
    }

    /// Set the compiler used to attach filters.
    pub fn filter_compiler(mut self, compiler: Option<&'a dyn FilterCompiler<D>>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Set the global exclusion expression.
    pub fn except_filter(mut self, except: Option<&'a str>) -> Self {
        self.except_filter = except;
        self
    }

    /// Configure `device` and bind it to `iface`.
    ///
    /// Calls are issued in this order: timestamp format (FreeBSD), buffer
    /// length, interface, promiscuous mode, monitor mode, immediate mode,
    /// header-complete mode, then filters. Any failure is returned as
    /// [`BpfError::Config`] naming the call.
    ///
    /// Returns the buffer length the kernel accepted, which reads must use.
    pub fn configure(
        &self,
        device: &mut D,
        iface: &str,
        options: &SocketOptions,
        promisc: bool,
    ) -> Result<u32> {
        if self.platform.requests_nanotime() {
            issue(device, iface, Control::SetTimestampFormat(BPF_T_NANOTIME))?;
        }
        let reply = issue(device, iface, Control::SetBufferLength(self.buffer_length))?;
        let buffer_length = match reply {
            ControlReply::Value(accepted) if accepted > 0 => accepted,
            _ => self.buffer_length,
        };
        if buffer_length != self.buffer_length {
            tracing::debug!(
                iface,
                requested = self.buffer_length,
                accepted = buffer_length,
                "Kernel adjusted the buffer length"
            );
        }

        if !fits_ifreq(iface) {
            return Err(BpfError::Config {
                option: "BIOCSETIF",
                device: format!("{} ({})", device.name(), iface),
                source: io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"),
            });
        }
        issue(device, iface, Control::SetInterface(iface.to_string()))?;
        if promisc {
            issue(device, iface, Control::SetPromiscuous(true))?;
        }
        if options.monitor {
            self.enable_monitor(device, iface)?;
        }
        issue(device, iface, Control::SetImmediate(true))?;
        issue(device, iface, Control::SetHeaderComplete(true))?;

        self.attach_filters(device, iface, options)?;
        Ok(buffer_length)
    }

    fn enable_monitor(&self, device: &mut D, iface: &str) -> Result<()> {
        match self.platform.monitor_support() {
            MonitorSupport::Radiotap => {
                issue(device, iface, Control::SetDataLinkType(DLT_IEEE802_11_RADIO))?;
            }
            MonitorSupport::UnsafeKernel => {
                tracing::warn!(
                    iface,
                    "Not enabling 802.11 monitoring: it crashes this macOS kernel"
                );
            }
            MonitorSupport::Unsupported => {
                tracing::warn!(iface, "Monitor mode is not supported on this platform");
            }
        }
        Ok(())
    }

    fn attach_filters(&self, device: &mut D, iface: &str, options: &SocketOptions) -> Result<()> {
        let mut attached = false;
        if !options.nofilter {
            if let Some(expression) = compose_filter(options.filter.as_deref(), self.except_filter)
            {
                let compiler = self.compiler.ok_or_else(|| BpfError::Filter {
                    expression: expression.clone(),
                    reason: "no filter compiler configured".to_string(),
                })?;
                compiler.attach(device, &expression, iface)?;
                tracing::debug!(iface, filter = %expression, "Attached filter");
                attached = true;
            }
        }

        if !attached && self.platform.requires_filter() {
            match self.compiler {
                Some(compiler) => {
                    if let Err(e) = compiler.attach(device, FALLBACK_FILTER, iface) {
                        tracing::warn!(iface, error = %e, "Cannot set fallback filter");
                    }
                }
                None => {
                    tracing::warn!(iface, "No filter compiler; unfiltered device may capture nothing")
                }
            }
        }
        Ok(())
    }
}

fn issue<D: PacketDevice>(device: &mut D, iface: &str, control: Control) -> Result<ControlReply> {
    tracing::debug!(device = device.name(), call = control.name(), "Control call");
    device.control(&control).map_err(|source| BpfError::Config {
        option: control.name(),
        device: format!("{} ({})", device.name(), iface),
        source,
    })
}
