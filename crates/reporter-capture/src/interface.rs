//! Capture interface selection.
//!
//! The selector prefers an interface on a private LAN, since mining hardware
//! broadcasts its IP report on the local segment. On multi-homed hosts this
//! is only a heuristic: the first private interface wins even if the miners
//! sit on another one. Set `capture.interface` to pin a specific device.

use crate::error::CaptureError;
use std::net::{IpAddr, Ipv4Addr};

/// A host interface and the addresses bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub addrs: Vec<IpAddr>,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        Self {
            name: name.into(),
            addrs,
        }
    }

    fn usable_ipv4(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.addrs.iter().filter_map(|addr| match addr {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(*v4),
            _ => None,
        })
    }
}

/// Picks the interface to capture on.
///
/// Returns the first interface with a private (RFC 1918) IPv4 address.
/// Failing that, returns the last interface seen with any non-loopback IPv4
/// address.
///
/// # Errors
///
/// Returns [`CaptureError::NoInterfaceFound`] if no interface carries a
/// non-loopback IPv4 address.
pub fn select_interface(interfaces: &[InterfaceInfo]) -> Result<String, CaptureError> {
    let mut fallback: Option<&str> = None;

    for iface in interfaces {
        for addr in iface.usable_ipv4() {
            if addr.is_private() {
                return Ok(iface.name.clone());
            }
            fallback = Some(&iface.name);
        }
    }

    fallback
        .map(str::to_string)
        .ok_or(CaptureError::NoInterfaceFound)
}

/// Enumerates host interfaces, grouping addresses by interface name.
///
/// Interfaces keep the order in which the OS first reports them.
///
/// # Errors
///
/// Returns [`CaptureError::Interfaces`] if the OS query fails.
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>, CaptureError> {
    let mut grouped: Vec<InterfaceInfo> = Vec::new();

    for iface in if_addrs::get_if_addrs()? {
        let ip = iface.ip();
        match grouped.iter_mut().find(|g| g.name == iface.name) {
            Some(existing) => existing.addrs.push(ip),
            None => grouped.push(InterfaceInfo::new(iface.name, vec![ip])),
        }
    }

    tracing::debug!(count = grouped.len(), "enumerated network interfaces");
    Ok(grouped)
}
