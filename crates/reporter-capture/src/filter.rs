//! Capture filter over UDP destination ports.

use crate::error::CaptureError;
use std::fmt;

/// An immutable, non-empty OR over UDP destination ports.
///
/// Rendered once into a BPF expression when a capture session opens, and
/// also checked in userspace so sources that cannot filter behave the same.
/// The expression matches both untagged and single 802.1Q-tagged frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFilter {
    ports: Vec<u16>,
}

impl CaptureFilter {
    /// Builds a filter from the given ports, dropping duplicates but keeping
    /// the first-given order.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NoPorts`] if `ports` is empty.
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Result<Self, CaptureError> {
        let mut unique = Vec::new();
        for port in ports {
            if !unique.contains(&port) {
                unique.push(port);
            }
        }
        if unique.is_empty() {
            return Err(CaptureError::NoPorts);
        }
        Ok(Self { ports: unique })
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Returns `true` if packets to `port` pass the filter.
    pub fn matches(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// The BPF program text for this filter.
    ///
    /// `vlan` shifts offsets for everything after it, so the tagged branch
    /// must stay last.
    pub fn expression(&self) -> String {
        let ports = self
            .ports
            .iter()
            .map(|port| format!("dst port {port}"))
            .collect::<Vec<_>>()
            .join(" or ");
        format!("(udp and ({ports})) or (vlan and udp and ({ports}))")
    }
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            ports: reporter_types::DEFAULT_REPORT_PORTS.to_vec(),
        }
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}
