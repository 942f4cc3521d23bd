//! Shared types and constants for the reporter workspace.
//!
//! This crate holds the detection event record that flows from the capture
//! pipeline to subscribers, the link-layer address type it carries, and the
//! well-known "IP report" ports broadcast by mining hardware.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// UDP port Antminer devices broadcast to when the IP report button is pressed.
pub const ANTMINER_PORT: u16 = 14235;
/// UDP port used by Whatsminer IP reports.
pub const WHATSMINER_PORT: u16 = 8888;
/// UDP port used by Aurdaine IP reports.
pub const AURDAINE_PORT: u16 = 12345;
/// UDP port used by IceRiver IP reports.
pub const ICERIVER_PORT: u16 = 60040;

/// Default set of report ports the capture filter listens on.
pub const DEFAULT_REPORT_PORTS: [u16; 4] =
    [ANTMINER_PORT, WHATSMINER_PORT, AURDAINE_PORT, ICERIVER_PORT];

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Returns the raw octets.
    pub fn octets(self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Error returned when parsing a malformed MAC address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacAddrError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseMacAddrError(s.to_string()))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| ParseMacAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacAddrError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Device details fetched from a detected sender's own HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Model string reported by the device (e.g. "Antminer S19j Pro").
    pub device_type: String,
    /// Nominal hashrate in the event's reporting unit (TH/s).
    pub ideal_rate: f64,
}

/// A newly-seen sender, as streamed to subscribers.
///
/// Serializes as the flat wire record
/// `{"id", "ip_src", "mac_src", "port"}` plus `"type"` and `"rate_ideal"`
/// when enrichment succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Sequence id within the current ledger epoch, starting at 1.
    pub id: u64,
    /// IPv4 source address of the first observed packet.
    #[serde(rename = "ip_src")]
    pub source_ip: Ipv4Addr,
    /// Ethernet source address of the first observed packet.
    #[serde(rename = "mac_src")]
    pub source_mac: MacAddr,
    /// UDP destination port the packet was sent to.
    #[serde(rename = "port")]
    pub destination_port: u16,
    /// Device model, present only when enrichment succeeded.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Ideal hashrate in TH/s, present only when enrichment succeeded.
    #[serde(rename = "rate_ideal", default, skip_serializing_if = "Option::is_none")]
    pub ideal_rate: Option<f64>,
}

impl DetectionEvent {
    /// Builds a base event with no enrichment fields.
    pub fn new(id: u64, source_ip: Ipv4Addr, source_mac: MacAddr, destination_port: u16) -> Self {
        Self {
            id,
            source_ip,
            source_mac,
            destination_port,
            device_type: None,
            ideal_rate: None,
        }
    }

    /// Returns a copy of this event carrying the given device details.
    pub fn with_device(self, info: DeviceInfo) -> Self {
        Self {
            device_type: Some(info.device_type),
            ideal_rate: Some(info.ideal_rate),
            ..self
        }
    }

    /// Returns `true` if enrichment fields are present.
    pub fn is_enriched(&self) -> bool {
        self.device_type.is_some()
    }
}
