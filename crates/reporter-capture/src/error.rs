//! Error types for interface selection, capture, and decoding.

/// Errors that stop a capture session from starting or continuing.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No interface carries a usable non-loopback IPv4 address.
    #[error("no suitable network interface found")]
    NoInterfaceFound,

    /// Enumerating host interfaces failed.
    #[error("failed to list network interfaces: {0}")]
    Interfaces(#[from] std::io::Error),

    /// The capture device could not be opened.
    #[error("failed to open capture on {interface}: {reason}")]
    Open { interface: String, reason: String },

    /// A capture filter was built without any destination port.
    #[error("capture filter needs at least one destination port")]
    NoPorts,

    /// The capture filter was rejected by the device.
    #[error("failed to apply capture filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    /// Reading the next frame failed.
    #[error("capture read failed: {0}")]
    Read(String),

    /// This build has no live capture backend.
    #[error("live capture is not available in this build (enable the `pcap` feature)")]
    Unsupported,
}

/// Reasons a raw frame is rejected by the decoder.
///
/// Every variant is non-fatal: the frame is dropped and capture continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame ended before the named layer was complete.
    #[error("frame truncated in {0} header")]
    Truncated(&'static str),

    /// The Ethernet payload is not IPv4.
    #[error("not an IPv4 frame (ethertype {0:#06x})")]
    NotIpv4(u16),

    /// The IPv4 header is malformed.
    #[error("malformed IPv4 header")]
    MalformedIpv4,

    /// The IPv4 payload is not UDP.
    #[error("not a UDP packet (protocol {0})")]
    NotUdp(u8),

    /// A non-initial IPv4 fragment, which carries no UDP header.
    #[error("non-initial IPv4 fragment")]
    Fragment,
}
