//! Frame sources: the boundary to the packet capture mechanism.

use crate::error::CaptureError;
use crate::filter::CaptureFilter;
use crate::interface::{list_interfaces, InterfaceInfo};
use std::collections::VecDeque;

/// A blocking sequence of raw link-layer frames.
pub trait FrameSource: Send {
    /// Blocks until the next frame arrives.
    ///
    /// Returns `Ok(None)` once the source has been closed by its owner.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// Opens frame sources on named interfaces.
pub trait CaptureBackend: Send + Sync {
    /// Lists host interfaces for interface selection.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError>;

    /// Opens a live source on `interface`, applying `filter` for the whole
    /// session.
    fn open(
        &self,
        interface: &str,
        filter: &CaptureFilter,
    ) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Replays a fixed list of frames, then reports the source closed.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    frames: VecDeque<Vec<u8>>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        Ok(self.frames.pop_front())
    }
}

/// Capture settings for the live backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOptions {
    /// Maximum bytes kept per frame.
    pub snaplen: i32,
    /// Whether to put the interface in promiscuous mode.
    pub promiscuous: bool,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            snaplen: 1600,
            promiscuous: true,
        }
    }
}

/// Host capture through libpcap (with the `pcap` feature).
#[derive(Debug, Clone, Default)]
pub struct LiveCapture {
    options: LiveOptions,
}

impl LiveCapture {
    pub fn new(options: LiveOptions) -> Self {
        Self { options }
    }
}

impl CaptureBackend for LiveCapture {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        list_interfaces()
    }

    #[cfg(feature = "pcap")]
    fn open(
        &self,
        interface: &str,
        filter: &CaptureFilter,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        pcap_source::open(interface, filter, self.options)
    }

    #[cfg(not(feature = "pcap"))]
    fn open(
        &self,
        interface: &str,
        _filter: &CaptureFilter,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        tracing::error!(
            interface,
            snaplen = self.options.snaplen,
            "live capture requested but this build has no capture backend"
        );
        Err(CaptureError::Unsupported)
    }
}

#[cfg(feature = "pcap")]
mod pcap_source {
    use super::{CaptureError, CaptureFilter, FrameSource, LiveOptions};

    /// Read timeout so a quiet interface still returns control periodically.
    const READ_TIMEOUT_MS: i32 = 1000;

    pub(super) struct PcapSource {
        capture: pcap::Capture<pcap::Active>,
    }

    pub(super) fn open(
        interface: &str,
        filter: &CaptureFilter,
        options: LiveOptions,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let open_err = |e: pcap::Error| CaptureError::Open {
            interface: interface.to_string(),
            reason: e.to_string(),
        };

        let mut capture = pcap::Capture::from_device(interface)
            .map_err(open_err)?
            .snaplen(options.snaplen)
            .promisc(options.promiscuous)
            .immediate_mode(true)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(open_err)?;

        let expression = filter.expression();
        capture
            .filter(&expression, true)
            .map_err(|e| CaptureError::Filter {
                filter: expression.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(interface, filter = %expression, "opened live capture");
        Ok(Box::new(PcapSource { capture }))
    }

    impl FrameSource for PcapSource {
        fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            loop {
                match self.capture.next_packet() {
                    Ok(packet) => return Ok(Some(packet.data.to_vec())),
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(pcap::Error::NoMorePackets) => return Ok(None),
                    Err(e) => return Err(CaptureError::Read(e.to_string())),
                }
            }
        }
    }
}
