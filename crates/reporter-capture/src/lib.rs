//! Packet capture front end for the reporter.
//!
//! Chooses the interface to listen on, describes which UDP ports to capture,
//! supplies raw frames, and decodes each frame's Ethernet, IPv4 and UDP
//! headers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use reporter_capture::{decode, select_interface, CaptureBackend, CaptureFilter, LiveCapture};
//!
//! let backend = LiveCapture::default();
//! let interface = select_interface(&backend.interfaces()?)?;
//! let mut source = backend.open(&interface, &CaptureFilter::default())?;
//! while let Some(frame) = source.next_frame()? {
//!     if let Ok(headers) = decode(&frame) {
//!         println!("{} -> udp/{}", headers.source_ip, headers.destination_port);
//!     }
//! }
//! ```

mod decode;
mod error;
mod filter;
mod interface;
mod source;

pub use decode::{decode, DecodedHeaders};
pub use error::{CaptureError, DecodeError};
pub use filter::CaptureFilter;
pub use interface::{list_interfaces, select_interface, InterfaceInfo};
pub use source::{CaptureBackend, FrameSource, LiveCapture, LiveOptions, ReplaySource};
