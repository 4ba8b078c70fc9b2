//! Dongle link layer
//!
//! This module provides:
//! - Dongle discovery by USB identifiers
//! - The serial link with its reader and reconnect loops
//! - Status frame reassembly and polling
//! - The [`Dongle`] facade with a pull interface for telemetry

pub mod discovery;
mod error;
pub mod framing;
pub mod link;
pub mod manager;
pub mod port;
pub mod scanner;
pub mod status;

pub use discovery::{matches, DeviceFinder, PortInfo, SystemDeviceFinder};
pub use error::{DiscoveryError, LinkError};
pub use framing::FrameAssembler;
pub use link::{Link, LinkState};
pub use manager::Dongle;
pub use port::{LinkPort, PortOpener, SerialLinkPort, SystemPortOpener};
pub use scanner::FrameScanner;
pub use status::{parse_status_payload, DeviceStatus, StatusParseError, STATUS_STALE_AFTER};
