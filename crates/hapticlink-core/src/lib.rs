//! # HapticLink Core Library
//!
//! Host-side link layer for the haptic glove and its USB-serial BLE dongle.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! The dongle relays one continuous byte stream between the host and the
//! glove. This library provides:
//! - Serial link management with a reader loop and auto-reconnect
//! - Reassembly of escape-delimited JSON status frames
//! - ASCII telemetry parsing and command serialization
//! - Glove state accumulation into immutable snapshots
//! - A rate-limited, serialized command sender
//!
//! ## Example
//!
//! ```rust,ignore
//! use hapticlink_core::prelude::*;
//!
//! let transport = SerialTransport::new(HapticLinkConfig::default());
//! if transport.connect() {
//!     let sub = transport.subscribe_state(|state: &GloveState| {
//!         println!("thumb: {:.2}", state.finger(Finger::Thumb).position);
//!     });
//!     transport.send_command(Command::Stream {
//!         target: StreamTarget::FingerPosition,
//!         start: true,
//!         raw: false,
//!     })?;
//!     // ...
//!     sub.unsubscribe();
//!     transport.disconnect();
//! }
//! ```

pub mod broadcast;
pub mod buffer;
pub mod calibration;
pub mod config;
pub mod dongle;
pub mod model;
pub mod protocol;
pub mod transport;
mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broadcast::{Subscribers, Subscription};
    pub use crate::buffer::ByteRing;
    pub use crate::calibration::{CalibrationStore, JsonCalibrationStore};
    pub use crate::config::HapticLinkConfig;
    pub use crate::dongle::{DeviceStatus, Dongle, FrameScanner, Link, LinkState, PortInfo};
    pub use crate::model::{
        CalibrationData, Finger, FingerCalibration, FingerState, GloveState, ImuState,
    };
    pub use crate::protocol::{
        AsciiProtocol, CalibrationAction, Command, EnableTarget, PidGains, Protocol, SideFilter,
        StateAccumulator, StateUpdate, StreamTarget, UpdateKind,
    };
    pub use crate::transport::{SerialTransport, Transport, TransportError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
