//! Glove Protocol
//!
//! Implements the glove's ASCII telemetry and command line protocol and the
//! state accumulated from it.

pub mod ascii;
pub mod commands;
pub mod parser;
pub mod serializer;
pub mod state;

pub use ascii::{AsciiProtocol, Protocol};
pub use commands::{
    CalibrationAction, Command, EnableTarget, PidGains, SideFilter, StreamTarget,
};
pub use parser::{parse_line, StateUpdate, UpdateKind};
pub use serializer::{encode_command, serialize_command};
pub use state::StateAccumulator;
