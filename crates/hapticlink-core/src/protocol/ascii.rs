//! Protocol abstraction
//!
//! The transport only needs to turn telemetry lines into updates and
//! commands into bytes. [`Protocol`] captures that; [`AsciiProtocol`] is the
//! line protocol spoken by current glove firmware.

use super::commands::Command;
use super::parser::{self, StateUpdate};
use super::serializer;

/// A glove wire protocol
pub trait Protocol: Send + Sync {
    /// Parse one received line
    fn parse_line(&self, line: &str) -> Option<StateUpdate>;

    /// Encode a command ready for writing, terminator included
    fn encode_command(&self, command: &Command) -> Vec<u8>;

    /// Protocol name for logging
    fn name(&self) -> &'static str;
}

/// ASCII line protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiProtocol;

impl Protocol for AsciiProtocol {
    fn parse_line(&self, line: &str) -> Option<StateUpdate> {
        parser::parse_line(line)
    }

    fn encode_command(&self, command: &Command) -> Vec<u8> {
        serializer::encode_command(command)
    }

    fn name(&self) -> &'static str {
        "ascii"
    }
}
