//! Dongle errors

use thiserror::Error;

use super::discovery::PortInfo;

/// Errors returned by device discovery
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// No port matched
    #[error("No matching dongle found")]
    NotFound,

    /// More than one port matched
    #[error("Multiple matching dongles found: {}", port_names(.0))]
    Ambiguous(Vec<PortInfo>),

    /// The OS port listing failed
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),
}

fn port_names(ports: &[PortInfo]) -> String {
    ports
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while opening or using the serial link
#[derive(Error, Debug)]
pub enum LinkError {
    /// Port discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The port could not be opened
    #[error("Failed to open {port}: {reason}")]
    Open {
        /// Port name
        port: String,
        /// Backend error text
        reason: String,
    },

    /// No port is open
    #[error("Not connected to dongle")]
    NotConnected,

    /// Read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background thread could not be started
    #[error("Failed to spawn background thread: {0}")]
    Spawn(std::io::Error),
}
