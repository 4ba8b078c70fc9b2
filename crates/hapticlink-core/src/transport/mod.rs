//! Glove transport
//!
//! A transport turns the dongle link into a stream of [`GloveState`]
//! snapshots and accepts [`Command`]s to send to the glove.

pub mod serial;

pub use serial::SerialTransport;

use thiserror::Error;

use crate::broadcast::Subscription;
use crate::dongle::LinkError;
use crate::model::GloveState;
use crate::protocol::Command;

/// Errors returned by transports
#[derive(Error, Debug)]
pub enum TransportError {
    /// `connect` has not succeeded, or `disconnect` was called
    #[error("Transport is not connected")]
    NotConnected,

    /// The dongle link failed
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Boxed state callback, as taken by [`Transport::subscribe_state`]
pub type StateCallback = Box<dyn Fn(&GloveState) + Send + Sync>;

/// Connection to a glove
pub trait Transport: Send + Sync {
    /// Connect; failures are logged and reported as false
    fn connect(&self) -> bool;

    /// Disconnect; calling it when already disconnected is harmless
    fn disconnect(&self);

    /// Whether the transport is connected
    fn is_connected(&self) -> bool;

    /// Receive every published snapshot, starting with the current one
    fn subscribe_state(&self, callback: StateCallback) -> Subscription;

    /// Queue a command for sending
    fn send_command(&self, command: Command) -> Result<(), TransportError>;

    /// Current glove state
    fn snapshot(&self) -> GloveState;
}
