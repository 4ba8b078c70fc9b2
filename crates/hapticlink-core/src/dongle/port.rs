//! Serial port seam
//!
//! The link talks to the OS serial handle only through [`LinkPort`] and
//! obtains it through a [`PortOpener`], so tests can substitute scripted
//! in-memory ports.

use serialport::SerialPort;
use std::io::{self, Read, Write};

use super::error::LinkError;
use crate::config::SerialSettings;

/// An open byte channel to the dongle
///
/// Reads must return within a bounded time; a timeout is reported as
/// `io::ErrorKind::TimedOut` (or `WouldBlock`) rather than blocking forever.
pub trait LinkPort: Read + Write + Send {
    /// Discard pending input and output
    fn clear_buffers(&mut self) -> io::Result<()>;

    /// Open a second handle to the same port for concurrent writing
    fn try_clone(&self) -> io::Result<Box<dyn LinkPort>>;
}

/// Opens [`LinkPort`]s by name
pub trait PortOpener: Send + Sync {
    /// Open `port` with the given settings
    fn open(&self, port: &str, settings: &SerialSettings) -> Result<Box<dyn LinkPort>, LinkError>;
}

/// Serial port wrapper implementing [`LinkPort`]
pub struct SerialLinkPort {
    port: Box<dyn SerialPort>,
}

impl SerialLinkPort {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialLinkPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLinkPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl LinkPort for SerialLinkPort {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn LinkPort>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialLinkPort::new(port_clone)))
    }
}

/// Opens real serial ports, 8N1 without flow control
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, port: &str, settings: &SerialSettings) -> Result<Box<dyn LinkPort>, LinkError> {
        let open_err = |e: serialport::Error| LinkError::Open {
            port: port.to_string(),
            reason: e.to_string(),
        };

        let handle = serialport::new(port, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout())
            .open()
            .map_err(open_err)?;

        Ok(Box::new(SerialLinkPort::new(handle)))
    }
}
