//! Dongle facade
//!
//! [`Dongle`] bundles the link, the status scanner and a line buffer behind
//! a pull interface: callers read buffered bytes or lines instead of
//! registering data callbacks.

use std::sync::Arc;

use super::discovery::{DeviceFinder, SystemDeviceFinder};
use super::error::LinkError;
use super::link::Link;
use super::port::{PortOpener, SystemPortOpener};
use super::scanner::FrameScanner;
use super::status::DeviceStatus;
use crate::broadcast::Subscription;
use crate::buffer::ByteRing;
use crate::config::HapticLinkConfig;

/// High-level handle to the glove dongle
pub struct Dongle {
    config: HapticLinkConfig,
    link: Link,
    scanner: FrameScanner,
    lines: Arc<ByteRing>,
    line_sink: Subscription,
}

impl Dongle {
    /// Dongle using OS discovery and real serial ports
    pub fn new(config: HapticLinkConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(SystemDeviceFinder),
            Arc::new(SystemPortOpener),
        )
    }

    /// Dongle with explicit discovery and port backends
    pub fn with_backends(
        config: HapticLinkConfig,
        finder: Arc<dyn DeviceFinder>,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        let link = Link::with_backends(&config, finder, opener);
        let scanner = FrameScanner::new(link.clone(), config.status.clone());
        let lines = Arc::new(ByteRing::new(config.transport.line_buffer_capacity));

        let sink = Arc::clone(&lines);
        let line_sink = link.subscribe_data(move |chunk: &[u8]| sink.write(chunk));

        Self {
            config,
            link,
            scanner,
            lines,
            line_sink,
        }
    }

    /// Connect, optionally arming auto-reconnect and status monitoring
    ///
    /// Returns whether the first attempt succeeded. Auto-reconnect and the
    /// status monitor are set up either way, so a dongle plugged in later is
    /// picked up and polled.
    pub fn connect(&self, autoreconnect: bool, monitor_status: bool) -> bool {
        let connected = self.link.connect();
        self.arm(autoreconnect, monitor_status);
        connected
    }

    /// Like [`Dongle::connect`] but reports why the first attempt failed
    pub fn try_connect(&self, autoreconnect: bool, monitor_status: bool) -> Result<(), LinkError> {
        let result = self.link.try_connect();
        self.arm(autoreconnect, monitor_status);
        result
    }

    fn arm(&self, autoreconnect: bool, monitor_status: bool) {
        if monitor_status {
            if let Err(e) = self.scanner.start(self.config.status.poll_interval()) {
                tracing::error!("Failed to start status monitor: {}", e);
            }
        }
        self.link.set_autoreconnect(autoreconnect);
    }

    /// Stop reconnecting and monitoring, then close the link
    pub fn disconnect(&self) {
        self.link.set_autoreconnect(false);
        self.scanner.stop();
        self.link.disconnect();
    }

    /// Remove up to `n` buffered bytes
    pub fn read(&self, n: usize) -> Vec<u8> {
        self.lines.read(n)
    }

    /// Remove all buffered bytes
    pub fn read_all(&self) -> Vec<u8> {
        self.lines.read_all()
    }

    /// Remove one buffered line including its `\n`, or return empty
    pub fn read_line(&self) -> Vec<u8> {
        self.lines.read_line()
    }

    /// Write raw bytes
    pub fn write(&self, data: &[u8]) -> bool {
        self.link.write(data)
    }

    /// Write a line, appending `\n` if missing
    pub fn write_line(&self, line: &[u8]) -> bool {
        if line.ends_with(b"\n") {
            self.link.write(line)
        } else {
            let mut framed = Vec::with_capacity(line.len() + 1);
            framed.extend_from_slice(line);
            framed.push(b'\n');
            self.link.write(&framed)
        }
    }

    /// Whether the USB link is open
    pub fn is_dongle_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Whether the glove's radio link is up, per the latest status
    pub fn is_glove_connected(&self) -> bool {
        self.is_dongle_connected()
            && self
                .scanner
                .latest_status()
                .is_some_and(|s| s.bluetooth_connected)
    }

    /// Whether commands can reach the glove
    pub fn is_ready(&self) -> bool {
        self.is_dongle_connected() && self.is_glove_connected()
    }

    /// Whether no status has arrived recently
    pub fn is_status_stale(&self) -> bool {
        self.scanner
            .latest_status()
            .map_or(true, |s| s.is_stale())
    }

    /// Latest status, or a placeholder reflecting the USB link state
    pub fn status(&self) -> DeviceStatus {
        match self.scanner.latest_status() {
            Some(status) => status,
            None if self.is_dongle_connected() => DeviceStatus::usb_only(),
            None => DeviceStatus::disconnected(),
        }
    }

    /// Ask the dongle for a status frame now
    pub fn request_status(&self) -> bool {
        self.scanner.request_status()
    }

    /// Bytes waiting in the line buffer
    pub fn buffer_size(&self) -> usize {
        self.lines.len()
    }

    /// Receive each parsed status
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.scanner.subscribe_status(callback)
    }

    /// Configuration this dongle was built with
    pub fn config(&self) -> &HapticLinkConfig {
        &self.config
    }

    /// Underlying link
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Underlying status scanner
    pub fn scanner(&self) -> &FrameScanner {
        &self.scanner
    }
}

impl Drop for Dongle {
    fn drop(&mut self) {
        self.disconnect();
        self.line_sink.unsubscribe();
    }
}
