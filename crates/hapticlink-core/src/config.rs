//! Link configuration
//!
//! Every constant the link layer depends on (device identifiers, wire
//! literals, timing and buffer sizes) lives here and is handed explicitly to
//! the components that need it. The whole tree is serde-loadable so a host
//! application can keep it in a JSON file next to its other settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// USB vendor ID of the glove dongle
pub const DONGLE_VENDOR_ID: u16 = 0x5FFE;

/// USB product ID of the glove dongle
pub const DONGLE_PRODUCT_ID: u16 = 0x1000;

/// Substring expected in the dongle's USB product string
pub const DONGLE_PRODUCT_NAME: &str = "Haptic Glove Dongle";

/// Default baud rate of the dongle's CDC interface
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Errors raised while loading or saving configuration files
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid config JSON
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticLinkConfig {
    /// Which serial device to use
    pub device: DeviceMatch,
    /// Serial port settings
    pub serial: SerialSettings,
    /// Status frame scanning and polling
    pub status: StatusSettings,
    /// Telemetry and command transport
    pub transport: TransportSettings,
}

impl HapticLinkConfig {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Device selection criteria
///
/// When `port` is set it is used directly and discovery is skipped. All
/// other criteria are AND-combined; unset criteria are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMatch {
    /// Explicit serial port path (e.g. "/dev/ttyACM0" or "COM3")
    pub port: Option<String>,
    /// USB vendor ID
    pub vendor_id: Option<u16>,
    /// USB product ID
    pub product_id: Option<u16>,
    /// Case-insensitive substring of the USB product string
    pub product_substring: Option<String>,
    /// Prefix of the USB serial number
    pub serial_prefix: Option<String>,
}

impl Default for DeviceMatch {
    fn default() -> Self {
        Self {
            port: None,
            vendor_id: Some(DONGLE_VENDOR_ID),
            product_id: Some(DONGLE_PRODUCT_ID),
            product_substring: Some(DONGLE_PRODUCT_NAME.to_string()),
            serial_prefix: None,
        }
    }
}

impl DeviceMatch {
    /// Criteria that select one explicit port and nothing else
    pub fn port(name: impl Into<String>) -> Self {
        Self {
            port: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds; bounds how long the reader blocks
    pub read_timeout_ms: u64,
    /// Maximum bytes per read
    pub chunk_size: usize,
    /// Poll cadence of the auto-reconnect loop in milliseconds
    pub reconnect_interval_ms: u64,
    /// Bound on joining background loops during shutdown
    pub join_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 100,
            chunk_size: 4096,
            reconnect_interval_ms: 1000,
            join_timeout_ms: 1000,
        }
    }
}

impl SerialSettings {
    /// Per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Pause between availability checks while reconnecting
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Bound on waiting for a background loop to exit
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Wire literals of the dongle status protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameMarkers {
    /// Token written to ask the dongle for a status frame
    pub request: Vec<u8>,
    /// Bytes that open a status frame
    pub start: Vec<u8>,
    /// Bytes that close a status frame
    pub end: Vec<u8>,
}

impl Default for FrameMarkers {
    fn default() -> Self {
        Self {
            request: b"@@@[STATUS]@@@".to_vec(),
            start: b"\xFF\x34[STATUS_RESPONSE]".to_vec(),
            end: b"\xFF\x34".to_vec(),
        }
    }
}

/// Status frame scanning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// Frame delimiters and request token
    pub markers: FrameMarkers,
    /// Ceiling of the reassembly buffer in bytes
    pub buffer_ceiling: usize,
    /// Depth of the inbound chunk queue; the oldest chunk is dropped when full
    pub queue_depth: usize,
    /// Interval between automatic status requests in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            markers: FrameMarkers::default(),
            buffer_ceiling: 64 * 1024,
            queue_depth: 1000,
            poll_interval_ms: 200,
        }
    }
}

impl StatusSettings {
    /// Interval between status requests
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Telemetry/command transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Capacity of the telemetry line buffer in bytes
    pub line_buffer_capacity: usize,
    /// Minimum spacing between two outbound commands in milliseconds
    pub min_send_interval_ms: u64,
    /// Reader backoff when no complete line is buffered, in milliseconds
    pub idle_backoff_ms: u64,
    /// Sender wake-up period used as a shutdown checkpoint, in milliseconds
    pub command_poll_ms: u64,
    /// Reconnect automatically after the link drops
    pub autoreconnect: bool,
    /// Poll and scan status frames while connected
    pub monitor_status: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            line_buffer_capacity: 4 * 1024 * 1024,
            min_send_interval_ms: 10,
            idle_backoff_ms: 1,
            command_poll_ms: 1000,
            autoreconnect: true,
            monitor_status: true,
        }
    }
}

impl TransportSettings {
    /// Minimum spacing between commands
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    /// Reader sleep when no line is buffered
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Sender wake-up period
    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device_match() {
        let m = DeviceMatch::default();
        assert_eq!(m.vendor_id, Some(0x5FFE));
        assert_eq!(m.product_id, Some(0x1000));
        assert_eq!(m.product_substring.as_deref(), Some("Haptic Glove Dongle"));
        assert!(m.port.is_none());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "serial": { "baud_rate": 115200 }, "transport": { "autoreconnect": false } }"#;
        let config: HapticLinkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.chunk_size, 4096);
        assert!(!config.transport.autoreconnect);
        assert_eq!(config.status, StatusSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.json");

        let mut config = HapticLinkConfig::default();
        config.device = DeviceMatch::port("/dev/ttyACM3");
        config.status.poll_interval_ms = 500;
        config.save(&path).unwrap();

        let loaded = HapticLinkConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
