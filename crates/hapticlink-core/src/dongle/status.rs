//! Dongle status record
//!
//! The dongle answers a status request with a JSON object wrapped in escape
//! markers. [`parse_status_payload`] turns the bytes between the markers into
//! a [`DeviceStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Age after which a status is considered stale
pub const STATUS_STALE_AFTER: Duration = Duration::from_secs(2);

/// Errors decoding a status payload
#[derive(Error, Debug)]
pub enum StatusParseError {
    /// Nothing between the markers
    #[error("Empty status payload")]
    Empty,

    /// Payload is not status JSON
    #[error("Invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire shape of the status JSON; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusPayload {
    device: Option<String>,
    version: Option<String>,
    uptime_ms: u64,
    usb_present: bool,
    usb_serial_connected: bool,
    bt_connected: bool,
    nus_subscribed: bool,
    bt_mtu: u32,
    max_payload: u32,
    usb_rx_bps: u64,
    ble_rx_bps: u64,
    led_mode: Option<String>,
}

/// Immutable snapshot of dongle and radio health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// When the host received this status
    pub captured_at: DateTime<Utc>,
    /// Device identifier reported by the dongle
    pub device: Option<String>,
    /// Dongle firmware version
    pub firmware_version: Option<String>,
    /// Dongle uptime in milliseconds
    pub uptime_ms: u64,
    /// USB VBUS detected
    pub usb_present: bool,
    /// USB CDC serial session open
    pub usb_serial_connected: bool,
    /// Radio link to the glove established
    pub bluetooth_connected: bool,
    /// UART service notifications subscribed
    pub nus_subscribed: bool,
    /// Negotiated radio MTU
    pub bt_mtu: u32,
    /// Largest radio payload
    pub max_payload: u32,
    /// Inbound USB bytes per second
    pub usb_rx_bps: u64,
    /// Inbound radio bytes per second
    pub ble_rx_bps: u64,
    /// Current LED pattern
    pub led_mode: Option<String>,
    /// Payload as received
    pub raw: Value,
}

impl DeviceStatus {
    /// Build a status from a decoded JSON object, stamped now
    ///
    /// Unknown fields are ignored and missing ones take null/false/zero.
    pub fn from_json(raw: Value) -> Result<Self, serde_json::Error> {
        let payload: StatusPayload = serde_json::from_value(raw.clone())?;
        Ok(Self {
            captured_at: Utc::now(),
            device: payload.device,
            firmware_version: payload.version,
            uptime_ms: payload.uptime_ms,
            usb_present: payload.usb_present,
            usb_serial_connected: payload.usb_serial_connected,
            bluetooth_connected: payload.bt_connected,
            nus_subscribed: payload.nus_subscribed,
            bt_mtu: payload.bt_mtu,
            max_payload: payload.max_payload,
            usb_rx_bps: payload.usb_rx_bps,
            ble_rx_bps: payload.ble_rx_bps,
            led_mode: payload.led_mode,
            raw,
        })
    }

    /// Placeholder for a dongle that is not attached
    pub fn disconnected() -> Self {
        Self {
            captured_at: Utc::now(),
            device: None,
            firmware_version: None,
            uptime_ms: 0,
            usb_present: false,
            usb_serial_connected: false,
            bluetooth_connected: false,
            nus_subscribed: false,
            bt_mtu: 0,
            max_payload: 0,
            usb_rx_bps: 0,
            ble_rx_bps: 0,
            led_mode: None,
            raw: Value::Null,
        }
    }

    /// Placeholder for an attached dongle that has not reported yet
    pub fn usb_only() -> Self {
        Self {
            usb_present: true,
            usb_serial_connected: true,
            ..Self::disconnected()
        }
    }

    /// Alias for `usb_present`
    pub fn dongle_connected(&self) -> bool {
        self.usb_present
    }

    /// Dongle attached and radio link to the glove up
    pub fn glove_reachable(&self) -> bool {
        self.usb_present && self.bluetooth_connected
    }

    /// Time since this status was captured
    pub fn age(&self) -> Duration {
        (Utc::now() - self.captured_at).to_std().unwrap_or_default()
    }

    /// Whether the status is older than [`STATUS_STALE_AFTER`]
    pub fn is_stale(&self) -> bool {
        self.age() > STATUS_STALE_AFTER
    }
}

/// Decode the bytes between the status markers
pub fn parse_status_payload(payload: &[u8]) -> Result<DeviceStatus, StatusParseError> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.is_empty() {
        return Err(StatusParseError::Empty);
    }
    let raw: Value = serde_json::from_str(text)?;
    Ok(DeviceStatus::from_json(raw)?)
}
