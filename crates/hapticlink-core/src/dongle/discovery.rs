//! Dongle discovery
//!
//! Finds serial ports that belong to the glove dongle by USB vendor ID,
//! product ID, product string and serial number.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

use super::error::DiscoveryError;
use crate::config::DeviceMatch;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// A port known only by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Stable identifier for this device: the USB serial number if known,
    /// otherwise the port name
    pub fn device_id(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(&self.name)
    }

    /// Hardware ID string in `USB VID:PID=xxxx:xxxx SER=...` form
    pub fn hwid(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => {
                let mut s = format!("USB VID:PID={:04X}:{:04X}", vid, pid);
                if let Some(serial) = &self.serial_number {
                    s.push_str(" SER=");
                    s.push_str(serial);
                }
                s
            }
            _ => "n/a".to_string(),
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Whether `port` satisfies every criterion set in `criteria`
///
/// The explicit `port` field of the criteria is not consulted here.
pub fn matches(port: &PortInfo, criteria: &DeviceMatch) -> bool {
    if let Some(vid) = criteria.vendor_id {
        if port.vid != Some(vid) {
            return false;
        }
    }
    if let Some(pid) = criteria.product_id {
        if port.pid != Some(pid) {
            return false;
        }
    }
    if let Some(needle) = &criteria.product_substring {
        let needle = needle.to_lowercase();
        let found = port
            .product
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains(&needle));
        if !found {
            return false;
        }
    }
    if let Some(prefix) = &criteria.serial_prefix {
        let found = port
            .serial_number
            .as_deref()
            .is_some_and(|s| s.starts_with(prefix.as_str()));
        if !found {
            return false;
        }
    }
    true
}

/// Source of serial port listings
///
/// Only [`DeviceFinder::list_ports`] needs implementing; matching and
/// availability are derived from it.
pub trait DeviceFinder: Send + Sync {
    /// All serial ports currently present
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError>;

    /// All ports matching `criteria`
    fn find_all(&self, criteria: &DeviceMatch) -> Result<Vec<PortInfo>, DiscoveryError> {
        Ok(self
            .list_ports()?
            .into_iter()
            .filter(|p| matches(p, criteria))
            .collect())
    }

    /// Exactly one port matching `criteria`
    fn find_one(&self, criteria: &DeviceMatch) -> Result<PortInfo, DiscoveryError> {
        let mut found = self.find_all(criteria)?;
        match found.len() {
            0 => Err(DiscoveryError::NotFound),
            1 => Ok(found.remove(0)),
            _ => Err(DiscoveryError::Ambiguous(found)),
        }
    }

    /// Whether a device is present without opening it
    ///
    /// With `port` set, checks that this port is listed; otherwise checks
    /// that at least one port matches `criteria`.
    fn is_available(&self, port: Option<&str>, criteria: &DeviceMatch) -> bool {
        let listed = match self.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::debug!("Availability check failed: {}", e);
                return false;
            }
        };
        match port {
            Some(name) => listed.iter().any(|p| p.name == name),
            None => listed.iter().any(|p| matches(p, criteria)),
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// Discovery backed by the operating system's serial port enumeration
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDeviceFinder;

impl DeviceFinder for SystemDeviceFinder {
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        let mut map: HashMap<String, PortInfo> = HashMap::new();
        let available = serialport::available_ports()
            .map_err(|e| DiscoveryError::Enumeration(e.to_string()))?;
        for info in available {
            let p = PortInfo::from(info);
            map.entry(p.name.clone()).or_insert(p);
        }

        // Linux-only: CDC devices the enumeration API missed
        #[cfg(target_os = "linux")]
        if let Ok(entries) = fs::read_dir("/dev") {
            for entry in entries.flatten() {
                if let Some(fname) = entry.file_name().to_str() {
                    if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                        let full = format!("/dev/{}", fname);
                        map.entry(full.clone())
                            .or_insert_with(|| PortInfo::named(full));
                    }
                }
            }
        }

        let mut ports: Vec<PortInfo> = map.into_values().collect();
        ports.sort_by_key(|p| port_sort_key(&p.name));
        Ok(ports)
    }
}
