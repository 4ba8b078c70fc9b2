//! Scripted in-memory dongle shared by the integration tests

#![allow(dead_code)]

use hapticlink_core::config::{HapticLinkConfig, SerialSettings, DONGLE_PRODUCT_ID, DONGLE_VENDOR_ID};
use hapticlink_core::dongle::{
    DeviceFinder, DiscoveryError, LinkError, LinkPort, PortInfo, PortOpener,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const PORT_NAME: &str = "/dev/ttyACM7";

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("hapticlink_core=debug")
        .try_init();
}

/// Config with short timings suited to tests
pub fn test_config() -> HapticLinkConfig {
    let mut config = HapticLinkConfig::default();
    config.serial.reconnect_interval_ms = 20;
    config.status.poll_interval_ms = 50;
    config.transport.min_send_interval_ms = 10;
    config.transport.command_poll_ms = 50;
    config
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Status frame around `json` using the default markers
pub fn status_frame(json: &str) -> Vec<u8> {
    let mut frame = b"\xFF\x34[STATUS_RESPONSE]".to_vec();
    frame.extend_from_slice(json.as_bytes());
    frame.extend_from_slice(b"\xFF\x34");
    frame
}

/// One write call seen by the device
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

/// In-memory dongle acting as both the port finder and the port opener
///
/// Unplugging bumps a generation counter; every port opened under an older
/// generation fails its next read or write, like a real unplugged device.
pub struct ScriptedDevice {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    writes: Mutex<Vec<WriteRecord>>,
    available: AtomicBool,
    fail_writes: AtomicBool,
    generation: AtomicU64,
    opens: AtomicUsize,
    open_delay_ms: AtomicU64,
}

impl ScriptedDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inbound: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            opens: AtomicUsize::new(0),
            open_delay_ms: AtomicU64::new(0),
        })
    }

    /// Queue bytes for the next read
    pub fn feed(&self, bytes: &[u8]) {
        self.inbound.lock().push_back(bytes.to_vec());
    }

    pub fn unplug(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn plug(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every open block for `delay` first
    pub fn set_open_delay(&self, delay: Duration) {
        self.open_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Written payloads as text, excluding status request tokens
    pub fn written_lines(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.bytes != b"@@@[STATUS]@@@")
            .map(|w| String::from_utf8_lossy(&w.bytes).into_owned())
            .collect()
    }

    /// Backends for `with_backends` constructors
    pub fn backends(self: &Arc<Self>) -> (Arc<dyn DeviceFinder>, Arc<dyn PortOpener>) {
        (Arc::clone(self) as Arc<dyn DeviceFinder>, Arc::new(ScriptedOpener(Arc::clone(self))))
    }

    pub fn port_info() -> PortInfo {
        PortInfo {
            name: PORT_NAME.to_string(),
            vid: Some(DONGLE_VENDOR_ID),
            pid: Some(DONGLE_PRODUCT_ID),
            manufacturer: Some("HapticLink".to_string()),
            product: Some("Haptic Glove Dongle".to_string()),
            serial_number: Some("HG-0001".to_string()),
        }
    }
}

impl DeviceFinder for ScriptedDevice {
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(vec![Self::port_info()])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Opens ports onto a [`ScriptedDevice`]
pub struct ScriptedOpener(pub Arc<ScriptedDevice>);

impl PortOpener for ScriptedOpener {
    fn open(&self, port: &str, _settings: &SerialSettings) -> Result<Box<dyn LinkPort>, LinkError> {
        let device = &self.0;
        let delay = device.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if !device.available.load(Ordering::SeqCst) {
            return Err(LinkError::Open {
                port: port.to_string(),
                reason: "device not present".to_string(),
            });
        }
        device.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPort {
            device: Arc::clone(device),
            generation: device.generation.load(Ordering::SeqCst),
        }))
    }
}

/// Port handle onto a [`ScriptedDevice`]
pub struct ScriptedPort {
    device: Arc<ScriptedDevice>,
    generation: u64,
}

impl ScriptedPort {
    fn check_present(&self) -> io::Result<()> {
        if self.device.generation.load(Ordering::SeqCst) != self.generation {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(())
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_present()?;
        let next = self.device.inbound.lock().pop_front();
        match next {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    self.device.inbound.lock().push_front(rest);
                }
                Ok(n)
            }
            None => {
                thread::sleep(Duration::from_millis(2));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_present()?;
        if self.device.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        self.device.writes.lock().push(WriteRecord {
            at: Instant::now(),
            bytes: buf.to_vec(),
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkPort for ScriptedPort {
    fn clear_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn LinkPort>> {
        Ok(Box::new(ScriptedPort {
            device: Arc::clone(&self.device),
            generation: self.generation,
        }))
    }
}
