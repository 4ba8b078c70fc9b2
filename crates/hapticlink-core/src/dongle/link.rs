//! Serial link to the dongle
//!
//! [`Link`] owns the open port. A reader thread broadcasts every chunk it
//! reads to the data subscribers; an optional reconnect thread brings the
//! link back after the device disappears and reappears.

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::discovery::{DeviceFinder, SystemDeviceFinder};
use super::error::LinkError;
use super::port::{LinkPort, PortOpener, SystemPortOpener};
use crate::broadcast::{Subscribers, Subscription};
use crate::config::{DeviceMatch, HapticLinkConfig, SerialSettings};
use crate::worker::{StopSignal, Worker};

/// Connection state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No port open
    Disconnected,
    /// Opening the port
    Connecting,
    /// Port open and reader running
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// One open-port lifetime; the id lets a late error from an old reader be ignored
struct Session {
    id: u64,
    reader: Worker,
}

struct LinkShared {
    device: DeviceMatch,
    serial: SerialSettings,
    finder: Arc<dyn DeviceFinder>,
    opener: Arc<dyn PortOpener>,

    port_name: Mutex<Option<String>>,
    state: Mutex<LinkState>,
    writer: Mutex<Option<Box<dyn LinkPort>>>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    connect_lock: Mutex<()>,

    data_subscribers: Subscribers<[u8]>,

    autoreconnect: AtomicBool,
    reconnector: Mutex<Option<Worker>>,
}

/// Handle to the serial link; clones share the same port
#[derive(Clone)]
pub struct Link {
    shared: Arc<LinkShared>,
}

impl Link {
    /// Link using OS port discovery and real serial ports
    pub fn new(config: &HapticLinkConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(SystemDeviceFinder),
            Arc::new(SystemPortOpener),
        )
    }

    /// Link with explicit discovery and port backends
    pub fn with_backends(
        config: &HapticLinkConfig,
        finder: Arc<dyn DeviceFinder>,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        Self {
            shared: Arc::new(LinkShared {
                device: config.device.clone(),
                serial: config.serial.clone(),
                finder,
                opener,
                port_name: Mutex::new(config.device.port.clone()),
                state: Mutex::new(LinkState::Disconnected),
                writer: Mutex::new(None),
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
                connect_lock: Mutex::new(()),
                data_subscribers: Subscribers::new("link-data"),
                autoreconnect: AtomicBool::new(false),
                reconnector: Mutex::new(None),
            }),
        }
    }

    /// Open the port and start the reader; failures are logged
    pub fn connect(&self) -> bool {
        self.shared.connect()
    }

    /// Open the port and start the reader
    ///
    /// Connecting while already connected succeeds without reopening.
    pub fn try_connect(&self) -> Result<(), LinkError> {
        self.shared.try_connect()
    }

    /// Stop the reader and close the port
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Write all bytes and flush
    ///
    /// Returns false when not connected or when the write fails; a failed
    /// write drops the connection.
    pub fn write(&self, data: &[u8]) -> bool {
        self.shared.try_write(data).is_ok()
    }

    /// Like [`Link::write`] but reports why the write failed
    pub fn try_write(&self, data: &[u8]) -> Result<(), LinkError> {
        self.shared.try_write(data)
    }

    /// Receive every chunk read from the port, in arrival order
    pub fn subscribe_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.data_subscribers.subscribe(callback)
    }

    /// Enable or disable automatic reconnection
    pub fn set_autoreconnect(&self, enabled: bool) {
        self.shared.set_autoreconnect(enabled);
    }

    /// Whether automatic reconnection is enabled
    pub fn autoreconnect(&self) -> bool {
        self.shared.autoreconnect.load(Ordering::SeqCst)
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    /// Whether the port is open
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Whether the device is present, without opening it
    pub fn is_device_available(&self) -> bool {
        self.shared.is_device_available()
    }

    /// Port in use, or last resolved by discovery
    pub fn port_name(&self) -> Option<String> {
        self.shared.port_name.lock().clone()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("port", &self.port_name())
            .field("state", &self.state())
            .finish()
    }
}

impl LinkShared {
    fn connect(self: &Arc<Self>) -> bool {
        match self.try_connect() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dongle connect failed: {}", e);
                false
            }
        }
    }

    fn try_connect(self: &Arc<Self>) -> Result<(), LinkError> {
        let _guard = self.connect_lock.lock();
        self.connect_locked()
    }

    /// Reconnect attempt; gives up if reconnection was disabled meanwhile
    fn reconnect(self: &Arc<Self>, stop: &StopSignal) -> bool {
        let _guard = self.connect_lock.lock();
        if stop.is_stopped() || !self.autoreconnect.load(Ordering::SeqCst) {
            return false;
        }
        match self.connect_locked() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dongle reconnect failed: {}", e);
                false
            }
        }
    }

    fn connect_locked(self: &Arc<Self>) -> Result<(), LinkError> {
        if *self.state.lock() == LinkState::Connected {
            return Ok(());
        }

        *self.state.lock() = LinkState::Connecting;
        let result = self.open_session();
        if result.is_err() {
            *self.state.lock() = LinkState::Disconnected;
        }
        result
    }

    fn resolve_port(&self) -> Result<String, LinkError> {
        if let Some(port) = &self.device.port {
            return Ok(port.clone());
        }
        let found = self.finder.find_one(&self.device)?;
        tracing::debug!(
            port = %found.name,
            device = %found.device_id(),
            hwid = %found.hwid(),
            "Discovered dongle"
        );
        *self.port_name.lock() = Some(found.name.clone());
        Ok(found.name)
    }

    fn open_session(self: &Arc<Self>) -> Result<(), LinkError> {
        let port_name = self.resolve_port()?;
        let mut port = self.opener.open(&port_name, &self.serial)?;
        if let Err(e) = port.clear_buffers() {
            tracing::debug!(port = %port_name, "Failed to clear port buffers: {}", e);
        }
        let writer = port.try_clone()?;

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let chunk_size = self.serial.chunk_size.max(1);

        // The reader's error path locks `session`, so it cannot observe the
        // link before the new session is installed.
        let mut session = self.session.lock();
        let reader = Worker::spawn("hapticlink-link-reader", move |stop| {
            reader_loop(weak, id, port, chunk_size, stop)
        })
        .map_err(LinkError::Spawn)?;
        *session = Some(Session { id, reader });
        *self.writer.lock() = Some(writer);
        *self.state.lock() = LinkState::Connected;
        drop(session);

        tracing::info!(
            port = %port_name,
            baud = self.serial.baud_rate,
            session = id,
            "Connected to dongle"
        );
        Ok(())
    }

    fn disconnect(&self) {
        let _guard = self.connect_lock.lock();
        let taken = {
            let mut session = self.session.lock();
            let taken = session.take();
            self.writer.lock().take();
            *self.state.lock() = LinkState::Disconnected;
            taken
        };

        if let Some(session) = taken {
            session.reader.stop(self.serial.join_timeout());
            tracing::info!(session = session.id, "Disconnected from dongle");
        }
    }

    fn try_write(self: &Arc<Self>, data: &[u8]) -> Result<(), LinkError> {
        let session = self.session.lock().as_ref().map(|s| s.id);
        let result = {
            let mut writer = self.writer.lock();
            let port = writer.as_mut().ok_or(LinkError::NotConnected)?;
            port.write_all(data).and_then(|_| port.flush())
        };

        if let Err(e) = result {
            tracing::warn!(bytes = data.len(), "Dongle write failed: {}", e);
            if let Some(id) = session {
                self.handle_error(id);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the connection after an I/O failure in session `id`
    ///
    /// Runs on the reader thread or a writer's thread; never joins the reader.
    fn handle_error(self: &Arc<Self>, id: u64) {
        let taken = {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.id) != Some(id) {
                return;
            }
            let taken = session.take();
            self.writer.lock().take();
            *self.state.lock() = LinkState::Disconnected;
            taken
        };

        if let Some(session) = taken {
            session.reader.signal_stop();
        }
        tracing::warn!(session = id, "Dongle connection lost");

        if self.autoreconnect.load(Ordering::SeqCst) {
            self.ensure_reconnect();
        }
    }

    fn set_autoreconnect(self: &Arc<Self>, enabled: bool) {
        self.autoreconnect.store(enabled, Ordering::SeqCst);
        if enabled {
            if *self.state.lock() != LinkState::Connected {
                self.ensure_reconnect();
            }
        } else {
            let worker = self.reconnector.lock().take();
            if let Some(worker) = worker {
                worker.stop(self.serial.join_timeout());
            }
        }
    }

    fn ensure_reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnector.lock();
        if slot.as_ref().is_some_and(|w| w.is_running()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.serial.reconnect_interval();
        match Worker::spawn("hapticlink-reconnect", move |stop| {
            reconnect_loop(weak, interval, stop)
        }) {
            Ok(worker) => {
                tracing::debug!("Auto-reconnect armed");
                *slot = Some(worker);
            }
            Err(e) => tracing::error!("Failed to start reconnect loop: {}", e),
        }
    }

    fn is_device_available(&self) -> bool {
        self.finder
            .is_available(self.device.port.as_deref(), &self.device)
    }
}

fn reader_loop(
    link: Weak<LinkShared>,
    session: u64,
    mut port: Box<dyn LinkPort>,
    chunk_size: usize,
    stop: StopSignal,
) {
    let mut buf = vec![0u8; chunk_size];
    while !stop.is_stopped() {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                let Some(shared) = link.upgrade() else { break };
                tracing::trace!(bytes = n, "Read chunk");
                shared.data_subscribers.publish(&buf[..n]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                tracing::warn!(session, "Dongle read failed: {}", e);
                if let Some(shared) = link.upgrade() {
                    shared.handle_error(session);
                }
                break;
            }
        }
    }
    tracing::debug!(session, "Reader loop exited");
}

fn reconnect_loop(link: Weak<LinkShared>, interval: std::time::Duration, stop: StopSignal) {
    loop {
        {
            let Some(shared) = link.upgrade() else { return };
            if stop.is_stopped() || !shared.autoreconnect.load(Ordering::SeqCst) {
                return;
            }
            if *shared.state.lock() == LinkState::Connected {
                tracing::debug!("Reconnect loop exiting: connected");
                return;
            }
            if shared.is_device_available() {
                tracing::info!("Dongle available, reconnecting");
                if shared.reconnect(&stop) {
                    return;
                }
            }
        }
        if stop.wait(interval) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dongle::discovery::PortInfo;
    use crate::dongle::error::DiscoveryError;

    struct NoPorts;

    impl DeviceFinder for NoPorts {
        fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    struct RefuseOpen;

    impl PortOpener for RefuseOpen {
        fn open(
            &self,
            port: &str,
            _settings: &SerialSettings,
        ) -> Result<Box<dyn LinkPort>, LinkError> {
            Err(LinkError::Open {
                port: port.to_string(),
                reason: "permission denied".to_string(),
            })
        }
    }

    fn link() -> Link {
        Link::with_backends(
            &HapticLinkConfig::default(),
            Arc::new(NoPorts),
            Arc::new(RefuseOpen),
        )
    }

    #[test]
    fn test_initial_state() {
        let link = link();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.is_connected());
        assert!(!link.autoreconnect());
        assert_eq!(link.port_name(), None);
    }

    #[test]
    fn test_write_when_disconnected_is_noop() {
        let link = link();
        assert!(!link.write(b"!restart\n"));
        assert!(matches!(
            link.try_write(b"!restart\n"),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_without_device_reports_not_found() {
        let link = link();
        assert!(matches!(
            link.try_connect(),
            Err(LinkError::Discovery(DiscoveryError::NotFound))
        ));
        assert!(!link.connect());
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_open_failure_with_explicit_port() {
        let mut config = HapticLinkConfig::default();
        config.device = DeviceMatch::port("/dev/ttyACM7");
        let link = Link::with_backends(&config, Arc::new(NoPorts), Arc::new(RefuseOpen));

        match link.try_connect() {
            Err(LinkError::Open { port, .. }) => assert_eq!(port, "/dev/ttyACM7"),
            other => panic!("expected open failure, got {:?}", other),
        }
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.port_name().as_deref(), Some("/dev/ttyACM7"));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let link = link();
        link.disconnect();
        link.disconnect();
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
