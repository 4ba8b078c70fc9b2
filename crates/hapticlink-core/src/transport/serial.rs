//! Serial transport
//!
//! [`SerialTransport`] runs two loops on top of a [`Dongle`]:
//! - the reader pulls telemetry lines, parses them and publishes snapshots
//! - the sender drains the command queue, spacing writes by a minimum
//!   interval

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use super::{StateCallback, Transport, TransportError};
use crate::broadcast::{Subscribers, Subscription};
use crate::config::{HapticLinkConfig, TransportSettings};
use crate::dongle::{DeviceStatus, Dongle, LinkError};
use crate::model::{CalibrationData, GloveState};
use crate::protocol::{AsciiProtocol, Command, Protocol, StateAccumulator};
use crate::worker::{StopSignal, Worker};

struct Shared {
    dongle: Dongle,
    protocol: Box<dyn Protocol>,
    settings: TransportSettings,
    state: Mutex<StateAccumulator>,
    latest: watch::Sender<GloveState>,
    subscribers: Subscribers<GloveState>,
    commands: Mutex<Option<Sender<Command>>>,
}

impl Shared {
    /// Mutate the accumulator and publish the resulting snapshot
    fn update(&self, change: impl FnOnce(&mut StateAccumulator)) {
        change(&mut self.state.lock());
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.state.lock().snapshot();
        self.latest.send_replace(snapshot.clone());
        self.subscribers.publish(&snapshot);
    }

    /// Follow the glove's radio link as reported by the dongle
    fn sync_connection(&self) {
        let reachable = self.dongle.is_glove_connected();
        let changed = {
            let mut state = self.state.lock();
            if state.is_connected() != reachable {
                state.set_connected(reachable);
                true
            } else {
                false
            }
        };
        if changed {
            tracing::info!(connected = reachable, "Glove connection changed");
            self.publish();
        }
    }
}

struct Loops {
    reader: Worker,
    sender: Worker,
}

/// Glove transport over the USB dongle
pub struct SerialTransport {
    shared: Arc<Shared>,
    loops: Mutex<Option<Loops>>,
}

impl SerialTransport {
    /// Transport over a dongle found through OS discovery
    pub fn new(config: HapticLinkConfig) -> Self {
        Self::with_dongle(Dongle::new(config), Box::new(AsciiProtocol))
    }

    /// Transport over an existing dongle with the given protocol
    pub fn with_dongle(dongle: Dongle, protocol: Box<dyn Protocol>) -> Self {
        let settings = dongle.config().transport.clone();
        let state = StateAccumulator::new();
        let (latest, _) = watch::channel(state.snapshot());
        Self {
            shared: Arc::new(Shared {
                dongle,
                protocol,
                settings,
                state: Mutex::new(state),
                latest,
                subscribers: Subscribers::new("glove-state"),
                commands: Mutex::new(None),
            }),
            loops: Mutex::new(None),
        }
    }

    /// Connect the dongle and start the reader and sender loops
    ///
    /// Connecting while connected succeeds without doing anything. On
    /// failure nothing is left running.
    pub fn try_connect(&self) -> Result<(), TransportError> {
        {
            let mut loops = self.loops.lock();
            if loops.is_some() {
                return Ok(());
            }

            let settings = &self.shared.settings;
            let dongle = &self.shared.dongle;
            if let Err(e) = dongle.try_connect(settings.autoreconnect, settings.monitor_status) {
                dongle.disconnect();
                return Err(e.into());
            }
            self.shared.state.lock().set_connected(true);

            match self.start_loops() {
                Ok(started) => *loops = Some(started),
                Err(e) => {
                    *self.shared.commands.lock() = None;
                    dongle.disconnect();
                    self.shared.state.lock().set_connected(false);
                    return Err(e.into());
                }
            }
        }

        tracing::info!(protocol = self.shared.protocol.name(), "Transport connected");
        self.shared.publish();
        Ok(())
    }

    fn start_loops(&self) -> Result<Loops, LinkError> {
        let (tx, rx) = channel::unbounded();
        *self.shared.commands.lock() = Some(tx);

        let shared = Arc::clone(&self.shared);
        let reader = Worker::spawn("hapticlink-transport-reader", move |stop| {
            reader_loop(shared, stop)
        })
        .map_err(LinkError::Spawn)?;

        let shared = Arc::clone(&self.shared);
        let sender = match Worker::spawn("hapticlink-transport-sender", move |stop| {
            sender_loop(shared, rx, stop)
        }) {
            Ok(sender) => sender,
            Err(e) => {
                reader.stop(self.shared.dongle.config().serial.join_timeout());
                return Err(LinkError::Spawn(e));
            }
        };

        Ok(Loops { reader, sender })
    }

    /// Connect; failures are logged
    pub fn connect(&self) -> bool {
        match self.try_connect() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Transport connect failed: {}", e);
                false
            }
        }
    }

    /// Stop both loops, close the dongle and publish a final snapshot
    ///
    /// Commands already queued keep being sent for up to the join bound;
    /// whatever is still queued after that is discarded, never written to a
    /// later session.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut loops = self.loops.lock();
            let dongle = &self.shared.dongle;
            let join_timeout = dongle.config().serial.join_timeout();

            dongle.link().set_autoreconnect(false);
            dongle.scanner().stop();
            self.shared.commands.lock().take();

            let taken = loops.take();
            if let Some(loops) = &taken {
                loops.reader.signal_stop();
                if !loops.sender.join(join_timeout) {
                    loops.sender.stop(join_timeout);
                }
                loops.reader.stop(join_timeout);
            }

            dongle.disconnect();
            self.shared.state.lock().set_connected(false);
            taken.is_some()
        };

        if was_connected {
            tracing::info!("Transport disconnected");
            self.shared.publish();
        }
    }

    /// Whether the loops are running and the dongle link is open
    pub fn is_connected(&self) -> bool {
        self.loops.lock().is_some() && self.shared.dongle.is_dongle_connected()
    }

    /// Receive every published snapshot
    ///
    /// The current snapshot is delivered to `callback` before this returns.
    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&GloveState) + Send + Sync + 'static,
    {
        let current = self.snapshot();
        self.shared.subscribers.subscribe_with(&current, callback)
    }

    /// Queue a command
    pub fn send_command(&self, command: Command) -> Result<(), TransportError> {
        let commands = self.shared.commands.lock();
        let tx = commands.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(command).map_err(|_| TransportError::NotConnected)
    }

    /// Current glove state
    pub fn snapshot(&self) -> GloveState {
        self.shared.state.lock().snapshot()
    }

    /// Receiver that always holds the last published snapshot
    pub fn watch_state(&self) -> watch::Receiver<GloveState> {
        self.shared.latest.subscribe()
    }

    /// Calibration windows currently tracked for each finger
    pub fn capture_calibration(&self) -> CalibrationData {
        self.shared.state.lock().capture_calibration()
    }

    /// Latest dongle status
    pub fn status(&self) -> DeviceStatus {
        self.shared.dongle.status()
    }

    /// The underlying dongle
    pub fn dongle(&self) -> &Dongle {
        &self.shared.dongle
    }
}

impl Transport for SerialTransport {
    fn connect(&self) -> bool {
        SerialTransport::connect(self)
    }

    fn disconnect(&self) {
        SerialTransport::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        SerialTransport::is_connected(self)
    }

    fn subscribe_state(&self, callback: StateCallback) -> Subscription {
        SerialTransport::subscribe_state(self, move |state: &GloveState| callback(state))
    }

    fn send_command(&self, command: Command) -> Result<(), TransportError> {
        SerialTransport::send_command(self, command)
    }

    fn snapshot(&self) -> GloveState {
        SerialTransport::snapshot(self)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(shared: Arc<Shared>, stop: StopSignal) {
    let backoff = shared.settings.idle_backoff();
    while !stop.is_stopped() {
        shared.sync_connection();

        let line = shared.dongle.read_line();
        if line.is_empty() {
            if stop.wait(backoff) {
                break;
            }
            continue;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match shared.protocol.parse_line(text) {
            Some(update) => shared.update(|state| state.apply(&update)),
            None => tracing::trace!(line = text, "Ignoring line"),
        }
    }
    tracing::debug!("Transport reader exited");
}

fn sender_loop(shared: Arc<Shared>, commands: Receiver<Command>, stop: StopSignal) {
    let min_interval = shared.settings.min_send_interval();
    let poll = shared.settings.command_poll();
    let mut last_send: Option<Instant> = None;

    loop {
        let command = match commands.recv_timeout(poll) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if stop.is_stopped() {
            discard_queued(&commands, 1);
            break;
        }

        if let Some(last) = last_send {
            let elapsed = last.elapsed();
            if elapsed < min_interval && stop.wait(min_interval - elapsed) {
                discard_queued(&commands, 1);
                break;
            }
        }

        let bytes = shared.protocol.encode_command(&command);
        if bytes.is_empty() {
            tracing::debug!(command = command.name(), "Command encodes to nothing, skipped");
            continue;
        }

        if shared.dongle.write(&bytes) {
            tracing::debug!(command = command.name(), bytes = bytes.len(), "Command sent");
            shared.update(|state| state.apply_command(&command));
        } else {
            tracing::warn!(command = command.name(), "Command write failed");
        }
        last_send = Some(Instant::now());
    }
    tracing::debug!("Transport sender exited");
}

/// Drop everything left in a stopped sender's queue
fn discard_queued(commands: &Receiver<Command>, held: usize) {
    let dropped = held + commands.try_iter().count();
    tracing::warn!(dropped, "Discarding commands queued before disconnect");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dongle::{DeviceFinder, DiscoveryError, PortInfo, SystemPortOpener};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoPorts;

    impl DeviceFinder for NoPorts {
        fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    fn transport() -> SerialTransport {
        let dongle = Dongle::with_backends(
            HapticLinkConfig::default(),
            Arc::new(NoPorts),
            Arc::new(SystemPortOpener),
        );
        SerialTransport::with_dongle(dongle, Box::new(AsciiProtocol))
    }

    #[test]
    fn test_send_command_requires_connection() {
        let transport = transport();
        assert!(matches!(
            transport.send_command(Command::Restart),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_failed_connect_leaves_nothing_running() {
        let transport = transport();
        assert!(matches!(
            transport.try_connect(),
            Err(TransportError::Link(LinkError::Discovery(DiscoveryError::NotFound)))
        ));
        assert!(!transport.is_connected());
        assert!(!transport.dongle().link().autoreconnect());
        assert!(!transport.dongle().scanner().is_running());
        assert!(!transport.snapshot().connected);
    }

    #[test]
    fn test_subscribe_delivers_current_snapshot() {
        let transport = transport();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sub = transport.subscribe_state(move |state: &GloveState| {
            assert!(!state.connected);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        sub.unsubscribe();
    }

    #[test]
    fn test_disconnect_when_never_connected() {
        let transport = transport();
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }
}
