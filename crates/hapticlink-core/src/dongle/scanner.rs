//! Status frame scanner
//!
//! [`FrameScanner`] subscribes to the link's byte stream, queues chunks, and
//! a monitor thread reassembles status frames from them. The same thread
//! periodically writes the status request token while the link is up.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::error::LinkError;
use super::framing::FrameAssembler;
use super::link::Link;
use super::status::{parse_status_payload, DeviceStatus};
use crate::broadcast::{Subscribers, Subscription};
use crate::config::StatusSettings;
use crate::worker::{StopSignal, Worker};

/// Longest the monitor blocks waiting for a chunk
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on joining the monitor thread
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

struct ScannerInner {
    link: Link,
    settings: StatusSettings,
    chunk_tx: Sender<Vec<u8>>,
    chunk_rx: Receiver<Vec<u8>>,
    dropped: AtomicU64,
    assembler: Mutex<FrameAssembler>,
    latest: watch::Sender<Option<DeviceStatus>>,
    subscribers: Subscribers<DeviceStatus>,
}

/// Reassembles status frames from the link and tracks the latest status
pub struct FrameScanner {
    inner: Arc<ScannerInner>,
    monitor: Mutex<Option<Worker>>,
    link_subscription: Subscription,
}

impl FrameScanner {
    /// Create a scanner fed by `link`
    ///
    /// Chunks are queued from construction on; call [`FrameScanner::start`]
    /// to process them in the background or [`FrameScanner::process_pending`]
    /// to process them on the calling thread.
    pub fn new(link: Link, settings: StatusSettings) -> Self {
        let (chunk_tx, chunk_rx) = channel::bounded(settings.queue_depth.max(1));
        let (latest, _) = watch::channel(None);
        let inner = Arc::new(ScannerInner {
            link: link.clone(),
            assembler: Mutex::new(FrameAssembler::new(
                settings.markers.clone(),
                settings.buffer_ceiling,
            )),
            settings,
            chunk_tx,
            chunk_rx,
            dropped: AtomicU64::new(0),
            latest,
            subscribers: Subscribers::new("status"),
        });

        let weak: Weak<ScannerInner> = Arc::downgrade(&inner);
        let link_subscription = link.subscribe_data(move |chunk: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.enqueue(chunk);
            }
        });

        Self {
            inner,
            monitor: Mutex::new(None),
            link_subscription,
        }
    }

    /// Start the monitor thread, requesting status every `interval`
    ///
    /// Does nothing if it is already running.
    pub fn start(&self, interval: Duration) -> Result<(), LinkError> {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|w| w.is_running()) {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let rx = self.inner.chunk_rx.clone();
        let worker = Worker::spawn("hapticlink-status-monitor", move |stop| {
            monitor_loop(weak, rx, interval, stop)
        })
        .map_err(LinkError::Spawn)?;
        *monitor = Some(worker);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Status monitor started");
        Ok(())
    }

    /// Stop the monitor thread
    pub fn stop(&self) {
        let worker = self.monitor.lock().take();
        if let Some(worker) = worker {
            worker.stop(STOP_TIMEOUT);
            tracing::debug!("Status monitor stopped");
        }
    }

    /// Whether the monitor thread is running
    pub fn is_running(&self) -> bool {
        self.monitor.lock().as_ref().is_some_and(|w| w.is_running())
    }

    /// Process every queued chunk on the calling thread
    ///
    /// Returns the number of statuses emitted.
    pub fn process_pending(&self) -> usize {
        let mut emitted = 0;
        while let Ok(chunk) = self.inner.chunk_rx.try_recv() {
            emitted += self.inner.process_chunk(&chunk);
        }
        emitted
    }

    /// Feed a chunk as if it had been read from the link
    pub fn on_data(&self, chunk: &[u8]) {
        self.inner.enqueue(chunk);
    }

    /// Write the status request token now
    pub fn request_status(&self) -> bool {
        self.inner.request_status()
    }

    /// Most recent status, if any frame has been parsed
    pub fn latest_status(&self) -> Option<DeviceStatus> {
        self.inner.latest.borrow().clone()
    }

    /// Receiver that observes every latest-status replacement
    pub fn watch_status(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.inner.latest.subscribe()
    }

    /// Receive each parsed status
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    /// Bytes waiting in the reassembly buffer
    pub fn buffer_len(&self) -> usize {
        self.inner.assembler.lock().len()
    }

    /// Discard the reassembly buffer
    pub fn clear_buffer(&self) {
        self.inner.assembler.lock().clear();
    }

    /// Chunks dropped because the queue was full
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Chunks waiting to be processed
    pub fn queued_chunks(&self) -> usize {
        self.inner.chunk_rx.len()
    }

    /// The link this scanner listens to
    pub fn link(&self) -> &Link {
        &self.inner.link
    }
}

impl Drop for FrameScanner {
    fn drop(&mut self) {
        self.link_subscription.unsubscribe();
        self.stop();
    }
}

impl ScannerInner {
    /// Queue a chunk, dropping the oldest one when the queue is full
    fn enqueue(&self, chunk: &[u8]) {
        let mut item = chunk.to_vec();
        loop {
            match self.chunk_tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.chunk_rx.try_recv().is_ok() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped % 100 == 1 {
                            tracing::warn!(dropped, "Status chunk queue full, dropping oldest");
                        }
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Reassemble and publish; returns the number of statuses emitted
    fn process_chunk(&self, chunk: &[u8]) -> usize {
        let payloads = self.assembler.lock().push(chunk);

        let mut emitted = 0;
        for payload in payloads {
            match parse_status_payload(&payload) {
                Ok(status) => {
                    tracing::trace!(
                        usb = status.usb_present,
                        bt = status.bluetooth_connected,
                        "Status frame"
                    );
                    self.latest.send_replace(Some(status.clone()));
                    self.subscribers.publish(&status);
                    emitted += 1;
                }
                Err(e) => {
                    tracing::warn!(bytes = payload.len(), "Dropping status frame: {}", e);
                }
            }
        }
        emitted
    }

    fn request_status(&self) -> bool {
        self.link.write(&self.settings.markers.request)
    }
}

fn monitor_loop(
    inner: Weak<ScannerInner>,
    rx: Receiver<Vec<u8>>,
    interval: Duration,
    stop: StopSignal,
) {
    let mut next_poll = Instant::now();
    while !stop.is_stopped() {
        let timeout = next_poll
            .saturating_duration_since(Instant::now())
            .min(POP_TIMEOUT);
        let received = rx.recv_timeout(timeout);

        let Some(inner) = inner.upgrade() else { break };
        match received {
            Ok(chunk) => {
                inner.process_chunk(&chunk);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_poll {
            if inner.link.is_connected() && !inner.request_status() {
                tracing::debug!("Status request write failed");
            }
            next_poll = now + interval;
        }
    }
    tracing::debug!("Status monitor loop exited");
}
