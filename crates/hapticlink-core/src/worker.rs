//! Background loop threads
//!
//! Each loop runs on a named OS thread and owns a [`StopSignal`]. Stopping is
//! a channel close rather than a shared flag: the controller drops the only
//! sender, which wakes any `wait` immediately and is observed by
//! `is_stopped` at the top of the next iteration.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::io;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Receiving end of a loop's stop channel
///
/// Nothing is ever sent on the channel; it only ever gets closed.
#[derive(Clone)]
pub(crate) struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Create a connected sender/signal pair
    pub(crate) fn pair() -> (Sender<()>, StopSignal) {
        let (tx, rx) = channel::bounded(0);
        (tx, StopSignal { rx })
    }

    /// Whether stop has been requested
    pub(crate) fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`; returns true if stop was requested meanwhile
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) | Ok(()) => false,
        }
    }
}

/// A named background thread with a closable stop signal
pub(crate) struct Worker {
    name: String,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    /// Spawn `body` on a new thread named `name`
    pub(crate) fn spawn<F>(name: impl Into<String>, body: F) -> io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, signal) = StopSignal::pair();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(signal))?;
        let thread_id = handle.thread().id();

        tracing::debug!(worker = %name, "Worker started");
        Ok(Self {
            name,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Close the stop channel without waiting
    pub(crate) fn signal_stop(&self) {
        self.stop_tx.lock().take();
    }

    /// Whether the thread has not yet returned
    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Whether the caller is running on this worker's thread
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Signal stop and join for at most `timeout`
    ///
    /// Returns true once the thread has exited. Called from the worker's own
    /// thread it only signals and returns false. A thread still running when
    /// the bound expires is left detached.
    pub(crate) fn stop(&self, timeout: Duration) -> bool {
        self.signal_stop();
        if self.join(timeout) {
            return true;
        }
        if !self.is_current() {
            tracing::warn!(worker = %self.name, "Worker did not stop within {:?}", timeout);
        }
        false
    }

    /// Wait up to `timeout` for the thread to return on its own
    ///
    /// The stop channel is left open. Returns false from the worker's own
    /// thread.
    pub(crate) fn join(&self, timeout: Duration) -> bool {
        if self.is_current() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let finished = match self.handle.lock().as_ref() {
                Some(h) => h.is_finished(),
                None => return true,
            };
            if finished {
                break;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "Worker thread panicked");
            }
        }
        tracing::debug!(worker = %self.name, "Worker stopped");
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
