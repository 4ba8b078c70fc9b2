//! Bounded byte buffer
//!
//! [`ByteRing`] sits between the link reader and the telemetry line reader.
//! Writes never block and never fail: when the buffer would exceed its
//! capacity the oldest bytes are discarded and an overflow counter is bumped.

use parking_lot::Mutex;
use std::collections::VecDeque;

struct RingInner {
    data: VecDeque<u8>,
    overflows: u64,
}

/// Thread-safe FIFO byte queue with fixed capacity and overwrite-on-overflow
pub struct ByteRing {
    capacity: usize,
    inner: Mutex<RingInner>,
}

impl ByteRing {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RingInner {
                data: VecDeque::with_capacity(capacity.min(64 * 1024)),
                overflows: 0,
            }),
        }
    }

    /// Append bytes, discarding the oldest ones if capacity is exceeded
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        let overflowed = if bytes.len() >= self.capacity {
            inner.data.clear();
            inner.data.extend(&bytes[bytes.len() - self.capacity..]);
            true
        } else {
            let excess = (inner.data.len() + bytes.len()).saturating_sub(self.capacity);
            inner.data.drain(..excess);
            inner.data.extend(bytes);
            excess > 0
        };

        if overflowed {
            inner.overflows += 1;
            if inner.overflows % 100 == 1 {
                tracing::warn!(
                    capacity = self.capacity,
                    overflows = inner.overflows,
                    "Byte buffer overflow, dropping oldest data"
                );
            }
        }
    }

    /// Remove and return up to `n` bytes from the front
    pub fn read(&self, n: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        let n = n.min(inner.data.len());
        inner.data.drain(..n).collect()
    }

    /// Remove and return everything
    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.data.drain(..).collect()
    }

    /// Remove and return the first line including its `\n`
    ///
    /// Returns an empty vector and leaves the buffer untouched when no
    /// complete line is buffered.
    pub fn read_line(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        match inner.data.iter().position(|&b| b == b'\n') {
            Some(pos) => inner.data.drain(..=pos).collect(),
            None => Vec::new(),
        }
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Maximum number of bytes held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of writes that discarded data
    pub fn overflow_count(&self) -> u64 {
        self.inner.lock().overflows
    }

    /// Discard all buffered bytes
    pub fn clear(&self) {
        self.inner.lock().data.clear();
    }
}

impl std::fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ByteRing")
            .field("capacity", &self.capacity)
            .field("len", &inner.data.len())
            .field("overflows", &inner.overflows)
            .finish()
    }
}
