//! Subscriber lists
//!
//! Every fan-out in the link layer (raw byte chunks, status frames, glove
//! snapshots) goes through [`Subscribers`]. The list lock is held only while
//! copying the list, never while a callback runs, so callbacks may subscribe
//! or unsubscribe freely. A panicking callback is caught and logged; the
//! remaining callbacks still run.

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

thread_local! {
    /// Depth of subscriber callbacks running on this thread
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct Slot<T: ?Sized> {
    id: u64,
    callback: Callback<T>,
    active: AtomicBool,
    /// Held for the duration of each invocation of this slot
    gate: ReentrantMutex<()>,
}

impl<T: ?Sized> Slot<T> {
    fn invoke(&self, label: &str, value: &T) {
        let _gate = self.gate.lock();
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        DISPATCH_DEPTH.with(|d| d.set(d.get() + 1));
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(value)));
        DISPATCH_DEPTH.with(|d| d.set(d.get() - 1));

        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(
                subscribers = label,
                subscriber = self.id,
                "Subscriber callback panicked: {message}"
            );
        }
    }
}

type SlotList<T> = Mutex<Vec<Arc<Slot<T>>>>;

/// A list of callbacks receiving `&T`
pub struct Subscribers<T: ?Sized> {
    label: &'static str,
    slots: Arc<SlotList<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + 'static> Subscribers<T> {
    /// Create an empty list; `label` names the list in log output
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let slot = self.make_slot(callback);
        self.slots.lock().push(Arc::clone(&slot));
        self.make_subscription(slot)
    }

    /// Register a callback and hand it `initial` before any published value
    pub fn subscribe_with<F>(&self, initial: &T, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let slot = self.make_slot(callback);
        {
            // Concurrent publishers block on the gate until `initial` is delivered
            let _gate = slot.gate.lock();
            self.slots.lock().push(Arc::clone(&slot));
            slot.invoke(self.label, initial);
        }
        self.make_subscription(slot)
    }

    /// Invoke every current callback with `value`
    pub fn publish(&self, value: &T) {
        let snapshot: Vec<Arc<Slot<T>>> = self.slots.lock().clone();
        for slot in snapshot {
            slot.invoke(self.label, value);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_slot<F>(&self, callback: F) -> Arc<Slot<T>>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Arc::new(Slot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            callback: Box::new(callback),
            active: AtomicBool::new(true),
            gate: ReentrantMutex::new(()),
        })
    }

    fn make_subscription(&self, slot: Arc<Slot<T>>) -> Subscription {
        let list: Weak<SlotList<T>> = Arc::downgrade(&self.slots);
        Subscription {
            disposer: Mutex::new(Some(Box::new(move || {
                slot.active.store(false, Ordering::SeqCst);
                if let Some(list) = list.upgrade() {
                    list.lock().retain(|s| s.id != slot.id);
                }
                // Wait out an invocation in flight on another thread. From
                // inside a callback that wait could close a cycle, so skip it.
                if DISPATCH_DEPTH.with(|d| d.get()) == 0 {
                    drop(slot.gate.lock());
                }
            }))),
        }
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to detach
///
/// Dropping the handle leaves the callback registered.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    disposer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Detach the callback
    ///
    /// Once this returns the callback is not invoked again. Calling it more
    /// than once is a no-op.
    pub fn unsubscribe(&self) {
        let disposer = self.disposer.lock().take();
        if let Some(dispose) = disposer {
            dispose();
        }
    }

    /// Whether `unsubscribe` has already run
    pub fn is_active(&self) -> bool {
        self.disposer.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
