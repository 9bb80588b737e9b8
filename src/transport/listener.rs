//! Listener fan-out for raw transport traffic.
//!
//! Every [`Transport`] owns a [`ListenerSet`]. Listeners are registered by
//! reference identity and held *weakly*: the set never keeps a listener
//! alive, and a listener whose owner dropped it is skipped. Entries only
//! leave the set through [`ListenerSet::remove`]; an owner should remove its
//! listener before dropping it. A dropped listener's entry stays registered
//! (and counted by [`ListenerSet::len`]) but is never called again.
//!
//! # Contract
//!
//! - `add` of an already registered listener is a no-op.
//! - `remove` of an unregistered listener is a no-op.
//! - Notification order is insertion order. It is stable but unspecified;
//!   callers must not depend on it for correctness.
//! - Fan-out is best-effort. A listener that returns an error or panics is
//!   logged and the remaining listeners are still notified.
//!
//! # Deadlock Warning
//!
//! Notification runs on the thread that performed the read or write, with no
//! lock held. `on_bytes` may call `add`/`remove`, but must not perform a
//! blocking read on the same transport.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use super::Transport;

/// Direction of a byte event relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes received from the device.
    Inbound,
    /// Bytes sent to the device.
    Outbound,
}

/// Observer of raw traffic on a transport.
///
/// # Contract
///
/// - `on_bytes()` is called synchronously, once per read or write event
/// - The byte slice is only valid for the duration of the call; copy it to
///   keep it
/// - Keep it short: the reader loop is stalled while listeners run
pub trait TransportListener: Send + Sync {
    /// Called for every non-empty read (`Inbound`) and write (`Outbound`).
    fn on_bytes(&self, direction: Direction, source: &Transport, bytes: &[u8]) -> anyhow::Result<()>;

    /// Descriptive name for logging.
    fn name(&self) -> &str {
        "unnamed_listener"
    }
}

/// Identity-keyed set of weakly held listeners.
#[derive(Default)]
pub struct ListenerSet {
    entries: Mutex<Vec<Weak<dyn TransportListener>>>,
}

impl ListenerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. Returns false if it was already registered.
    pub fn add(&self, listener: &Arc<dyn TransportListener>) -> bool {
        let mut entries = self.entries.lock();
        let candidate = Arc::downgrade(listener);
        if entries.iter().any(|w| same_listener(w, &candidate)) {
            return false;
        }
        entries.push(candidate);
        true
    }

    /// Unregisters `listener`. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn TransportListener>) -> bool {
        let mut entries = self.entries.lock();
        let target = Arc::downgrade(listener);
        let before = entries.len();
        entries.retain(|w| !same_listener(w, &target));
        entries.len() != before
    }

    /// Number of registered entries, including listeners already dropped by
    /// their owners.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered listeners that would be notified right now.
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Notifies every listener of an inbound event.
    pub fn notify_read(&self, source: &Transport, bytes: &[u8]) {
        self.notify(Direction::Inbound, source, bytes);
    }

    /// Notifies every listener of an outbound event.
    pub fn notify_write(&self, source: &Transport, bytes: &[u8]) {
        self.notify(Direction::Outbound, source, bytes);
    }

    /// Calls each live listener with the event, isolating failures.
    pub fn notify(&self, direction: Direction, source: &Transport, bytes: &[u8]) {
        // Snapshot so callbacks run without the lock held. Entries that fail
        // to upgrade are skipped, not removed.
        let live: Vec<Arc<dyn TransportListener>> =
            self.entries.lock().iter().filter_map(Weak::upgrade).collect();

        for listener in live {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_bytes(direction, source, bytes)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    listener = listener.name(),
                    transport = source.label(),
                    ?direction,
                    error = %err,
                    "Listener failed"
                ),
                Err(_) => warn!(
                    listener = listener.name(),
                    transport = source.label(),
                    ?direction,
                    "Listener panicked"
                ),
            }
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("registered", &self.len())
            .field("live", &self.live_count())
            .finish()
    }
}

// Compare data pointers only; vtable pointers may differ across codegen units.
fn same_listener(a: &Weak<dyn TransportListener>, b: &Weak<dyn TransportListener>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}
