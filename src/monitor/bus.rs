//! Status subscription bus
//!
//! Keeps the observer lists for tracked transfers and delivers status
//! snapshots synchronously, in registration order. A panicking observer is
//! caught and logged; it never blocks the observers after it or any later
//! transition.

use crate::monitor::registry::TransferRecord;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Observer callback invoked with a snapshot of the record after every
/// status transition
pub type Observer = Box<dyn Fn(&TransferRecord) + Send + Sync>;

pub struct StatusBus {
    channels: Mutex<HashMap<String, Vec<(u64, Observer)>>>,
    next_token: AtomicU64,
}

impl StatusBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Register an observer for a transfer id
    pub fn register(self: &Arc<Self>, transfer_id: &str, observer: Observer) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.channels
            .lock()
            .unwrap()
            .entry(transfer_id.to_string())
            .or_default()
            .push((token, observer));

        Subscription {
            bus: Arc::downgrade(self),
            transfer_id: transfer_id.to_string(),
            token,
        }
    }

    /// Deliver a record snapshot to all current observers of its id, in
    /// registration order
    pub fn publish(&self, record: &TransferRecord) {
        let channels = self.channels.lock().unwrap();
        let Some(observers) = channels.get(&record.id) else {
            return;
        };

        for (token, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(record))).is_err() {
                warn!(
                    "Observer {} for transfer {} panicked on {:?}",
                    token, record.id, record.status
                );
                crate::metrics::record_observer_panic();
            }
        }
    }

    pub(crate) fn remove(&self, transfer_id: &str, token: u64) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(observers) = channels.get_mut(transfer_id) {
            observers.retain(|(t, _)| *t != token);
            if observers.is_empty() {
                channels.remove(transfer_id);
            }
        }
    }

    /// Drop a transfer's whole observer list
    pub(crate) fn drop_channel(&self, transfer_id: &str) {
        self.channels.lock().unwrap().remove(transfer_id);
    }

    #[cfg(test)]
    pub fn observer_count(&self, transfer_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(transfer_id)
            .map(|o| o.len())
            .unwrap_or(0)
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that deregisters one observer. Dropping the handle without
/// calling `unsubscribe` leaves the observer registered; monitoring always
/// runs to a terminal state either way.
pub struct Subscription {
    bus: Weak<StatusBus>,
    transfer_id: String,
    token: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.transfer_id, self.token);
        }
    }
}
