//! Transfer record ownership and the single status update path
//!
//! The registry exclusively owns all transfer records. Every mutation goes
//! through `apply`, which enforces the state machine, clones a snapshot and
//! publishes it to observers before returning. Per-id updates come from a
//! single monitor task, so observers see each transfer's transitions in the
//! exact order they occurred.

use crate::chain::Receipt;
use crate::error::{BridgeError, BridgeResult, ClassifiedError};
use crate::monitor::bus::{Observer, StatusBus, Subscription};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Composite transfer identifier, deterministic from the source chain and
/// the source transaction hash
pub type TransferId = String;

pub fn transfer_id(source_chain_id: u64, tx_hash: H256) -> TransferId {
    format!("{}-{:#x}", source_chain_id, tx_hash)
}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Confirming,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// The edges of the state machine. Everything else is rejected.
    fn can_transition(self, to: TransferStatus) -> bool {
        matches!(
            (self, to),
            (TransferStatus::Pending, TransferStatus::Confirming)
                | (TransferStatus::Pending, TransferStatus::Failed)
                | (TransferStatus::Confirming, TransferStatus::Completed)
                | (TransferStatus::Confirming, TransferStatus::Failed)
        )
    }
}

/// One logical cross-chain transfer
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: TransferId,
    pub tx_hash: H256,
    pub source_chain_id: u64,
    pub dest_chain_id: u64,
    pub amount: U256,
    pub sender: Address,
    pub receiver: Address,
    pub status: TransferStatus,
    pub confirmations: u64,
    pub source_receipt: Option<Receipt>,
    pub dest_receipt: Option<Receipt>,
    pub error: Option<ClassifiedError>,
    pub created_at: DateTime<Utc>,
}

pub struct TransferRegistry {
    records: Mutex<HashMap<TransferId, TransferRecord>>,
    bus: Arc<StatusBus>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            bus: Arc::new(StatusBus::new()),
        }
    }

    /// Add a new record. Fails without touching the existing record when
    /// the id is already tracked.
    pub(crate) fn insert(&self, record: TransferRecord) -> BridgeResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id) {
            return Err(BridgeError::Duplicate {
                transfer_id: record.id,
            });
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.records.lock().unwrap().get(transfer_id).cloned()
    }

    /// Register an observer for a transfer's status transitions.
    ///
    /// If the record is already terminal the observer immediately receives
    /// the terminal snapshot, so a late subscriber cannot miss the outcome.
    pub fn subscribe(
        &self,
        transfer_id: &str,
        observer: impl Fn(&TransferRecord) + Send + Sync + 'static,
    ) -> Subscription {
        // Holding the records lock serializes against the update path, so
        // the terminal snapshot can never be delivered twice.
        let records = self.records.lock().unwrap();
        let observer: Observer = Box::new(observer);
        if let Some(record) = records.get(transfer_id) {
            if record.status.is_terminal() {
                observer(record);
            }
        }
        self.bus.register(transfer_id, observer)
    }

    /// Remove terminal records older than `max_age`, along with their
    /// observers. Non-terminal records are never removed regardless of age.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        let expired: Vec<TransferId> = records
            .iter()
            .filter(|(_, record)| {
                record.status.is_terminal()
                    && (now - record.created_at)
                        .to_std()
                        .map(|age| age > max_age)
                        .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            records.remove(id);
            self.bus.drop_channel(id);
            debug!("Swept transfer {}", id);
        }
        expired.len()
    }

    /// All transfers where the address is sender or receiver
    pub fn transfers_for_address(&self, address: Address) -> Vec<TransferRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.sender == address || record.receiver == address)
            .cloned()
            .collect()
    }

    /// Source transaction confirmed: record the receipt and enter CONFIRMING
    pub(crate) fn mark_confirming(&self, transfer_id: &str, receipt: Receipt) {
        self.apply(transfer_id, TransferStatus::Confirming, |record| {
            record.confirmations = receipt.confirmations;
            record.source_receipt = Some(receipt);
        });
    }

    /// Destination completion observed: terminal COMPLETED
    pub(crate) fn mark_completed(&self, transfer_id: &str, receipt: Receipt) {
        self.apply(transfer_id, TransferStatus::Completed, |record| {
            record.dest_receipt = Some(receipt);
        });
    }

    /// Terminal FAILED with its classified cause
    pub(crate) fn mark_failed(&self, transfer_id: &str, error: ClassifiedError) {
        self.apply(transfer_id, TransferStatus::Failed, |record| {
            record.error = Some(error);
        });
    }

    /// The single update path: mutate under the lock, then publish the
    /// snapshot to observers before returning
    fn apply(
        &self,
        transfer_id: &str,
        to: TransferStatus,
        mutate: impl FnOnce(&mut TransferRecord),
    ) {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(transfer_id) else {
            warn!("Status update for unknown transfer {}", transfer_id);
            return;
        };

        if !record.status.can_transition(to) {
            warn!(
                "Ignoring status transition {:?} -> {:?} for {}",
                record.status, to, transfer_id
            );
            return;
        }

        mutate(record);
        record.status = to;
        debug!("Transfer {} is now {:?}", transfer_id, to);

        match to {
            TransferStatus::Completed => {
                let latency = (Utc::now() - record.created_at).num_milliseconds() as f64 / 1_000.0;
                crate::metrics::record_transfer_completed(record.source_chain_id, latency);
            }
            TransferStatus::Failed => {
                let kind = record.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("unknown");
                crate::metrics::record_transfer_failed(record.source_chain_id, kind);
            }
            _ => {}
        }

        let snapshot = record.clone();
        self.bus.publish(&snapshot);
    }

    #[cfg(test)]
    pub fn observer_count(&self, transfer_id: &str) -> usize {
        self.bus.observer_count(transfer_id)
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
