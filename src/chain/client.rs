//! The narrow seam to chain access
//!
//! Everything the coordinator needs from a chain fits in the `ChainClient`
//! trait: submit once, read receipts, watch one event filter. Endpoint
//! resolution, signing and session concerns live behind the implementation.

use crate::error::BridgeResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transaction receipt summary as observed on a chain
#[derive(Debug, Clone)]
pub struct Receipt {
    pub tx_hash: H256,
    /// Execution status: 1 = success, 0 = reverted
    pub status: u64,
    pub confirmations: u64,
    pub block_number: u64,
    pub gas_used: Option<U256>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// One log entry delivered by an event subscription
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub tx_hash: H256,
    pub block_number: u64,
}

/// An active event watch. Logs arrive on an internal channel; dropping the
/// subscription (or calling `unsubscribe`) stops the underlying watcher.
pub struct EventSubscription {
    rx: mpsc::Receiver<LogEntry>,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    /// Subscription fed directly by the caller, with no watcher task
    pub fn new(rx: mpsc::Receiver<LogEntry>) -> Self {
        Self { rx, task: None }
    }

    /// Subscription backed by a spawned watcher task
    pub fn with_task(rx: mpsc::Receiver<LogEntry>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Next matching log, or None once the watcher has shut down
    pub async fn next(&mut self) -> Option<LogEntry> {
        self.rx.recv().await
    }

    /// Stop watching
    pub fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Stream for EventSubscription {
    type Item = LogEntry;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Chain access operations consumed by the coordinator.
///
/// All calls are scoped to the chain the implementation was built for;
/// chain selection happens in [`crate::chain::ChainManager`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain this client is connected to
    fn chain_id(&self) -> u64;

    /// Submit a transaction and return its hash as soon as it is accepted
    /// into the pending pool
    async fn send_transaction(&self, to: Address, data: Bytes, value: U256)
        -> BridgeResult<H256>;

    /// Block until the transaction has at least `min_confirmations`
    async fn wait_for_confirmation(
        &self,
        tx_hash: H256,
        min_confirmations: u64,
    ) -> BridgeResult<Receipt>;

    /// Watch for logs emitted by `address` matching the topic filter.
    /// Topics are positional: element 0 is the event signature.
    async fn subscribe_to_event(
        &self,
        address: Address,
        topics: Vec<H256>,
    ) -> BridgeResult<EventSubscription>;

    /// Receipt for a transaction, or None while still pending
    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>>;

    /// Read-only contract call
    async fn call(&self, to: Address, data: Bytes) -> BridgeResult<Bytes>;
}
