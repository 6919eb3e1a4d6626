//! Cross-chain transaction monitor
//!
//! One independent task per tracked transfer: wait for the source
//! transaction to confirm, then watch the destination chain for the
//! transfer's completion event while racing the delivery timeout. The first
//! of {completion, timeout} wins; every path ends in a terminal state, so a
//! monitor task never hangs. Unsubscribing observers does not cancel the
//! task.

pub mod bus;
pub mod registry;

pub use bus::Subscription;
pub use registry::{transfer_id, TransferId, TransferRecord, TransferRegistry, TransferStatus};

use crate::bridge::relay;
use crate::chain::{ChainClient, ChainManager, Receipt};
use crate::config::MonitorConfig;
use crate::error::{classify, BridgeError, BridgeResult, ClassifiedError, ErrorKind};

use chrono::Utc;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

/// Input to `track`: a transfer whose source transaction has just been
/// submitted
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub tx_hash: H256,
    pub source_chain_id: u64,
    pub dest_chain_id: u64,
    pub amount: U256,
    pub sender: Address,
    pub receiver: Address,
}

/// Owns the registry and spawns one monitoring task per tracked transfer
pub struct TransferMonitor {
    chains: Arc<ChainManager>,
    registry: Arc<TransferRegistry>,
    config: MonitorConfig,
}

impl TransferMonitor {
    pub fn new(chains: Arc<ChainManager>, config: MonitorConfig) -> Self {
        Self {
            chains,
            registry: Arc::new(TransferRegistry::new()),
            config,
        }
    }

    /// Create a PENDING record for the transfer and start monitoring it.
    ///
    /// Returns the transfer id synchronously; the monitoring task runs to a
    /// terminal state on its own.
    pub fn track(&self, request: TrackRequest) -> BridgeResult<TransferId> {
        if request.source_chain_id == request.dest_chain_id {
            return Err(BridgeError::Validation(
                "source and destination chains must differ".to_string(),
            ));
        }
        if request.amount.is_zero() {
            return Err(BridgeError::Validation("amount must be positive".to_string()));
        }

        let id = transfer_id(request.source_chain_id, request.tx_hash);
        let record = TransferRecord {
            id: id.clone(),
            tx_hash: request.tx_hash,
            source_chain_id: request.source_chain_id,
            dest_chain_id: request.dest_chain_id,
            amount: request.amount,
            sender: request.sender,
            receiver: request.receiver,
            status: TransferStatus::Pending,
            confirmations: 0,
            source_receipt: None,
            dest_receipt: None,
            error: None,
            created_at: Utc::now(),
        };
        self.registry.insert(record)?;
        crate::metrics::record_transfer_tracked(request.source_chain_id);
        info!("Tracking transfer {}", id);

        let chains = self.chains.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            monitor_transfer(chains, registry, config, task_id, request).await;
        });

        Ok(id)
    }

    /// Register an observer for a transfer's status transitions
    pub fn subscribe(
        &self,
        transfer_id: &str,
        observer: impl Fn(&TransferRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.registry.subscribe(transfer_id, observer)
    }

    pub fn get(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.registry.get(transfer_id)
    }

    /// Evict terminal records older than the configured age
    pub fn sweep(&self) -> usize {
        self.registry.sweep(self.config.sweep_max_age())
    }

    /// Evict terminal records older than an explicit age
    pub fn sweep_older_than(&self, max_age: std::time::Duration) -> usize {
        self.registry.sweep(max_age)
    }

    pub fn transfers_for_address(&self, address: Address) -> Vec<TransferRecord> {
        self.registry.transfers_for_address(address)
    }

    pub fn registry(&self) -> Arc<TransferRegistry> {
        self.registry.clone()
    }
}

fn monitor_failure(cause: impl ToString) -> ClassifiedError {
    ClassifiedError::new(ErrorKind::Monitor, Some(cause.to_string()))
}

/// The monitoring task for one transfer. Every exit path leaves the record
/// in a terminal state.
async fn monitor_transfer(
    chains: Arc<ChainManager>,
    registry: Arc<TransferRegistry>,
    config: MonitorConfig,
    id: TransferId,
    request: TrackRequest,
) {
    let source = match chains.get(request.source_chain_id) {
        Ok(chain) => chain,
        Err(e) => {
            registry.mark_failed(&id, monitor_failure(e));
            return;
        }
    };

    let min_confirmations = chains
        .network(request.source_chain_id)
        .map(|n| n.confirmation_blocks)
        .unwrap_or(1);

    // First suspension point: the source transaction entering a block.
    let receipt = match source
        .wait_for_confirmation(request.tx_hash, min_confirmations)
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            registry.mark_failed(&id, monitor_failure(e));
            return;
        }
    };

    if !receipt.succeeded() {
        let error = BridgeError::SourceTxFailed {
            chain_id: request.source_chain_id,
            tx_hash: request.tx_hash,
        };
        warn!("{}", error);
        registry.mark_failed(&id, classify(&error));
        return;
    }

    registry.mark_confirming(&id, receipt);

    match watch_destination(&chains, &config, &id, &request).await {
        Ok(dest_receipt) => {
            info!("Transfer {} completed on chain {}", id, request.dest_chain_id);
            registry.mark_completed(&id, dest_receipt);
        }
        Err(error @ BridgeError::DeliveryTimeout { .. }) => {
            warn!("{}", error);
            registry.mark_failed(&id, classify(&error));
        }
        Err(e) => {
            registry.mark_failed(&id, monitor_failure(e));
        }
    }
}

/// Watch the destination chain for this transfer's completion event,
/// racing the delivery timeout
async fn watch_destination(
    chains: &ChainManager,
    config: &MonitorConfig,
    id: &str,
    request: &TrackRequest,
) -> BridgeResult<Receipt> {
    let dest = chains.get(request.dest_chain_id)?;
    let bridge_address = chains.bridge_address(request.dest_chain_id)?;

    // Completion events are matched by the transfer's correlation key, not
    // by bare topic, so concurrent transfers to the same destination can
    // never cross-match.
    let key = relay::correlation_key(request.source_chain_id, request.tx_hash);
    let mut subscription = dest
        .subscribe_to_event(bridge_address, vec![relay::completion_event_topic(), key])
        .await?;

    tokio::select! {
        maybe_log = subscription.next() => {
            let log = maybe_log.ok_or_else(|| BridgeError::Monitor {
                transfer_id: id.to_string(),
                message: "completion event stream closed".to_string(),
            })?;
            Ok(destination_receipt(dest.as_ref(), &log).await)
        }
        _ = tokio::time::sleep(config.delivery_timeout()) => {
            Err(BridgeError::DeliveryTimeout {
                transfer_id: id.to_string(),
                timeout_ms: config.delivery_timeout_ms,
            })
        }
    }
}

/// Receipt of the destination transaction that emitted the completion log,
/// falling back to a summary built from the log itself
async fn destination_receipt(dest: &dyn ChainClient, log: &crate::chain::LogEntry) -> Receipt {
    match dest.transaction_receipt(log.tx_hash).await {
        Ok(Some(receipt)) => receipt,
        _ => Receipt {
            tx_hash: log.tx_hash,
            status: 1,
            confirmations: 0,
            block_number: log.block_number,
            gas_used: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::ScriptedChain;
    use crate::chain::LogEntry;
    use crate::config::NetworkConfig;
    use crate::error::ErrorKind;

    use ethers::utils::parse_ether;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SOURCE_CHAIN: u64 = 11155111;
    const DEST_CHAIN: u64 = 80002;
    const DEST_BRIDGE: &str = "0x00000000000000000000000000000000000000bb";

    fn network(chain_id: u64, bridge: &str) -> NetworkConfig {
        NetworkConfig {
            chain_id,
            name: format!("chain-{}", chain_id),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            bridge_address: bridge.to_string(),
            relay_chain_id: 10000 + chain_id as u16 % 1000,
            block_explorer: String::new(),
            confirmation_blocks: 1,
        }
    }

    fn config(delivery_timeout_ms: u64) -> MonitorConfig {
        MonitorConfig {
            delivery_timeout_ms,
            receipt_poll_interval_ms: 10,
            sweep_max_age_secs: 86_400,
            relay_gas_limit: 200_000,
        }
    }

    fn setup(
        delivery_timeout_ms: u64,
    ) -> (TransferMonitor, Arc<ScriptedChain>, Arc<ScriptedChain>) {
        let chains = Arc::new(ChainManager::new());
        let source = Arc::new(ScriptedChain::new(SOURCE_CHAIN));
        let dest = Arc::new(ScriptedChain::new(DEST_CHAIN));
        chains.register(
            network(SOURCE_CHAIN, "0x00000000000000000000000000000000000000aa"),
            source.clone(),
        );
        chains.register(network(DEST_CHAIN, DEST_BRIDGE), dest.clone());

        (
            TransferMonitor::new(chains, config(delivery_timeout_ms)),
            source,
            dest,
        )
    }

    fn request(tx: u64) -> TrackRequest {
        TrackRequest {
            tx_hash: H256::from_low_u64_be(tx),
            source_chain_id: SOURCE_CHAIN,
            dest_chain_id: DEST_CHAIN,
            amount: parse_ether("1.5").unwrap(),
            sender: Address::from_low_u64_be(100),
            receiver: Address::from_low_u64_be(200),
        }
    }

    fn completion_log(request: &TrackRequest, dest_tx: H256) -> LogEntry {
        LogEntry {
            address: DEST_BRIDGE.parse().unwrap(),
            topics: vec![
                relay::completion_event_topic(),
                relay::correlation_key(request.source_chain_id, request.tx_hash),
            ],
            data: Default::default(),
            tx_hash: dest_tx,
            block_number: 42,
        }
    }

    async fn wait_for(
        monitor: &TransferMonitor,
        id: &str,
        predicate: impl Fn(&TransferRecord) -> bool,
    ) -> TransferRecord {
        for _ in 0..500 {
            if let Some(record) = monitor.get(id) {
                if predicate(&record) {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never reached, record: {:?}", monitor.get(id));
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_completes_end_to_end() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);

        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));
        let dest_tx = H256::from_low_u64_be(0xd0);
        dest.insert_receipt(dest_tx, ScriptedChain::receipt(dest_tx, 1));

        let (feed, rx) = mpsc::channel(4);
        dest.set_event_feed(rx);

        let id = monitor.track(req.clone()).unwrap();
        assert_eq!(monitor.get(&id).unwrap().status, TransferStatus::Pending);

        // The completion event lands on the destination 10ms later.
        let log = completion_log(&req, dest_tx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = feed.send(log).await;
        });

        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;
        assert_eq!(record.status, TransferStatus::Completed);
        assert!(record.source_receipt.is_some());
        assert_eq!(record.dest_receipt.unwrap().tx_hash, dest_tx);
        assert!(record.error.is_none());
        assert_eq!(record.amount, parse_ether("1.5").unwrap());

        // The destination watch was scoped by the correlation key.
        let subs = dest.subscriptions.lock().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(
            subs[0].1,
            vec![
                relay::completion_event_topic(),
                relay::correlation_key(req.source_chain_id, req.tx_hash)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_source_transaction_fails_fast() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 0)));

        let id = monitor.track(req).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;

        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(record.error.unwrap().kind, ErrorKind::SourceTxFailed);
        assert!(record.dest_receipt.is_none());
        // Never reached the destination watch.
        assert!(dest.subscriptions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_destination_times_out() {
        let (monitor, source, _dest) = setup(50);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        let id = monitor.track(req).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;

        assert_eq!(record.status, TransferStatus::Failed);
        let error = record.error.unwrap();
        assert_eq!(error.kind, ErrorKind::DeliveryTimeout);
        assert!(error.cause.unwrap().contains("50ms"));
        // The source leg had confirmed before the timeout.
        assert!(record.source_receipt.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_stream_is_a_monitor_error() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        // Channel whose sender is dropped immediately: stream closed.
        let (_, rx) = mpsc::channel::<LogEntry>(1);
        dest.set_event_feed(rx);

        let id = monitor.track(req).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;
        assert_eq!(record.error.unwrap().kind, ErrorKind::Monitor);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_track_is_rejected_and_original_untouched() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        let dest_tx = H256::from_low_u64_be(0xd0);
        let (feed, rx) = mpsc::channel(4);
        dest.set_event_feed(rx);
        feed.send(completion_log(&req, dest_tx)).await.unwrap();

        let id = monitor.track(req.clone()).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;
        assert_eq!(record.status, TransferStatus::Completed);

        let err = monitor.track(req).unwrap_err();
        assert!(matches!(err, BridgeError::Duplicate { .. }));
        assert_eq!(monitor.get(&id).unwrap().status, TransferStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_the_same_transitions_in_the_same_order() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        let (feed, rx) = mpsc::channel(4);
        dest.set_event_feed(rx);
        feed.send(completion_log(&req, H256::from_low_u64_be(0xd0)))
            .await
            .unwrap();

        let id = transfer_id(req.source_chain_id, req.tx_hash);
        let logs: Vec<Arc<Mutex<Vec<TransferStatus>>>> =
            (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        let _subs: Vec<Subscription> = logs
            .iter()
            .map(|log| {
                let log = log.clone();
                monitor.subscribe(&id, move |r| log.lock().unwrap().push(r.status))
            })
            .collect();

        monitor.track(req).unwrap();
        wait_for(&monitor, &id, |r| r.status.is_terminal()).await;

        let expected = vec![TransferStatus::Confirming, TransferStatus::Completed];
        for log in &logs {
            assert_eq!(*log.lock().unwrap(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_observer_is_silent_but_monitoring_continues() {
        let (monitor, source, dest) = setup(600_000);
        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        let (feed, rx) = mpsc::channel(4);
        dest.set_event_feed(rx);
        feed.send(completion_log(&req, H256::from_low_u64_be(0xd0)))
            .await
            .unwrap();

        let id = transfer_id(req.source_chain_id, req.tx_hash);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let sub = monitor.subscribe(&id, move |r| seen_cb.lock().unwrap().push(r.status));
        sub.unsubscribe();

        monitor.track(req).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;

        assert_eq!(record.status, TransferStatus::Completed);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_destination_resolves_to_monitor_failure() {
        let chains = Arc::new(ChainManager::new());
        let source = Arc::new(ScriptedChain::new(SOURCE_CHAIN));
        chains.register(
            network(SOURCE_CHAIN, "0x00000000000000000000000000000000000000aa"),
            source.clone(),
        );
        let monitor = TransferMonitor::new(chains, config(600_000));

        let req = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(req.tx_hash, 1)));

        let id = monitor.track(req).unwrap();
        let record = wait_for(&monitor, &id, |r| r.status.is_terminal()).await;
        assert_eq!(record.error.unwrap().kind, ErrorKind::Monitor);
    }

    #[tokio::test]
    async fn sweep_respects_terminal_and_age_rules() {
        let (monitor, source, dest) = setup(600_000);

        // One transfer runs to completion.
        let done = request(1);
        source.set_confirmation(Ok(ScriptedChain::receipt(done.tx_hash, 1)));
        let (feed, rx) = mpsc::channel(4);
        dest.set_event_feed(rx);
        feed.send(completion_log(&done, H256::from_low_u64_be(0xd0)))
            .await
            .unwrap();
        let done_id = monitor.track(done).unwrap();
        wait_for(&monitor, &done_id, |r| r.status.is_terminal()).await;

        // A second transfer stays in flight (source never confirms).
        let inflight_id = monitor.track(request(2)).unwrap();

        assert_eq!(monitor.sweep_older_than(Duration::ZERO), 1);
        assert!(monitor.get(&done_id).is_none());
        assert!(monitor.get(&inflight_id).is_some());

        // The configured 24h age keeps fresh terminal records around.
        assert_eq!(monitor.sweep(), 0);
    }

    #[tokio::test]
    async fn rejects_same_chain_and_zero_amount() {
        let (monitor, _source, _dest) = setup(600_000);

        let mut same_chain = request(1);
        same_chain.dest_chain_id = SOURCE_CHAIN;
        assert_eq!(
            monitor.track(same_chain).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut zero = request(2);
        zero.amount = U256::zero();
        assert_eq!(monitor.track(zero).unwrap_err().kind(), ErrorKind::Validation);

        assert!(monitor.get(&transfer_id(SOURCE_CHAIN, H256::from_low_u64_be(1))).is_none());
    }
}
