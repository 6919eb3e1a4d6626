//! Ethers-backed chain client with multi-RPC failover

use crate::chain::client::{ChainClient, EventSubscription, LogEntry, Receipt};
use crate::config::NetworkConfig;
use crate::error::{classify_rpc, BridgeError, BridgeResult, ErrorKind};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Gas limit headroom applied on top of the node's estimate
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;

/// Block span per log query, bounds the size of catch-up scans
const MAX_BLOCK_RANGE: u64 = 1_000;

/// `ChainClient` implementation over one or more JSON-RPC endpoints with
/// automatic failover between them
pub struct EvmChain {
    config: NetworkConfig,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    wallet: LocalWallet,
    poll_interval: Duration,
}

impl EvmChain {
    /// Create a client for one configured network
    pub fn new(
        config: NetworkConfig,
        wallet: LocalWallet,
        poll_interval: Duration,
    ) -> BridgeResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BridgeError::Chain {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let wallet = wallet.with_chain_id(config.chain_id);

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            wallet,
            poll_interval,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    async fn get_block_number(&self) -> BridgeResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(BridgeError::Chain {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    fn chain_error(&self, message: impl ToString) -> BridgeError {
        BridgeError::Chain {
            chain_id: self.config.chain_id,
            message: message.to_string(),
        }
    }

    /// Map a raw submission failure onto the taxonomy before wrapping it
    fn submission_error(&self, e: impl ToString) -> BridgeError {
        let message = e.to_string();
        match classify_rpc(None, &message) {
            ErrorKind::InsufficientFunds => BridgeError::InsufficientFunds {
                chain_id: self.config.chain_id,
            },
            ErrorKind::UserRejected => BridgeError::UserRejected,
            _ => BridgeError::Chain {
                chain_id: self.config.chain_id,
                message,
            },
        }
    }

    fn to_log_entry(log: Log) -> LogEntry {
        LogEntry {
            address: log.address,
            topics: log.topics,
            data: log.data,
            tx_hash: log.transaction_hash.unwrap_or_default(),
            block_number: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
        }
    }
}

#[async_trait]
impl ChainClient for EvmChain {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> BridgeResult<H256> {
        let provider = self.http();
        let from = self.wallet.address();

        let nonce = provider
            .get_transaction_count(from, None)
            .await
            .map_err(|e| self.chain_error(e))?;
        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| self.chain_error(e))?;

        let tx = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .value(value)
            .nonce(nonce)
            .gas_price(gas_price);
        let mut typed: TypedTransaction = tx.into();
        typed.set_chain_id(self.config.chain_id);

        let gas = provider
            .estimate_gas(&typed, None)
            .await
            .map_err(|e| self.submission_error(e))?;
        typed.set_gas(gas + gas * GAS_LIMIT_BUFFER_PERCENT / 100);

        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| BridgeError::Wallet(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);

        let pending = provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.submission_error(e))?;
        let tx_hash = pending.tx_hash();

        debug!(
            "Chain {} accepted transaction {:?}",
            self.config.chain_id, tx_hash
        );
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: H256,
        min_confirmations: u64,
    ) -> BridgeResult<Receipt> {
        loop {
            if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                if receipt.confirmations >= min_confirmations {
                    return Ok(receipt);
                }
                debug!(
                    "Transaction {:?} has {} / {} confirmations on chain {}",
                    tx_hash, receipt.confirmations, min_confirmations, self.config.chain_id
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn subscribe_to_event(
        &self,
        address: Address,
        topics: Vec<H256>,
    ) -> BridgeResult<EventSubscription> {
        let start_block = self.get_block_number().await?;

        let mut filter = Filter::new().address(address);
        if let Some(sig) = topics.first() {
            filter = filter.topic0(*sig);
        }
        if let Some(key) = topics.get(1) {
            filter = filter.topic1(*key);
        }

        let (tx, rx) = mpsc::channel(64);
        let provider = self.http().clone();
        let chain_id = self.config.chain_id;
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut last_block = start_block.saturating_sub(1);
            loop {
                match provider.get_block_number().await {
                    Ok(current) => {
                        let current = current.as_u64();
                        if current > last_block {
                            let from_block = last_block + 1;
                            let to_block =
                                std::cmp::min(current, from_block + MAX_BLOCK_RANGE);
                            let range_filter =
                                filter.clone().from_block(from_block).to_block(to_block);

                            match provider.get_logs(&range_filter).await {
                                Ok(logs) => {
                                    for log in logs {
                                        if tx.send(Self::to_log_entry(log)).await.is_err() {
                                            return;
                                        }
                                    }
                                    last_block = to_block;
                                }
                                Err(e) => {
                                    warn!("Failed to get logs from chain {}: {}", chain_id, e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to get block number from chain {}: {}", chain_id, e);
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        Ok(EventSubscription::with_task(rx, task))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>> {
        let receipt = self
            .http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.chain_error(e))?;

        let receipt = match receipt {
            Some(r) => r,
            None => return Ok(None),
        };
        let block_number = match receipt.block_number {
            Some(b) => b.as_u64(),
            None => return Ok(None),
        };

        let current_block = self.get_block_number().await?;
        let confirmations = current_block.saturating_sub(block_number) + 1;

        Ok(Some(Receipt {
            tx_hash,
            status: receipt.status.map(|s| s.as_u64()).unwrap_or(0),
            confirmations,
            block_number,
            gas_used: receipt.gas_used,
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> BridgeResult<Bytes> {
        let tx = TransactionRequest::new().to(to).data(data);
        let typed: TypedTransaction = tx.into();

        self.http()
            .call(&typed, None)
            .await
            .map_err(|e| self.chain_error(e))
    }
}
