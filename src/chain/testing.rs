//! Scripted `ChainClient` fake shared by the crate's tests

use crate::chain::client::{ChainClient, EventSubscription, LogEntry, Receipt};
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A chain whose responses are scripted by the test
pub struct ScriptedChain {
    chain_id: u64,
    confirmation: Mutex<Option<BridgeResult<Receipt>>>,
    receipts: Mutex<HashMap<H256, Receipt>>,
    call_response: Mutex<Option<BridgeResult<Bytes>>>,
    send_response: Mutex<Option<BridgeResult<H256>>>,
    event_feed: Mutex<Option<mpsc::Receiver<LogEntry>>>,
    keep_alive: Mutex<Vec<mpsc::Sender<LogEntry>>>,
    /// Every (to, data, value) triple passed to send_transaction
    pub sent: Mutex<Vec<(Address, Bytes, U256)>>,
    /// Every (address, topics) pair passed to subscribe_to_event
    pub subscriptions: Mutex<Vec<(Address, Vec<H256>)>>,
}

impl ScriptedChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            confirmation: Mutex::new(None),
            receipts: Mutex::new(HashMap::new()),
            call_response: Mutex::new(None),
            send_response: Mutex::new(None),
            event_feed: Mutex::new(None),
            keep_alive: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn receipt(tx_hash: H256, status: u64) -> Receipt {
        Receipt {
            tx_hash,
            status,
            confirmations: 1,
            block_number: 100,
            gas_used: None,
        }
    }

    /// Script the outcome of the next wait_for_confirmation call
    pub fn set_confirmation(&self, result: BridgeResult<Receipt>) {
        *self.confirmation.lock().unwrap() = Some(result);
    }

    pub fn insert_receipt(&self, tx_hash: H256, receipt: Receipt) {
        self.receipts.lock().unwrap().insert(tx_hash, receipt);
    }

    pub fn set_call_response(&self, result: BridgeResult<Bytes>) {
        *self.call_response.lock().unwrap() = Some(result);
    }

    pub fn set_send_response(&self, result: BridgeResult<H256>) {
        *self.send_response.lock().unwrap() = Some(result);
    }

    /// Feed the next event subscription from a test-owned channel
    pub fn set_event_feed(&self, rx: mpsc::Receiver<LogEntry>) {
        *self.event_feed.lock().unwrap() = Some(rx);
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> BridgeResult<H256> {
        self.sent.lock().unwrap().push((to, data, value));
        match self.send_response.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(H256::from_low_u64_be(0xfeed)),
        }
    }

    async fn wait_for_confirmation(
        &self,
        _tx_hash: H256,
        _min_confirmations: u64,
    ) -> BridgeResult<Receipt> {
        loop {
            if let Some(result) = self.confirmation.lock().unwrap().take() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn subscribe_to_event(
        &self,
        address: Address,
        topics: Vec<H256>,
    ) -> BridgeResult<EventSubscription> {
        self.subscriptions.lock().unwrap().push((address, topics));

        let rx = match self.event_feed.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                // Silent but open subscription
                let (tx, rx) = mpsc::channel(1);
                self.keep_alive.lock().unwrap().push(tx);
                rx
            }
        };
        Ok(EventSubscription::new(rx))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> BridgeResult<Option<Receipt>> {
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn call(&self, _to: Address, _data: Bytes) -> BridgeResult<Bytes> {
        match self.call_response.lock().unwrap().take() {
            Some(result) => result,
            None => Err(BridgeError::Chain {
                chain_id: self.chain_id,
                message: "no scripted call response".to_string(),
            }),
        }
    }
}
