//! Chain module - the coordinator's view of the configured networks
//!
//! This module provides:
//! - The `ChainClient` trait, the narrow chain-access seam
//! - An ethers-backed implementation with multi-RPC failover
//! - `ChainManager`, the chain-id indexed client and network table

pub mod client;
pub mod provider;
#[cfg(test)]
pub mod testing;

pub use client::{ChainClient, EventSubscription, LogEntry, Receipt};
pub use provider::EvmChain;

use crate::config::{NetworkConfig, Settings, WalletConfig};
use crate::error::{BridgeError, BridgeResult};

use dashmap::DashMap;
use ethers::signers::LocalWallet;
use ethers::types::Address;
use std::sync::Arc;
use tracing::info;

const DEFAULT_PRIVATE_KEY_ENV: &str = "BRIDGE_PRIVATE_KEY";

/// Holds the client and network record for every supported chain
pub struct ChainManager {
    clients: DashMap<u64, Arc<dyn ChainClient>>,
    networks: DashMap<u64, NetworkConfig>,
}

impl ChainManager {
    /// Empty manager; chains are added with `register`
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            networks: DashMap::new(),
        }
    }

    /// Build a manager with an `EvmChain` client per configured network
    pub fn from_settings(settings: &Settings) -> BridgeResult<Self> {
        let wallet = load_wallet(&settings.wallet)?;
        let manager = Self::new();

        for network in &settings.networks {
            let chain = EvmChain::new(
                network.clone(),
                wallet.clone(),
                settings.monitor.receipt_poll_interval(),
            )?;
            manager.register(network.clone(), Arc::new(chain));
            info!("Chain {} ({}) initialized", network.name, network.chain_id);
        }

        Ok(manager)
    }

    /// Register a chain client together with its network record
    pub fn register(&self, network: NetworkConfig, client: Arc<dyn ChainClient>) {
        self.clients.insert(network.chain_id, client);
        self.networks.insert(network.chain_id, network);
    }

    /// Get the client for a chain
    pub fn get(&self, chain_id: u64) -> BridgeResult<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .map(|c| c.clone())
            .ok_or(BridgeError::UnsupportedChain { chain_id })
    }

    /// Get the network record for a chain
    pub fn network(&self, chain_id: u64) -> BridgeResult<NetworkConfig> {
        self.networks
            .get(&chain_id)
            .map(|n| n.clone())
            .ok_or(BridgeError::UnsupportedChain { chain_id })
    }

    /// Parsed bridge contract address for a chain
    pub fn bridge_address(&self, chain_id: u64) -> BridgeResult<Address> {
        let network = self.network(chain_id)?;
        network
            .bridge_address
            .parse()
            .map_err(|_| BridgeError::Config(format!(
                "Invalid bridge address for chain {}: {}",
                chain_id, network.bridge_address
            )))
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.clients.contains_key(&chain_id)
    }

    /// All registered chain IDs
    pub fn supported_chains(&self) -> Vec<u64> {
        self.clients.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ChainManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the submitting wallet from the configured environment variable
fn load_wallet(config: &WalletConfig) -> BridgeResult<LocalWallet> {
    let env_name = config
        .private_key_env
        .as_deref()
        .unwrap_or(DEFAULT_PRIVATE_KEY_ENV);

    let key = std::env::var(env_name).map_err(|_| {
        BridgeError::Wallet(format!("No wallet configured. Set {}", env_name))
    })?;

    key.parse::<LocalWallet>()
        .map_err(|e| BridgeError::Wallet(format!("Invalid private key: {}", e)))
}
