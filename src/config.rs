//! Configuration management for the bridge coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub networks: Vec<NetworkConfig>,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

/// One entry of the supported-network table. The coordinator only reads
/// these mappings; it never mutates them.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub bridge_address: String,
    /// Chain identifier in the relay's own numbering scheme
    pub relay_chain_id: u16,
    pub block_explorer: String,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub endpoint: String,
    #[serde(default = "default_pair_indexes")]
    pub pair_indexes: Vec<u32>,
    #[serde(default = "default_chain_type")]
    pub chain_type: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_sweep_max_age_secs")]
    pub sweep_max_age_secs: u64,
    #[serde(default = "default_relay_gas_limit")]
    pub relay_gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_pair_indexes() -> Vec<u32> {
    vec![0]
}

fn default_chain_type() -> String {
    "evm".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_delivery_timeout_ms() -> u64 {
    600_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_sweep_max_age_secs() -> u64 {
    86_400
}

fn default_relay_gas_limit() -> u64 {
    200_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            sweep_max_age_secs: default_sweep_max_age_secs(),
            relay_gas_limit: default_relay_gas_limit(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl MonitorConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn sweep_max_age(&self) -> Duration {
        Duration::from_secs(self.sweep_max_age_secs)
    }
}

impl OracleConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the configuration file named by TRAVERSE_CONFIG,
    /// falling back to config/default.toml
    pub fn load() -> Result<Self> {
        let config_path = env::var("TRAVERSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.networks.len() < 2 {
            anyhow::bail!("At least two networks must be configured for bridging");
        }

        for network in &self.networks {
            if network.rpc_urls.is_empty() {
                anyhow::bail!("Network {} has no RPC URLs configured", network.name);
            }
            if network.bridge_address.parse::<ethers::types::Address>().is_err() {
                anyhow::bail!(
                    "Network {} has an invalid bridge address: {}",
                    network.name,
                    network.bridge_address
                );
            }
        }

        let mut chain_ids: Vec<u64> = self.networks.iter().map(|n| n.chain_id).collect();
        chain_ids.sort_unstable();
        chain_ids.dedup();
        if chain_ids.len() != self.networks.len() {
            anyhow::bail!("Duplicate chain_id in network table");
        }

        if self.oracle.endpoint.is_empty() {
            anyhow::bail!("Oracle endpoint must be configured");
        }
        if self.oracle.max_attempts == 0 {
            anyhow::bail!("oracle.max_attempts must be at least 1");
        }

        Ok(())
    }

    /// Get network config by chain ID
    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
