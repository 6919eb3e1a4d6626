//! Oracle proof client with bounded retry and exponential backoff
//!
//! The client makes up to `max_attempts` independent attempts against the
//! transport, doubling the delay between attempts up to a cap. The attempt
//! count is the hard bound on application-level retries; whatever the
//! transport does internally does not extend it.

pub mod transport;

pub use transport::{HttpProofTransport, ProofTransport};

use crate::config::OracleConfig;
use crate::error::{BridgeError, BridgeResult};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A signed price proof, consumed once per submission attempt
#[derive(Debug, Clone)]
pub struct Proof {
    pub payload: Vec<u8>,
    pub pair_indexes: Vec<u32>,
}

impl Proof {
    /// Hex encoding for contract consumption
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.payload))
    }
}

/// Retrying client over a proof transport. Holds no state across calls;
/// safe to share between concurrent submissions.
pub struct OracleClient {
    transport: Arc<dyn ProofTransport>,
    config: OracleConfig,
}

impl OracleClient {
    /// Client backed by the HTTP transport from the configuration
    pub fn new(config: OracleConfig) -> BridgeResult<Self> {
        let transport = Arc::new(HttpProofTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Client over an explicit transport
    pub fn with_transport(config: OracleConfig, transport: Arc<dyn ProofTransport>) -> Self {
        Self { transport, config }
    }

    /// Fetch a proof for the given pair indexes.
    ///
    /// Returns on the first successful attempt; after exhausting all
    /// attempts the last underlying error is surfaced.
    pub async fn fetch_proof(&self, pair_indexes: &[u32]) -> BridgeResult<Proof> {
        let max_attempts = self.config.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            crate::metrics::record_oracle_attempt();

            match self
                .transport
                .get_proof(pair_indexes, &self.config.chain_type)
                .await
            {
                Ok(payload) if !payload.is_empty() => {
                    debug!(
                        "Received proof for pairs {:?} on attempt {}/{}",
                        pair_indexes, attempt, max_attempts
                    );
                    return Ok(Proof {
                        payload,
                        pair_indexes: pair_indexes.to_vec(),
                    });
                }
                Ok(_) => {
                    last_error = "empty proof payload".to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.backoff_delay(attempt);
                warn!(
                    "Proof fetch attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, last_error, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        crate::metrics::record_oracle_exhausted();
        Err(BridgeError::Oracle(format!(
            "proof fetch failed after {} attempts: {}",
            max_attempts, last_error
        )))
    }

    /// Delay before the attempt following `attempt`: doubles each attempt,
    /// capped at the configured maximum
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .config
            .initial_backoff()
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.config.max_backoff())
    }
}
