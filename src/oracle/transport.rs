//! Oracle proof transport
//!
//! The proof service is a black box behind `ProofTransport`: one call in,
//! bytes or an error out. Connection-level concerns (request deadline,
//! message limits, idempotent network retries) belong to implementations,
//! never to the retrying client above.

use crate::config::OracleConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProofTransport: Send + Sync {
    /// Request a signed proof for the given pair indexes
    async fn get_proof(&self, pair_indexes: &[u32], chain_type: &str) -> BridgeResult<Vec<u8>>;
}

#[derive(Serialize)]
struct ProofRequest<'a> {
    pair_indexes: &'a [u32],
    chain_type: &'a str,
}

#[derive(Deserialize)]
struct ProofResponse {
    evm: Option<EvmProof>,
}

#[derive(Deserialize)]
struct EvmProof {
    proof_bytes: String,
}

/// HTTP/JSON transport to the proof service
pub struct HttpProofTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProofTransport {
    pub fn new(config: &OracleConfig) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BridgeError::Oracle(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl ProofTransport for HttpProofTransport {
    async fn get_proof(&self, pair_indexes: &[u32], chain_type: &str) -> BridgeResult<Vec<u8>> {
        let request = ProofRequest {
            pair_indexes,
            chain_type,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| BridgeError::Oracle(format!("proof request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| BridgeError::Oracle(format!("proof service returned error: {}", e)))?;

        let body: ProofResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Oracle(format!("malformed proof response: {}", e)))?;

        let proof = body
            .evm
            .ok_or_else(|| BridgeError::Oracle("proof response missing evm payload".to_string()))?;

        let hex_str = proof.proof_bytes.trim_start_matches("0x");
        hex::decode(hex_str)
            .map_err(|e| BridgeError::Oracle(format!("proof bytes are not valid hex: {}", e)))
    }
}
