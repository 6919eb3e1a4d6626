//! Fee estimation and transfer submission
//!
//! The submission path is strictly ordered: synchronous parameter
//! validation first (no network effects on bad input), then the fee
//! query, then a single source-chain transaction carrying the proof.
//! Submission is not idempotent; a failed transfer is retried only as a
//! brand-new transfer.

pub mod relay;

use crate::chain::{ChainManager, Receipt};
use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::oracle::{OracleClient, Proof};

use ethers::types::{Address, H256, U256};
use ethers::utils::parse_ether;
use std::sync::Arc;
use tracing::info;

/// Caller-supplied transfer request
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub source_chain_id: u64,
    pub dest_chain_id: u64,
    /// Decimal token amount, e.g. "1.5"
    pub amount: String,
    pub receiver: String,
}

/// Messaging cost for one transfer
#[derive(Debug, Clone, Copy)]
pub struct BridgeFee {
    /// Paid in the source chain's native currency
    pub native: U256,
    /// Paid in the relay's auxiliary token (unused, always quoted)
    pub auxiliary: U256,
}

/// Handle to a submitted source-chain transaction
#[derive(Debug, Clone, Copy)]
pub struct TransferHandle {
    pub tx_hash: H256,
    pub source_chain_id: u64,
}

/// Validated, chain-ready transfer parameters
#[derive(Debug, Clone, Copy)]
struct ValidatedTransfer {
    amount_wei: U256,
    receiver: Address,
}

/// Fee estimation and submission service for the source-chain leg
pub struct BridgeService {
    chains: Arc<ChainManager>,
    oracle: Arc<OracleClient>,
    pair_indexes: Vec<u32>,
    relay_gas_limit: u64,
}

impl BridgeService {
    pub fn new(chains: Arc<ChainManager>, oracle: Arc<OracleClient>, settings: &Settings) -> Self {
        Self {
            chains,
            oracle,
            pair_indexes: settings.oracle.pair_indexes.clone(),
            relay_gas_limit: settings.monitor.relay_gas_limit,
        }
    }

    /// Validate transfer parameters without any network call
    pub fn validate_params(&self, params: &TransferParams) -> BridgeResult<()> {
        self.validated(params).map(|_| ())
    }

    fn validated(&self, params: &TransferParams) -> BridgeResult<ValidatedTransfer> {
        let amount_wei = parse_ether(params.amount.as_str())
            .map_err(|_| BridgeError::Validation(format!("invalid amount: {}", params.amount)))?;
        if amount_wei.is_zero() {
            return Err(BridgeError::Validation("amount must be positive".to_string()));
        }

        let receiver: Address = params.receiver.parse().map_err(|_| {
            BridgeError::Validation(format!("invalid receiver address: {}", params.receiver))
        })?;

        if params.source_chain_id == params.dest_chain_id {
            return Err(BridgeError::Validation(
                "source and destination chains must differ".to_string(),
            ));
        }
        for chain_id in [params.source_chain_id, params.dest_chain_id] {
            if !self.chains.is_supported(chain_id) {
                return Err(BridgeError::Validation(format!(
                    "chain {} is not supported",
                    chain_id
                )));
            }
        }

        Ok(ValidatedTransfer {
            amount_wei,
            receiver,
        })
    }

    /// Quote the messaging fee for a transfer
    pub async fn estimate_fee(
        &self,
        source_chain_id: u64,
        dest_chain_id: u64,
        amount: &str,
        receiver: &str,
    ) -> BridgeResult<BridgeFee> {
        let source = self.chains.get(source_chain_id)?;
        let bridge_address = self.chains.bridge_address(source_chain_id)?;
        let dest_network = self.chains.network(dest_chain_id)?;

        let amount_wei = parse_ether(amount)
            .map_err(|_| BridgeError::Validation(format!("invalid amount: {}", amount)))?;
        let receiver: Address = receiver
            .parse()
            .map_err(|_| BridgeError::Validation(format!("invalid receiver address: {}", receiver)))?;

        let data = relay::encode_estimate_fees(
            dest_network.relay_chain_id,
            &relay::encode_receiver(receiver),
            amount_wei,
            &relay::adapter_params(relay::ADAPTER_PARAMS_VERSION, self.relay_gas_limit),
        );

        let out = source.call(bridge_address, data).await?;
        let (native, auxiliary) = relay::decode_estimate_fees(&out)?;

        crate::metrics::record_fee_estimate(source_chain_id);
        Ok(BridgeFee { native, auxiliary })
    }

    /// Submit the source-chain transaction for a transfer.
    ///
    /// Returns once the transaction is accepted into the pending pool;
    /// confirmation is the monitor's job. Never call twice for the same
    /// logical transfer.
    pub async fn submit_transfer(
        &self,
        params: &TransferParams,
        proof: &Proof,
    ) -> BridgeResult<TransferHandle> {
        let validated = self.validated(params)?;

        let fee = self
            .estimate_fee(
                params.source_chain_id,
                params.dest_chain_id,
                &params.amount,
                &params.receiver,
            )
            .await?;

        let source = self.chains.get(params.source_chain_id)?;
        let bridge_address = self.chains.bridge_address(params.source_chain_id)?;
        let dest_network = self.chains.network(params.dest_chain_id)?;

        let data = relay::encode_send_tokens(
            dest_network.relay_chain_id,
            &relay::encode_receiver(validated.receiver),
            validated.amount_wei,
            validated.receiver,
            Address::zero(),
            &relay::adapter_params(relay::ADAPTER_PARAMS_VERSION, self.relay_gas_limit),
            &proof.payload,
        );

        let tx_hash = source
            .send_transaction(bridge_address, data, fee.native)
            .await?;

        crate::metrics::record_submission(params.source_chain_id);
        info!(
            "Submitted transfer {} -> {}: {:?} (fee {})",
            params.source_chain_id, params.dest_chain_id, tx_hash, fee.native
        );

        Ok(TransferHandle {
            tx_hash,
            source_chain_id: params.source_chain_id,
        })
    }

    /// Fetch a fresh proof and submit in one step
    pub async fn execute_transfer(&self, params: &TransferParams) -> BridgeResult<TransferHandle> {
        // Fail fast before the oracle round-trip.
        self.validate_params(params)?;

        let proof = self.oracle.fetch_proof(&self.pair_indexes).await?;
        self.submit_transfer(params, &proof).await
    }

    /// Read-path receipt summary for a submitted transaction
    pub async fn transaction_status(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> BridgeResult<Option<Receipt>> {
        let chain = self.chains.get(chain_id)?;
        chain.transaction_receipt(tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::ScriptedChain;
    use crate::config::{MonitorConfig, NetworkConfig, OracleConfig};
    use crate::error::ErrorKind;
    use crate::oracle::transport::MockProofTransport;

    use ethers::abi::{self, Token};

    const RECEIVER: &str = "0x1111111111111111111111111111111111111111";

    fn network(chain_id: u64, relay_chain_id: u16) -> NetworkConfig {
        NetworkConfig {
            chain_id,
            name: format!("chain-{}", chain_id),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            bridge_address: "0x00000000000000000000000000000000000000aa".to_string(),
            relay_chain_id,
            block_explorer: String::new(),
            confirmation_blocks: 1,
        }
    }

    fn oracle_config() -> OracleConfig {
        OracleConfig {
            endpoint: "https://oracle.example:443".to_string(),
            pair_indexes: vec![0],
            chain_type: "evm".to_string(),
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            request_timeout_secs: 30,
        }
    }

    fn settings() -> Settings {
        Settings {
            networks: vec![network(11155111, 10161), network(80002, 10109)],
            oracle: oracle_config(),
            monitor: MonitorConfig::default(),
            metrics: Default::default(),
            wallet: Default::default(),
        }
    }

    fn service(transport: MockProofTransport) -> (BridgeService, Arc<ScriptedChain>) {
        let settings = settings();
        let chains = Arc::new(ChainManager::new());
        let source = Arc::new(ScriptedChain::new(11155111));
        chains.register(settings.networks[0].clone(), source.clone());
        chains.register(
            settings.networks[1].clone(),
            Arc::new(ScriptedChain::new(80002)),
        );

        let oracle = Arc::new(OracleClient::with_transport(
            settings.oracle.clone(),
            Arc::new(transport),
        ));
        (BridgeService::new(chains, oracle, &settings), source)
    }

    fn params() -> TransferParams {
        TransferParams {
            source_chain_id: 11155111,
            dest_chain_id: 80002,
            amount: "1.5".to_string(),
            receiver: RECEIVER.to_string(),
        }
    }

    fn proof() -> Proof {
        Proof {
            payload: vec![0xab; 16],
            pair_indexes: vec![0],
        }
    }

    fn fee_response(native: u64) -> ethers::types::Bytes {
        abi::encode(&[
            Token::Uint(U256::from(native)),
            Token::Uint(U256::zero()),
        ])
        .into()
    }

    #[tokio::test]
    async fn rejects_invalid_input_before_any_network_call() {
        let (service, source) = service(MockProofTransport::new());

        let cases = vec![
            TransferParams {
                amount: "0".to_string(),
                ..params()
            },
            TransferParams {
                amount: "not-a-number".to_string(),
                ..params()
            },
            TransferParams {
                receiver: "0x1234".to_string(),
                ..params()
            },
            TransferParams {
                dest_chain_id: 11155111,
                ..params()
            },
            TransferParams {
                dest_chain_id: 424242,
                ..params()
            },
        ];

        for bad in cases {
            let err = service.submit_transfer(&bad, &proof()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "case: {:?}", bad);
        }

        assert!(source.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn estimates_fee_from_source_chain() {
        let (service, source) = service(MockProofTransport::new());
        source.set_call_response(Ok(fee_response(1_000)));

        let fee = service
            .estimate_fee(11155111, 80002, "1.5", RECEIVER)
            .await
            .unwrap();
        assert_eq!(fee.native, U256::from(1_000u64));
        assert_eq!(fee.auxiliary, U256::zero());
    }

    #[tokio::test]
    async fn unsupported_source_chain_is_a_chain_error() {
        let (service, _) = service(MockProofTransport::new());
        let err = service
            .estimate_fee(424242, 80002, "1.5", RECEIVER)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Chain);
    }

    #[tokio::test]
    async fn submits_one_transaction_paying_the_native_fee() {
        let (service, source) = service(MockProofTransport::new());
        source.set_call_response(Ok(fee_response(1_000)));
        source.set_send_response(Ok(H256::from_low_u64_be(0xbeef)));

        let handle = service.submit_transfer(&params(), &proof()).await.unwrap();
        assert_eq!(handle.tx_hash, H256::from_low_u64_be(0xbeef));
        assert_eq!(handle.source_chain_id, 11155111);

        let sent = source.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, data, value) = &sent[0];
        assert_eq!(*to, "0x00000000000000000000000000000000000000aa".parse().unwrap());
        assert_eq!(*value, U256::from(1_000u64));
        // Calldata carries the selector plus ABI-encoded arguments.
        assert!(data.len() > 4);
    }

    #[tokio::test]
    async fn execute_transfer_fetches_proof_then_submits() {
        let mut transport = MockProofTransport::new();
        transport
            .expect_get_proof()
            .times(1)
            .returning(|_, _| Ok(vec![0x01, 0x02]));

        let (service, source) = service(transport);
        source.set_call_response(Ok(fee_response(77)));

        let handle = service.execute_transfer(&params()).await.unwrap();
        assert_eq!(handle.source_chain_id, 11155111);
        assert_eq!(source.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execute_transfer_skips_oracle_on_invalid_params() {
        // A strict mock with no expectations panics on any call.
        let (service, _) = service(MockProofTransport::new());
        let err = service
            .execute_transfer(&TransferParams {
                amount: "0".to_string(),
                ..params()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
