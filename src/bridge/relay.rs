//! Relay message helpers
//!
//! Encoding for the bridge contract's relay-facing surface: adapter
//! parameters, packed receiver addresses, calldata for the fee query and
//! the transfer send, and the correlation key used to match a destination
//! completion event back to the transfer that caused it.

use crate::error::{BridgeError, BridgeResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

/// Adapter parameter format version understood by the relay endpoint
pub const ADAPTER_PARAMS_VERSION: u16 = 1;

const ESTIMATE_FEES_SIG: &str = "estimateFees(uint16,bytes,uint256,bool,bytes)";
const SEND_TOKENS_SIG: &str = "sendTokens(uint16,bytes,uint256,address,address,bytes,bytes)";
const TRANSFER_COMPLETED_SIG: &str = "TransferCompleted(bytes32,address,uint256)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Packed `(uint16 version, uint256 gas_limit)` adapter parameters
pub fn adapter_params(version: u16, gas_limit: u64) -> Bytes {
    let mut out = Vec::with_capacity(34);
    out.extend_from_slice(&version.to_be_bytes());
    let mut buf = [0u8; 32];
    U256::from(gas_limit).to_big_endian(&mut buf);
    out.extend_from_slice(&buf);
    out.into()
}

/// Packed receiver address for the destination chain
pub fn encode_receiver(receiver: Address) -> Bytes {
    receiver.as_bytes().to_vec().into()
}

/// Correlation key tying a destination completion event to one transfer:
/// `keccak256(uint256 source_chain_id || bytes32 source_tx_hash)`
pub fn correlation_key(source_chain_id: u64, tx_hash: H256) -> H256 {
    let mut buf = [0u8; 64];
    U256::from(source_chain_id).to_big_endian(&mut buf[..32]);
    buf[32..].copy_from_slice(tx_hash.as_bytes());
    H256::from(keccak256(buf))
}

/// Topic of the destination-side completion event. The correlation key is
/// the event's first indexed parameter.
pub fn completion_event_topic() -> H256 {
    H256::from(keccak256(TRANSFER_COMPLETED_SIG.as_bytes()))
}

/// Calldata for the fee-estimation view call
pub fn encode_estimate_fees(
    relay_dest_id: u16,
    receiver: &Bytes,
    amount: U256,
    adapter: &Bytes,
) -> Bytes {
    let encoded = abi::encode(&[
        Token::Uint(U256::from(relay_dest_id)),
        Token::Bytes(receiver.to_vec()),
        Token::Uint(amount),
        Token::Bool(false),
        Token::Bytes(adapter.to_vec()),
    ]);

    let mut data = selector(ESTIMATE_FEES_SIG).to_vec();
    data.extend_from_slice(&encoded);
    data.into()
}

/// Decode the `(nativeFee, auxFee)` pair returned by the fee query
pub fn decode_estimate_fees(data: &[u8]) -> BridgeResult<(U256, U256)> {
    let tokens = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], data)
        .map_err(|e| BridgeError::Internal(format!("bad fee response: {}", e)))?;

    match (tokens[0].clone().into_uint(), tokens[1].clone().into_uint()) {
        (Some(native), Some(auxiliary)) => Ok((native, auxiliary)),
        _ => Err(BridgeError::Internal("bad fee response tokens".to_string())),
    }
}

/// Calldata for the transfer submission
#[allow(clippy::too_many_arguments)]
pub fn encode_send_tokens(
    relay_dest_id: u16,
    receiver: &Bytes,
    amount: U256,
    refund_address: Address,
    aux_payment_address: Address,
    adapter: &Bytes,
    proof: &[u8],
) -> Bytes {
    let encoded = abi::encode(&[
        Token::Uint(U256::from(relay_dest_id)),
        Token::Bytes(receiver.to_vec()),
        Token::Uint(amount),
        Token::Address(refund_address),
        Token::Address(aux_payment_address),
        Token::Bytes(adapter.to_vec()),
        Token::Bytes(proof.to_vec()),
    ]);

    let mut data = selector(SEND_TOKENS_SIG).to_vec();
    data.extend_from_slice(&encoded);
    data.into()
}

/// Decoded body of a completion event
#[derive(Debug, Clone)]
pub struct CompletionPayload {
    pub to_address: Address,
    pub amount: U256,
    pub price: U256,
}

/// Decode the non-indexed data of a completion event
pub fn decode_completion_payload(data: &[u8]) -> BridgeResult<CompletionPayload> {
    let tokens = abi::decode(
        &[
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
        data,
    )
    .map_err(|e| BridgeError::Internal(format!("bad completion payload: {}", e)))?;

    match (
        tokens[0].clone().into_address(),
        tokens[1].clone().into_uint(),
        tokens[2].clone().into_uint(),
    ) {
        (Some(to_address), Some(amount), Some(price)) => Ok(CompletionPayload {
            to_address,
            amount,
            price,
        }),
        _ => Err(BridgeError::Internal(
            "bad completion payload tokens".to_string(),
        )),
    }
}
