//! Error types and failure classification for the bridge coordinator

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the bridge coordinator
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid transfer parameters: {0}")]
    Validation(String),

    #[error("Chain {chain_id} is not in the supported network set")]
    UnsupportedChain { chain_id: u64 },

    #[error("Chain error on chain {chain_id}: {message}")]
    Chain { chain_id: u64, message: String },

    #[error("Transaction rejected by user")]
    UserRejected,

    #[error("Insufficient funds on chain {chain_id}")]
    InsufficientFunds { chain_id: u64 },

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Source transaction {tx_hash:#x} reverted on chain {chain_id}")]
    SourceTxFailed { chain_id: u64, tx_hash: H256 },

    #[error("No completion signal for transfer {transfer_id} within {timeout_ms}ms")]
    DeliveryTimeout {
        transfer_id: String,
        timeout_ms: u64,
    },

    #[error("Monitoring error for transfer {transfer_id}: {message}")]
    Monitor {
        transfer_id: String,
        message: String,
    },

    #[error("Transfer {transfer_id} is already tracked")]
    Duplicate { transfer_id: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if error is retryable at the transport level
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Chain { .. } | BridgeError::Oracle(_))
    }

    /// Classification of this error into the fixed taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation(_) | BridgeError::Duplicate { .. } => ErrorKind::Validation,
            BridgeError::UserRejected => ErrorKind::UserRejected,
            BridgeError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            BridgeError::SourceTxFailed { .. } => ErrorKind::SourceTxFailed,
            BridgeError::Oracle(_) => ErrorKind::Oracle,
            BridgeError::DeliveryTimeout { .. } => ErrorKind::DeliveryTimeout,
            BridgeError::Monitor { .. } => ErrorKind::Monitor,
            BridgeError::UnsupportedChain { .. } | BridgeError::Chain { .. } => ErrorKind::Chain,
            BridgeError::Config(_) | BridgeError::Wallet(_) | BridgeError::Internal(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Closed taxonomy of failure kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    UserRejected,
    InsufficientFunds,
    SourceTxFailed,
    Oracle,
    DeliveryTimeout,
    Monitor,
    Chain,
    Unknown,
}

impl ErrorKind {
    /// Stable label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UserRejected => "user_rejected",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::SourceTxFailed => "source_tx_failed",
            ErrorKind::Oracle => "oracle_error",
            ErrorKind::DeliveryTimeout => "delivery_timeout",
            ErrorKind::Monitor => "monitor_error",
            ErrorKind::Chain => "chain_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A classified failure attached to a terminal FAILED transfer.
///
/// `cause` retains the raw underlying error text for diagnostics; it is
/// never used as the user-facing message.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, cause: Option<String>) -> Self {
        Self {
            kind,
            message: user_message(kind).to_string(),
            cause,
            timestamp: Utc::now(),
        }
    }
}

/// Classify a crate error into a `ClassifiedError`, retaining the original
/// error text as the diagnostic cause.
pub fn classify(error: &BridgeError) -> ClassifiedError {
    ClassifiedError::new(error.kind(), Some(error.to_string()))
}

/// Classify a raw provider/wallet failure from its JSON-RPC error code and
/// message text. Unmatched inputs fall back to `Unknown`, never panic.
pub fn classify_rpc(code: Option<i64>, message: &str) -> ErrorKind {
    if code == Some(4001) {
        return ErrorKind::UserRejected;
    }
    let lowered = message.to_lowercase();
    if code == Some(-32603) && lowered.contains("insufficient funds") {
        return ErrorKind::InsufficientFunds;
    }
    if lowered.contains("insufficient funds") {
        return ErrorKind::InsufficientFunds;
    }
    if lowered.contains("user rejected") || lowered.contains("user denied") {
        return ErrorKind::UserRejected;
    }
    if lowered.contains("execution reverted") {
        return ErrorKind::SourceTxFailed;
    }
    if lowered.contains("relay") || lowered.contains("message delivery") {
        return ErrorKind::Monitor;
    }
    if lowered.contains("network") || lowered.contains("connection") || lowered.contains("timeout")
    {
        return ErrorKind::Chain;
    }
    ErrorKind::Unknown
}

/// Stable human-readable message for each error kind. Total over the
/// taxonomy; raw underlying errors never leak into these strings.
pub fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "Invalid transfer parameters. Check the amount, receiver address and selected networks.",
        ErrorKind::UserRejected => "Transaction was rejected in the wallet.",
        ErrorKind::InsufficientFunds => "Insufficient funds to complete the transfer. Ensure you have enough tokens and gas.",
        ErrorKind::SourceTxFailed => "The source chain transaction failed. No funds were bridged.",
        ErrorKind::Oracle => "Unable to fetch current price data. Please try again later.",
        ErrorKind::DeliveryTimeout => "Cross-chain message delivery timed out. The transfer did not complete.",
        ErrorKind::Monitor => "An error occurred while tracking the transfer.",
        ErrorKind::Chain => "A network error occurred. Please check your connection and try again.",
        ErrorKind::Unknown => "An error occurred. Please try again later.",
    }
}
