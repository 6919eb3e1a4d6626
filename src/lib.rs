//! Traverse Bridge - cross-chain transfer lifecycle coordination
//!
//! Coordinates one logical transfer across two independently-finalizing
//! chains: fee estimation and proof-backed submission on the source chain,
//! then per-transfer monitoring through relay delivery to destination
//! confirmation, with timeout and failure classification. Wallet sessions,
//! rendering and endpoint resolution live in the embedding application.

pub mod bridge;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod oracle;

pub use bridge::{BridgeFee, BridgeService, TransferHandle, TransferParams};
pub use coordinator::Coordinator;
pub use chain::{ChainClient, ChainManager, EventSubscription, EvmChain, LogEntry, Receipt};
pub use config::{MonitorConfig, NetworkConfig, OracleConfig, Settings};
pub use error::{
    classify, classify_rpc, user_message, BridgeError, BridgeResult, ClassifiedError, ErrorKind,
};
pub use metrics::MetricsServer;
pub use monitor::{
    transfer_id, Subscription, TrackRequest, TransferId, TransferMonitor, TransferRecord,
    TransferRegistry, TransferStatus,
};
pub use oracle::{HttpProofTransport, OracleClient, Proof, ProofTransport};

/// Initialize tracing for the embedding application
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,traverse_bridge=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
