//! Service composition and lifecycle
//!
//! Wires the chain manager, oracle client, bridge service and transfer
//! monitor into one explicitly constructed unit owned by the embedding
//! application. The upkeep loop runs periodic registry sweeps and the
//! metrics endpoint until `stop` is called; in-flight monitor tasks always
//! run to their terminal states regardless of shutdown.

use crate::bridge::BridgeService;
use crate::chain::ChainManager;
use crate::config::Settings;
use crate::error::BridgeResult;
use crate::metrics::MetricsServer;
use crate::monitor::TransferMonitor;
use crate::oracle::OracleClient;

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Interval between registry sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// How often the upkeep loop re-checks the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// The composed transfer lifecycle coordinator
pub struct Coordinator {
    chains: Arc<ChainManager>,
    oracle: Arc<OracleClient>,
    bridge: Arc<BridgeService>,
    monitor: Arc<TransferMonitor>,
    settings: Settings,
    shutdown: Arc<RwLock<bool>>,
}

impl Coordinator {
    /// Build every service from the configuration
    pub fn from_settings(settings: Settings) -> BridgeResult<Self> {
        let chains = Arc::new(ChainManager::from_settings(&settings)?);
        let oracle = Arc::new(OracleClient::new(settings.oracle.clone())?);
        Ok(Self::with_parts(chains, oracle, settings))
    }

    /// Compose pre-built collaborators. Tests use this to inject scripted
    /// chains and a mock oracle transport.
    pub fn with_parts(
        chains: Arc<ChainManager>,
        oracle: Arc<OracleClient>,
        settings: Settings,
    ) -> Self {
        let bridge = Arc::new(BridgeService::new(chains.clone(), oracle.clone(), &settings));
        let monitor = Arc::new(TransferMonitor::new(chains.clone(), settings.monitor.clone()));

        Self {
            chains,
            oracle,
            bridge,
            monitor,
            settings,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn bridge(&self) -> Arc<BridgeService> {
        self.bridge.clone()
    }

    pub fn monitor(&self) -> Arc<TransferMonitor> {
        self.monitor.clone()
    }

    pub fn oracle(&self) -> Arc<OracleClient> {
        self.oracle.clone()
    }

    pub fn chains(&self) -> Arc<ChainManager> {
        self.chains.clone()
    }

    /// Background upkeep loop. Sweeps terminal records on a fixed interval
    /// and serves `/metrics` when enabled; runs until `stop` is called.
    pub async fn run(&self) -> BridgeResult<()> {
        let metrics_handle = if self.settings.metrics.enabled {
            let server = MetricsServer::new(self.settings.metrics.port);
            Some(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        } else {
            None
        };

        let mut sweep_interval = interval(SWEEP_INTERVAL);

        info!("Coordinator started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = sweep_interval.tick() => {
                    let swept = self.monitor.sweep();
                    if swept > 0 {
                        debug!("Swept {} terminal transfers", swept);
                    }
                }
                _ = tokio::time::sleep(SHUTDOWN_POLL) => {}
            }
        }

        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        info!("Coordinator stopped");
        Ok(())
    }

    /// Request shutdown of the upkeep loop. Monitoring tasks for tracked
    /// transfers are not cancelled.
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Coordinator shutdown initiated");
    }
}
