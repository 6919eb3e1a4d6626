//! Prometheus metrics for the transfer lifecycle
//!
//! Exposes metrics for:
//! - Tracked transfer outcomes and latency
//! - Source-chain submissions and fee quotes
//! - Oracle proof attempts and exhaustion
//! - Observer callback failures

use crate::error::BridgeResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transfer lifecycle metrics
    pub static ref TRANSFERS_TRACKED: CounterVec = register_counter_vec!(
        "traverse_transfers_tracked_total",
        "Total transfers registered for monitoring",
        &["chain_id"]
    ).unwrap();

    pub static ref TRANSFERS_COMPLETED: CounterVec = register_counter_vec!(
        "traverse_transfers_completed_total",
        "Total transfers that reached COMPLETED",
        &["chain_id"]
    ).unwrap();

    pub static ref TRANSFERS_FAILED: CounterVec = register_counter_vec!(
        "traverse_transfers_failed_total",
        "Total transfers that reached FAILED, by error kind",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref TRANSFER_LATENCY: HistogramVec = register_histogram_vec!(
        "traverse_transfer_latency_seconds",
        "Time from tracking to COMPLETED",
        &["chain_id"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    // Submission metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "traverse_transactions_submitted_total",
        "Total source-chain transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref FEE_ESTIMATES: CounterVec = register_counter_vec!(
        "traverse_fee_estimates_total",
        "Total messaging fee quotes",
        &["chain_id"]
    ).unwrap();

    // Oracle metrics
    pub static ref ORACLE_ATTEMPTS: Counter = register_counter!(
        "traverse_oracle_proof_attempts_total",
        "Total proof fetch attempts, including retries"
    ).unwrap();

    pub static ref ORACLE_EXHAUSTED: Counter = register_counter!(
        "traverse_oracle_proof_exhausted_total",
        "Proof fetches that exhausted all attempts"
    ).unwrap();

    // Subscription bus metrics
    pub static ref OBSERVER_PANICS: Counter = register_counter!(
        "traverse_observer_panics_total",
        "Observer callbacks that panicked during notification"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::BridgeError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::BridgeError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_transfer_tracked(chain_id: u64) {
    TRANSFERS_TRACKED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_transfer_completed(chain_id: u64, latency_secs: f64) {
    TRANSFERS_COMPLETED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
    TRANSFER_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_transfer_failed(chain_id: u64, kind: &str) {
    TRANSFERS_FAILED
        .with_label_values(&[&chain_id.to_string(), kind])
        .inc();
}

pub fn record_submission(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_fee_estimate(chain_id: u64) {
    FEE_ESTIMATES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_oracle_attempt() {
    ORACLE_ATTEMPTS.inc();
}

pub fn record_oracle_exhausted() {
    ORACLE_EXHAUSTED.inc();
}

pub fn record_observer_panic() {
    OBSERVER_PANICS.inc();
}
