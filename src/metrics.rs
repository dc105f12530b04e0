//! Prometheus metrics for the CCTP relayer
//!
//! Exposed on `/metrics` for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

use crate::types::TransferStatus;

lazy_static! {
    pub static ref TRANSFERS_REGISTERED: Counter = register_counter!(
        "relayer_transfers_registered_total",
        "Total number of transfers registered for relay"
    ).unwrap();

    pub static ref TRANSFERS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "relayer_transfers",
        "Number of tracked transfers by status",
        &["status"]
    ).unwrap();

    // Attestation polling
    pub static ref ATTESTATIONS: CounterVec = register_counter_vec!(
        "relayer_attestations_total",
        "Attestation poll outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref ATTESTATION_ERRORS: Counter = register_counter!(
        "relayer_attestation_errors_total",
        "Attestation queries that failed"
    ).unwrap();

    // Completion
    pub static ref COMPLETIONS: CounterVec = register_counter_vec!(
        "relayer_completions_total",
        "Completion transactions by destination chain and result",
        &["chain", "status"]
    ).unwrap();

    pub static ref COMPLETION_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_completion_latency_seconds",
        "Time from registering a transfer to a mined completion receipt",
        &["chain"],
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]
    ).unwrap();

    pub static ref GAS_ESTIMATION_FALLBACKS: CounterVec = register_counter_vec!(
        "relayer_gas_estimation_fallbacks_total",
        "Times gas estimation failed and the default limit was used",
        &["chain"]
    ).unwrap();

    // Loop health
    pub static ref LOOP_ERRORS: CounterVec = register_counter_vec!(
        "relayer_loop_errors_total",
        "Errors that aborted a whole loop tick",
        &["loop"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

pub fn record_registered() {
    TRANSFERS_REGISTERED.inc();
}

/// Record one attestation poll outcome (`not_found`, `pending`, `attested`, `undecodable`)
pub fn record_attestation(outcome: &str) {
    ATTESTATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_attestation_error() {
    ATTESTATION_ERRORS.inc();
}

/// Record a completion attempt
pub fn record_completion(chain: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    COMPLETIONS.with_label_values(&[chain, status]).inc();
}

pub fn record_completion_latency(chain: &str, seconds: f64) {
    COMPLETION_LATENCY
        .with_label_values(&[chain])
        .observe(seconds);
}

pub fn record_gas_fallback(chain: &str) {
    GAS_ESTIMATION_FALLBACKS.with_label_values(&[chain]).inc();
}

pub fn record_loop_error(loop_name: &str) {
    LOOP_ERRORS.with_label_values(&[loop_name]).inc();
}

/// Refresh the per-status gauges from a stats snapshot
pub fn set_status_counts(counts: &[(TransferStatus, usize)]) {
    for (status, count) in counts {
        TRANSFERS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(*count as f64);
    }
}

/// Encode the default registry in the text exposition format
pub fn encode() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
