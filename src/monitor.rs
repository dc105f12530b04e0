//! Attestation monitor loop
//!
//! Polls the attestation service for every transfer that is not yet attested
//! with a decoded payload. The tick interval is the only retry mechanism: a
//! failed query leaves the transfer untouched until the next tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::attestation::{AttestationResult, AttestationSource};
use crate::error::RelayError;
use crate::message;
use crate::metrics;
use crate::registry::TransferRegistry;
use crate::types::Transfer;

/// Heartbeat every 12 ticks (~60 seconds at the default cadence)
const HEARTBEAT_TICKS: u64 = 12;

/// What one monitor tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub polled: usize,
    pub attested: usize,
    pub errors: usize,
}

pub struct AttestationMonitor {
    registry: Arc<TransferRegistry>,
    source: Arc<dyn AttestationSource>,
    interval: Duration,
    error_backoff: Duration,
}

impl AttestationMonitor {
    pub fn new(
        registry: Arc<TransferRegistry>,
        source: Arc<dyn AttestationSource>,
        interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
            error_backoff,
        }
    }

    /// Poll once for a single transfer by hash
    ///
    /// Returns `Ok(true)` if the attestation changed the record. Transfers
    /// that no longer need an attestation are left alone.
    pub async fn check(&self, tx_hash: &str) -> Result<bool, RelayError> {
        let transfer = self
            .registry
            .get(tx_hash)
            .await
            .ok_or_else(|| RelayError::TransferNotFound(tx_hash.to_string()))?;

        if !transfer.needs_attestation() {
            return Ok(false);
        }
        self.check_transfer(&transfer).await
    }

    async fn check_transfer(&self, transfer: &Transfer) -> Result<bool, RelayError> {
        let result = self
            .source
            .fetch_attestation(transfer.source_domain, &transfer.tx_hash)
            .await?;

        let (attestation, decoded) = match result {
            AttestationResult::NotFound => {
                metrics::record_attestation("not_found");
                debug!(tx_hash = %transfer.tx_hash, "Burn not indexed yet");
                return Ok(false);
            }
            AttestationResult::Pending { status } => {
                metrics::record_attestation("pending");
                debug!(
                    tx_hash = %transfer.tx_hash,
                    status = status.as_deref().unwrap_or("unknown"),
                    "Attestation not ready"
                );
                return Ok(false);
            }
            AttestationResult::Attested(attestation) => {
                let decoded = message::decode(&attestation.message).map(|m| m.payload());
                (attestation, decoded)
            }
            AttestationResult::Undecodable { attestation, error } => (attestation, Err(error)),
        };

        let event_nonce = attestation.event_nonce.clone().unwrap_or_default();
        let outcome = decoded.clone();
        let recorded = self
            .registry
            .record_attestation(&transfer.tx_hash, attestation, decoded)
            .await?;
        if !recorded {
            debug!(tx_hash = %transfer.tx_hash, "Attestation unchanged");
            return Ok(false);
        }

        match outcome {
            Ok(payload) => {
                metrics::record_attestation("attested");
                info!(
                    tx_hash = %transfer.tx_hash,
                    recipient = %payload.recipient,
                    amount = %payload.amount,
                    event_nonce = %event_nonce,
                    "Transfer attested"
                );
            }
            Err(e) => {
                metrics::record_attestation("undecodable");
                warn!(
                    tx_hash = %transfer.tx_hash,
                    error = %e,
                    "Attested message could not be decoded, holding transfer"
                );
            }
        }
        Ok(true)
    }

    /// Run one pass over every transfer awaiting attestation
    ///
    /// Each transfer is checked in turn; an error for one is logged and the
    /// rest of the pass carries on.
    pub async fn tick(&self) -> MonitorReport {
        let candidates = self.registry.awaiting_attestation().await;
        let mut report = MonitorReport {
            polled: candidates.len(),
            ..Default::default()
        };

        for transfer in &candidates {
            match self.check_transfer(transfer).await {
                Ok(true) => report.attested += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    if e.is_transient() {
                        metrics::record_attestation_error();
                        warn!(tx_hash = %transfer.tx_hash, error = %e, "Attestation check failed, will retry");
                    } else {
                        error!(tx_hash = %transfer.tx_hash, error = %e, "Attestation check failed");
                    }
                }
            }
        }

        report
    }

    /// Tick on the configured cadence until a shutdown signal arrives
    ///
    /// The signal is only observed between ticks. A tick that panics is
    /// logged and followed by the longer error backoff.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        let mut cycle_count = 0u64;

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Attestation monitor starting"
        );

        loop {
            cycle_count += 1;

            let delay = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(report) => {
                    if cycle_count % HEARTBEAT_TICKS == 1 {
                        info!(
                            cycle = cycle_count,
                            polled = report.polled,
                            attested = report.attested,
                            errors = report.errors,
                            "Attestation monitor heartbeat"
                        );
                    }
                    self.interval
                }
                Err(_) => {
                    metrics::record_loop_error("monitor");
                    error!(
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "Attestation monitor tick panicked, backing off"
                    );
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping attestation monitor");
                    return;
                }
            }
        }
    }
}
