//! Completion loop
//!
//! Claims attested transfers, submits `receiveMessage` on the destination
//! chain and waits for the receipt. Every claimed transfer ends in
//! `Completed` or `Failed`; a failed completion is never retried.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainConnector, CompletionTx, ConnectorSet};
use crate::error::RelayError;
use crate::metrics;
use crate::registry::{CompletionJob, TransferRegistry};

/// Heartbeat every 30 ticks (~60 seconds at the default cadence)
const HEARTBEAT_TICKS: u64 = 30;

/// Tunables for the completion path
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
    pub receipt_timeout: Duration,
    /// Delay between receipt lookups while waiting
    pub receipt_poll_interval: Duration,
    pub default_gas_limit: u64,
    pub gas_buffer_percent: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            error_backoff: Duration::from_millis(5000),
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            default_gas_limit: 300_000,
            gas_buffer_percent: 20,
        }
    }
}

/// Add `percent` on top of a gas figure, saturating at `u64::MAX`
pub fn gas_with_buffer(gas: u64, percent: u64) -> u64 {
    let buffered = u128::from(gas) * (100 + u128::from(percent)) / 100;
    u64::try_from(buffered).unwrap_or(u64::MAX)
}

/// What one completion tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct CompletionWorker {
    registry: Arc<TransferRegistry>,
    connectors: ConnectorSet,
    settings: CompletionSettings,
}

impl CompletionWorker {
    pub fn new(
        registry: Arc<TransferRegistry>,
        connectors: ConnectorSet,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            registry,
            connectors,
            settings,
        }
    }

    /// Claim and complete every transfer that is ready
    ///
    /// Transfers are handled one after another. A hash another tick already
    /// claimed is skipped, and a transfer that fails or panics does not stop
    /// the rest of the pass.
    pub async fn tick(&self) -> CompletionReport {
        let ready = self.registry.ready_for_completion().await;
        let mut report = CompletionReport::default();

        for tx_hash in ready {
            let job = match self.registry.begin_completion(&tx_hash).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %e, "Failed to claim transfer");
                    continue;
                }
            };

            report.claimed += 1;
            let tx_hash = job.tx_hash.clone();
            match AssertUnwindSafe(self.complete(job)).catch_unwind().await {
                Ok(true) => report.completed += 1,
                Ok(false) => report.failed += 1,
                Err(_) => {
                    // A claimed transfer must not stay in Completing
                    report.failed += 1;
                    error!(tx_hash = %tx_hash, "Completion panicked");
                    if let Err(e) = self
                        .registry
                        .mark_failed(&tx_hash, "completion panicked".to_string())
                        .await
                    {
                        error!(tx_hash = %tx_hash, error = %e, "Failed to record failure");
                    }
                }
            }
        }

        report
    }

    /// Drive a claimed transfer to a terminal state
    ///
    /// Returns `true` when the transfer ended `Completed`.
    pub async fn complete(&self, job: CompletionJob) -> bool {
        let chain = self
            .connectors
            .get(job.dest_domain)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| job.dest_domain.to_string());

        match self.submit(&job).await {
            Ok(completion_tx) => {
                let completion_tx = format!("{:#x}", completion_tx);
                match self
                    .registry
                    .mark_completed(&job.tx_hash, completion_tx.clone())
                    .await
                {
                    Ok(_) => {
                        let elapsed = (Utc::now() - job.created_at)
                            .to_std()
                            .unwrap_or_default()
                            .as_secs_f64();
                        metrics::record_completion(&chain, true);
                        metrics::record_completion_latency(&chain, elapsed);
                        info!(
                            tx_hash = %job.tx_hash,
                            completion_tx = %completion_tx,
                            chain = %chain,
                            elapsed_secs = elapsed,
                            "Transfer completed"
                        );
                        true
                    }
                    Err(e) => {
                        error!(tx_hash = %job.tx_hash, error = %e, "Failed to record completion");
                        false
                    }
                }
            }
            Err(e) => {
                metrics::record_completion(&chain, false);
                error!(tx_hash = %job.tx_hash, chain = %chain, error = %e, "Completion failed");
                if let Err(mark_err) = self.registry.mark_failed(&job.tx_hash, e.to_string()).await {
                    error!(tx_hash = %job.tx_hash, error = %mark_err, "Failed to record failure");
                }
                false
            }
        }
    }

    async fn submit(&self, job: &CompletionJob) -> Result<B256, RelayError> {
        let connector = self
            .connectors
            .get(job.dest_domain)
            .ok_or(RelayError::UnknownDestination(job.dest_domain))?;

        let chain_id = connector
            .chain_id()
            .await
            .map_err(|e| RelayError::Submission(format!("failed to read chain id: {}", e)))?;
        let nonce = connector
            .nonce()
            .await
            .map_err(|e| RelayError::Submission(format!("failed to read nonce: {}", e)))?;
        let gas_price = connector
            .gas_price()
            .await
            .map_err(|e| RelayError::Submission(format!("failed to read gas price: {}", e)))?;

        let estimated = match connector
            .estimate_receive_gas(&job.message, &job.attestation)
            .await
        {
            Ok(gas) => gas,
            Err(e) => {
                let err = RelayError::GasEstimation(e.to_string());
                metrics::record_gas_fallback(connector.name());
                warn!(
                    tx_hash = %job.tx_hash,
                    error = %err,
                    default_gas_limit = self.settings.default_gas_limit,
                    "Using default gas limit"
                );
                self.settings.default_gas_limit
            }
        };
        let gas_limit = gas_with_buffer(estimated, self.settings.gas_buffer_percent);

        let tx = CompletionTx {
            message: job.message.clone(),
            attestation: job.attestation.clone(),
            nonce,
            gas_limit,
            gas_price,
            chain_id,
        };
        let completion_tx = connector
            .submit_receive(tx)
            .await
            .map_err(|e| RelayError::Submission(e.to_string()))?;

        info!(
            tx_hash = %job.tx_hash,
            completion_tx = %completion_tx,
            chain = %connector.name(),
            nonce,
            gas_limit,
            "Submitted completion transaction"
        );

        let receipt = tokio::time::timeout(
            self.settings.receipt_timeout,
            self.wait_for_receipt(connector.as_ref(), completion_tx),
        )
        .await;

        match receipt {
            Ok(true) => Ok(completion_tx),
            Ok(false) => Err(RelayError::ReceiptFailed {
                tx_hash: format!("{:#x}", completion_tx),
            }),
            Err(_) => Err(RelayError::ReceiptTimeout {
                tx_hash: format!("{:#x}", completion_tx),
                timeout_secs: self.settings.receipt_timeout.as_secs(),
            }),
        }
    }

    /// Poll until the receipt shows up; the caller bounds this with a timeout
    async fn wait_for_receipt(&self, connector: &dyn ChainConnector, tx_hash: B256) -> bool {
        loop {
            match connector.receipt_status(tx_hash).await {
                Ok(Some(success)) => return success,
                Ok(None) => debug!(tx_hash = %tx_hash, "Receipt not available yet"),
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed, retrying"),
            }
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
    }

    /// Tick on the configured cadence until a shutdown signal arrives
    ///
    /// The signal is only observed between ticks, so an in-flight receipt
    /// wait always finishes.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        let mut cycle_count = 0u64;

        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            chains = self.connectors.len(),
            "Completion worker starting"
        );

        loop {
            cycle_count += 1;

            let delay = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(report) => {
                    if cycle_count % HEARTBEAT_TICKS == 1 {
                        info!(
                            cycle = cycle_count,
                            claimed = report.claimed,
                            completed = report.completed,
                            failed = report.failed,
                            "Completion worker heartbeat"
                        );
                    }
                    self.settings.interval
                }
                Err(_) => {
                    metrics::record_loop_error("completion");
                    error!(
                        backoff_ms = self.settings.error_backoff.as_millis() as u64,
                        "Completion tick panicked, backing off"
                    );
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping completion worker");
                    return;
                }
            }
        }
    }
}
