//! Relay engine
//!
//! Owns the transfer registry and both loops. Construct one explicitly and
//! share it by `Arc`; nothing here is global, so independent engines can run
//! side by side (one per test, for instance).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::attestation::AttestationSource;
use crate::chain::ConnectorSet;
use crate::chains::DomainTable;
use crate::completion::{CompletionSettings, CompletionWorker};
use crate::error::RelayError;
use crate::metrics;
use crate::monitor::AttestationMonitor;
use crate::registry::TransferRegistry;
use crate::types::{RelayStats, Transfer, TransferStatus};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub monitor_interval: Duration,
    pub monitor_error_backoff: Duration,
    pub completion: CompletionSettings,
    /// Exponent used to scale smallest-unit amounts in views and stats
    pub token_decimals: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(5000),
            monitor_error_backoff: Duration::from_millis(10000),
            completion: CompletionSettings::default(),
            token_decimals: 6,
        }
    }
}

pub struct RelayEngine {
    registry: Arc<TransferRegistry>,
    monitor: Arc<AttestationMonitor>,
    completion: Arc<CompletionWorker>,
    token_decimals: u32,
}

impl RelayEngine {
    pub fn new(
        domains: DomainTable,
        source: Arc<dyn AttestationSource>,
        connectors: ConnectorSet,
        settings: EngineSettings,
    ) -> Self {
        let registry = Arc::new(TransferRegistry::new(domains));
        let monitor = AttestationMonitor::new(
            registry.clone(),
            source,
            settings.monitor_interval,
            settings.monitor_error_backoff,
        );
        let completion = CompletionWorker::new(registry.clone(), connectors, settings.completion);

        Self {
            registry,
            monitor: Arc::new(monitor),
            completion: Arc::new(completion),
            token_decimals: settings.token_decimals,
        }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    pub fn domains(&self) -> &DomainTable {
        self.registry.domains()
    }

    pub fn monitor(&self) -> &AttestationMonitor {
        &self.monitor
    }

    pub fn completion(&self) -> &CompletionWorker {
        &self.completion
    }

    pub fn token_decimals(&self) -> u32 {
        self.token_decimals
    }

    /// Register a burn and check its attestation right away
    ///
    /// A failed immediate check is only logged; the monitor loop picks the
    /// transfer up on its next tick. Returns the latest record.
    pub async fn register_transfer(
        &self,
        tx_hash: &str,
        source_domain: u32,
        dest_domain: u32,
    ) -> Result<Transfer, RelayError> {
        let registration = self
            .registry
            .register(tx_hash, source_domain, dest_domain)
            .await?;

        if !registration.is_new() {
            return Ok(registration.into_transfer());
        }
        metrics::record_registered();

        let key = registration.transfer().tx_hash.clone();
        if let Err(e) = self.monitor.check(&key).await {
            warn!(tx_hash = %key, error = %e, "Initial attestation check failed");
        }

        Ok(self
            .registry
            .get(&key)
            .await
            .unwrap_or_else(|| registration.into_transfer()))
    }

    pub async fn get_transfer(&self, tx_hash: &str) -> Option<Transfer> {
        self.registry.get(tx_hash).await
    }

    pub async fn list_transfers(&self) -> Vec<Transfer> {
        self.registry.list().await
    }

    pub async fn stats(&self) -> RelayStats {
        let stats = self.registry.stats(self.token_decimals).await;
        metrics::set_status_counts(&[
            (TransferStatus::Pending, stats.pending),
            (TransferStatus::Attested, stats.attested),
            (TransferStatus::Completing, stats.completing),
            (TransferStatus::Completed, stats.completed),
            (TransferStatus::Failed, stats.failed),
        ]);
        stats
    }

    /// Spawn both loops onto the current runtime
    pub fn start(&self) -> EngineHandle {
        let (monitor_tx, monitor_rx) = mpsc::channel(1);
        let (completion_tx, completion_rx) = mpsc::channel(1);
        let mut tasks = JoinSet::new();

        let monitor = self.monitor.clone();
        tasks.spawn(async move { monitor.run(monitor_rx).await });
        let completion = self.completion.clone();
        tasks.spawn(async move { completion.run(completion_rx).await });

        info!("Relay engine started");
        EngineHandle {
            monitor_tx,
            completion_tx,
            tasks,
        }
    }
}

/// Stop handle for a running engine
pub struct EngineHandle {
    monitor_tx: mpsc::Sender<()>,
    completion_tx: mpsc::Sender<()>,
    tasks: JoinSet<()>,
}

impl EngineHandle {
    /// Stop scheduling new ticks and wait for in-flight ones to finish
    pub async fn stop(mut self) {
        let _ = self.monitor_tx.send(()).await;
        let _ = self.completion_tx.send(()).await;

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Relay loop task failed: {:?}", e);
            }
        }
        info!("Relay engine stopped");
    }
}
