//! Transfer registry
//!
//! Single source of truth for every transfer the relayer knows about. All
//! mutations happen under one write lock and replace whole fields together,
//! so readers never observe a half-applied transition.

use std::collections::HashMap;

use alloy::primitives::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::attestation::Attestation;
use crate::chains::DomainTable;
use crate::error::RelayError;
use crate::types::{RelayStats, Transfer, TransferPayload, TransferStatus};

/// Result of a registration request
#[derive(Debug, Clone)]
pub enum Registration {
    /// A new record was created in `Pending`
    Created(Transfer),
    /// The hash was already known with the same route; nothing changed
    Existing(Transfer),
}

impl Registration {
    pub fn transfer(&self) -> &Transfer {
        match self {
            Registration::Created(t) | Registration::Existing(t) => t,
        }
    }

    pub fn into_transfer(self) -> Transfer {
        match self {
            Registration::Created(t) | Registration::Existing(t) => t,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Everything needed to submit one completion, taken under the lock
#[derive(Debug, Clone)]
pub struct CompletionJob {
    pub tx_hash: String,
    pub dest_domain: u32,
    pub message: Bytes,
    pub attestation: Bytes,
    pub created_at: DateTime<Utc>,
}

/// Canonical key form for a transaction hash
pub fn normalize_hash(tx_hash: &str) -> String {
    tx_hash.trim().to_lowercase()
}

/// Apply a status change, rejecting anything but a legal forward move
fn transition(transfer: &mut Transfer, next: TransferStatus) -> Result<(), RelayError> {
    if !transfer.status.can_transition_to(next) {
        return Err(RelayError::InvalidTransition {
            tx_hash: transfer.tx_hash.clone(),
            from: transfer.status,
            to: next,
        });
    }
    transfer.status = next;
    Ok(())
}

pub struct TransferRegistry {
    transfers: RwLock<HashMap<String, Transfer>>,
    domains: DomainTable,
}

impl TransferRegistry {
    pub fn new(domains: DomainTable) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            domains,
        }
    }

    pub fn domains(&self) -> &DomainTable {
        &self.domains
    }

    /// Create a `Pending` record for a burn
    ///
    /// Re-registering a known hash with the same route returns the existing
    /// record untouched. A different route for a known hash is a conflict.
    pub async fn register(
        &self,
        tx_hash: &str,
        source_domain: u32,
        dest_domain: u32,
    ) -> Result<Registration, RelayError> {
        if !self.domains.contains(source_domain)
            || !self.domains.contains(dest_domain)
            || source_domain == dest_domain
        {
            return Err(RelayError::InvalidRoute {
                source_domain,
                dest_domain,
            });
        }

        let key = normalize_hash(tx_hash);
        let mut transfers = self.transfers.write().await;

        if let Some(existing) = transfers.get(&key) {
            if existing.source_domain != source_domain || existing.dest_domain != dest_domain {
                return Err(RelayError::RouteConflict { tx_hash: key });
            }
            debug!(tx_hash = %key, status = %existing.status, "Transfer already registered");
            return Ok(Registration::Existing(existing.clone()));
        }

        let transfer = Transfer::new(key.clone(), source_domain, dest_domain);
        transfers.insert(key.clone(), transfer.clone());
        info!(
            tx_hash = %key,
            source_domain,
            dest_domain,
            "Registered transfer"
        );
        Ok(Registration::Created(transfer))
    }

    /// Current snapshot of one transfer
    pub async fn get(&self, tx_hash: &str) -> Option<Transfer> {
        self.transfers
            .read()
            .await
            .get(&normalize_hash(tx_hash))
            .cloned()
    }

    /// Snapshot of every transfer, oldest first
    pub async fn list(&self) -> Vec<Transfer> {
        let mut all: Vec<Transfer> = self.transfers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transfers.read().await.is_empty()
    }

    /// Transfers the monitor still has to poll
    pub async fn awaiting_attestation(&self) -> Vec<Transfer> {
        self.transfers
            .read()
            .await
            .values()
            .filter(|t| t.needs_attestation())
            .cloned()
            .collect()
    }

    /// Hashes of transfers the completion loop may pick up
    pub async fn ready_for_completion(&self) -> Vec<String> {
        self.transfers
            .read()
            .await
            .values()
            .filter(|t| t.is_ready_for_completion())
            .map(|t| t.tx_hash.clone())
            .collect()
    }

    /// Store a completed attestation and move the transfer to `Attested`
    ///
    /// `decoded` is the decoder's verdict on the attested message. On failure
    /// the transfer is still `Attested` but keeps no payload, which holds it
    /// back from completion while the monitor keeps polling.
    ///
    /// Returns `false` when the transfer had already moved past this point, or
    /// when a held transfer gets the same undecodable message again.
    pub async fn record_attestation(
        &self,
        tx_hash: &str,
        attestation: Attestation,
        decoded: Result<TransferPayload, RelayError>,
    ) -> Result<bool, RelayError> {
        let key = normalize_hash(tx_hash);
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(&key)
            .ok_or_else(|| RelayError::TransferNotFound(key.clone()))?;

        if !transfer.needs_attestation() {
            return Ok(false);
        }

        match transfer.status {
            TransferStatus::Pending => transition(transfer, TransferStatus::Attested)?,
            TransferStatus::Attested => {
                // Same unreadable answer as last time
                if let Err(e) = &decoded {
                    if transfer.decode_error.as_deref() == Some(e.to_string().as_str())
                        && transfer.message.as_ref() == Some(&attestation.message)
                    {
                        return Ok(false);
                    }
                }
            }
            TransferStatus::Completing | TransferStatus::Completed | TransferStatus::Failed => {
                return Ok(false)
            }
        }

        transfer.message = Some(attestation.message);
        transfer.attestation = Some(attestation.attestation);
        transfer.event_nonce = attestation.event_nonce;
        match decoded {
            Ok(payload) => {
                transfer.payload = Some(payload);
                transfer.decode_error = None;
            }
            Err(e) => {
                transfer.payload = None;
                transfer.decode_error = Some(e.to_string());
            }
        }
        Ok(true)
    }

    /// Claim an attested transfer for completion by moving it to `Completing`
    ///
    /// This is the only way into `Completing`, and it happens under the write
    /// lock, so at most one caller ever receives a job for a given hash.
    pub async fn begin_completion(&self, tx_hash: &str) -> Result<Option<CompletionJob>, RelayError> {
        let key = normalize_hash(tx_hash);
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(&key)
            .ok_or_else(|| RelayError::TransferNotFound(key.clone()))?;

        if !transfer.is_ready_for_completion() {
            return Ok(None);
        }

        let (message, attestation) = match (&transfer.message, &transfer.attestation) {
            (Some(m), Some(a)) => (m.clone(), a.clone()),
            _ => return Ok(None),
        };

        transition(transfer, TransferStatus::Completing)?;

        Ok(Some(CompletionJob {
            tx_hash: transfer.tx_hash.clone(),
            dest_domain: transfer.dest_domain,
            message,
            attestation,
            created_at: transfer.created_at,
        }))
    }

    /// `Completing -> Completed`, stamping the completion time
    pub async fn mark_completed(
        &self,
        tx_hash: &str,
        completion_tx_hash: String,
    ) -> Result<Transfer, RelayError> {
        let key = normalize_hash(tx_hash);
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(&key)
            .ok_or_else(|| RelayError::TransferNotFound(key.clone()))?;

        transition(transfer, TransferStatus::Completed)?;
        transfer.completion_tx_hash = Some(completion_tx_hash);
        transfer.completed_at = Some(Utc::now());
        Ok(transfer.clone())
    }

    /// Move a non-terminal transfer to `Failed` with a reason
    pub async fn mark_failed(&self, tx_hash: &str, reason: String) -> Result<Transfer, RelayError> {
        let key = normalize_hash(tx_hash);
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(&key)
            .ok_or_else(|| RelayError::TransferNotFound(key.clone()))?;

        transition(transfer, TransferStatus::Failed)?;
        transfer.failure_reason = Some(reason);
        Ok(transfer.clone())
    }

    /// Counts by status and completed volume
    pub async fn stats(&self, decimals: u32) -> RelayStats {
        let snapshot = self.list().await;
        RelayStats::from_transfers(&snapshot, decimals)
    }
}
