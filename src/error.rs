//! Relay error taxonomy
//!
//! Per-transfer errors never escape a loop tick; they are logged and, for the
//! completion path, recorded as the transfer's failure reason.

use thiserror::Error;

use crate::types::TransferStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    // ========================================================================
    // Registration
    // ========================================================================
    #[error("Invalid route: domain {source_domain} -> domain {dest_domain}")]
    InvalidRoute { source_domain: u32, dest_domain: u32 },

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Transfer {tx_hash} is already registered with a different route")]
    RouteConflict { tx_hash: String },

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid status transition for {tx_hash}: {from} -> {to}")]
    InvalidTransition {
        tx_hash: String,
        from: TransferStatus,
        to: TransferStatus,
    },

    // ========================================================================
    // Attestation
    // ========================================================================
    #[error("Attestation service error: {0}")]
    AttestationService(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    // ========================================================================
    // Completion
    // ========================================================================
    #[error("No chain connector for destination domain {0}")]
    UnknownDestination(u32),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("No receipt for {tx_hash} after {timeout_secs}s")]
    ReceiptTimeout { tx_hash: String, timeout_secs: u64 },

    #[error("Completion transaction {tx_hash} reverted")]
    ReceiptFailed { tx_hash: String },
}

impl RelayError {
    /// Transient errors leave state untouched and are retried on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::AttestationService(_))
    }
}
