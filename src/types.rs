//! Transfer records and their externally visible views
//!
//! A [`Transfer`] is owned by the registry and only ever copied out as a
//! snapshot. [`TransferStatus`] is the closed set of lifecycle states; every
//! component that branches on it matches exhaustively.

use std::fmt;

use alloy::primitives::{Address, Bytes, U256};
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a relayed transfer
///
/// Legal transitions:
/// `Pending -> Attested -> Completing -> Completed`, and
/// `Pending | Attested | Completing -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Attested,
    Completing,
    Completed,
    Failed,
}

impl TransferStatus {
    /// All statuses in lifecycle order
    pub const ALL: [TransferStatus; 5] = [
        TransferStatus::Pending,
        TransferStatus::Attested,
        TransferStatus::Completing,
        TransferStatus::Completed,
        TransferStatus::Failed,
    ];

    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Attested => "attested",
            TransferStatus::Completing => "completing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        match self {
            TransferStatus::Completed | TransferStatus::Failed => true,
            TransferStatus::Pending | TransferStatus::Attested | TransferStatus::Completing => {
                false
            }
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Pending, Attested) => true,
            (Attested, Completing) => true,
            (Completing, Completed) => true,
            (Pending | Attested | Completing, Failed) => true,
            (Pending | Attested | Completing | Completed | Failed, _) => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Transfer record
// ============================================================================

/// Recipient and amount recovered from the burn message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    pub recipient: Address,
    /// Amount in the token's smallest unit
    pub amount: U256,
}

/// A burn on a source chain being relayed to its destination chain
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Source chain burn transaction hash (normalised, unique key)
    pub tx_hash: String,
    pub source_domain: u32,
    pub dest_domain: u32,
    pub status: TransferStatus,
    /// Decoded recipient/amount; `None` until a message decodes successfully
    pub payload: Option<TransferPayload>,
    /// Why the last attested message failed to decode, if it did
    pub decode_error: Option<String>,
    pub event_nonce: Option<String>,
    pub message: Option<Bytes>,
    pub attestation: Option<Bytes>,
    /// Destination chain transaction that minted the tokens
    pub completion_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn new(tx_hash: String, source_domain: u32, dest_domain: u32) -> Self {
        Self {
            tx_hash,
            source_domain,
            dest_domain,
            status: TransferStatus::Pending,
            payload: None,
            decode_error: None,
            event_nonce: None,
            message: None,
            attestation: None,
            completion_tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn has_attestation(&self) -> bool {
        self.attestation.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Still needs the attestation service: not yet attested with a usable payload
    pub fn needs_attestation(&self) -> bool {
        match self.status {
            TransferStatus::Pending => true,
            TransferStatus::Attested => self.payload.is_none(),
            TransferStatus::Completing | TransferStatus::Completed | TransferStatus::Failed => {
                false
            }
        }
    }

    /// Attested, decoded, and carrying both protocol artifacts
    pub fn is_ready_for_completion(&self) -> bool {
        match self.status {
            TransferStatus::Attested => {
                self.payload.is_some()
                    && self.message.as_ref().is_some_and(|m| !m.is_empty())
                    && self.has_attestation()
            }
            TransferStatus::Pending
            | TransferStatus::Completing
            | TransferStatus::Completed
            | TransferStatus::Failed => false,
        }
    }

    /// Amount in smallest units, zero until decoded
    pub fn raw_amount(&self) -> U256 {
        self.payload.as_ref().map(|p| p.amount).unwrap_or(U256::ZERO)
    }

    /// Build the caller-facing view, scaling the amount by `10^decimals`
    pub fn view(&self, decimals: u32) -> TransferView {
        TransferView {
            tx_hash: self.tx_hash.clone(),
            status: self.status,
            source_domain: self.source_domain,
            dest_domain: self.dest_domain,
            amount: scale_amount(self.raw_amount(), decimals),
            recipient: self.payload.as_ref().map(|p| format!("{:#x}", p.recipient)),
            event_nonce: self.event_nonce.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            has_attestation: self.has_attestation(),
            completion_tx_hash: self.completion_tx_hash.clone(),
            failure_reason: self.failure_reason.clone(),
            decode_error: self.decode_error.clone(),
        }
    }
}

/// Convert a smallest-unit integer into a decimal token amount
pub fn scale_amount(amount: U256, decimals: u32) -> BigDecimal {
    let digits = BigInt::parse_bytes(amount.to_string().as_bytes(), 10).unwrap_or_default();
    BigDecimal::new(digits, i64::from(decimals))
}

// ============================================================================
// Views
// ============================================================================

/// Transfer as returned by the status API
#[derive(Debug, Clone, Serialize)]
pub struct TransferView {
    pub tx_hash: String,
    pub status: TransferStatus,
    pub source_domain: u32,
    pub dest_domain: u32,
    pub amount: BigDecimal,
    pub recipient: Option<String>,
    pub event_nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub has_attestation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

/// Rollup over every known transfer
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub total_transfers: usize,
    pub pending: usize,
    pub attested: usize,
    pub completing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of completed amounts, scaled to token units
    pub total_volume: BigDecimal,
}

impl RelayStats {
    /// Roll up a snapshot of transfers
    pub fn from_transfers(transfers: &[Transfer], decimals: u32) -> Self {
        let mut stats = RelayStats {
            total_transfers: transfers.len(),
            ..Default::default()
        };
        let mut volume = U256::ZERO;

        for transfer in transfers {
            match transfer.status {
                TransferStatus::Pending => stats.pending += 1,
                TransferStatus::Attested => stats.attested += 1,
                TransferStatus::Completing => stats.completing += 1,
                TransferStatus::Completed => {
                    stats.completed += 1;
                    volume = volume.saturating_add(transfer.raw_amount());
                }
                TransferStatus::Failed => stats.failed += 1,
            }
        }

        stats.total_volume = scale_amount(volume, decimals);
        stats
    }
}
