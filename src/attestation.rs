//! Attestation service client
//!
//! Queries `GET {base}/v2/messages/{sourceDomain}?transactionHash={hash}`.
//! A 404 or an empty message list means the burn is not indexed yet; that and
//! "indexed but not attested" are ordinary polling outcomes, not errors.

use std::time::Duration;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::RelayError;
use crate::message::decode_hex;

/// Status string the service reports once the attestation is signed
pub const STATUS_COMPLETE: &str = "complete";

/// Protocol artifacts for an attested burn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub message: Bytes,
    pub attestation: Bytes,
    pub event_nonce: Option<String>,
}

/// Outcome of one attestation query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationResult {
    /// The service has not indexed the burn yet
    NotFound,
    /// Indexed, but the attestation is not ready
    Pending { status: Option<String> },
    /// Message, nonce and attestation all present and status is complete
    Attested(Attestation),
    /// Complete, but a field is not valid hex; unreadable fields are left empty
    Undecodable {
        attestation: Attestation,
        error: RelayError,
    },
}

/// Anything that can answer attestation queries
#[async_trait]
pub trait AttestationSource: Send + Sync {
    async fn fetch_attestation(
        &self,
        source_domain: u32,
        tx_hash: &str,
    ) -> Result<AttestationResult, RelayError>;
}

/// `/v2/messages` response body
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    message: Option<String>,
    /// Decimal string in v1, 0x-hex string in v2; occasionally a number
    event_nonce: Option<serde_json::Value>,
    attestation: Option<String>,
    status: Option<String>,
}

fn nonce_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_) => None,
    }
}

/// Interpret a successful `/v2/messages` body
fn interpret(response: MessagesResponse) -> Result<AttestationResult, RelayError> {
    let record = match response.messages.into_iter().next() {
        Some(record) => record,
        None => return Ok(AttestationResult::NotFound),
    };

    let complete = record.status.as_deref() == Some(STATUS_COMPLETE);
    let (message, attestation) = match (record.message, record.attestation) {
        (Some(m), Some(a)) if complete && !m.is_empty() && !a.is_empty() => (m, a),
        _ => {
            return Ok(AttestationResult::Pending {
                status: record.status,
            })
        }
    };

    let event_nonce = record.event_nonce.and_then(nonce_to_string);
    let result = match (decode_hex(&message), decode_hex(&attestation)) {
        (Ok(message), Ok(attestation)) if message.is_empty() || attestation.is_empty() => {
            AttestationResult::Pending {
                status: record.status,
            }
        }
        (Ok(message), Ok(attestation)) => AttestationResult::Attested(Attestation {
            message: Bytes::from(message),
            attestation: Bytes::from(attestation),
            event_nonce,
        }),
        (Err(error), attestation) => AttestationResult::Undecodable {
            attestation: Attestation {
                message: Bytes::new(),
                attestation: Bytes::from(attestation.unwrap_or_default()),
                event_nonce,
            },
            error,
        },
        (Ok(message), Err(error)) => AttestationResult::Undecodable {
            attestation: Attestation {
                message: Bytes::from(message),
                attestation: Bytes::new(),
                event_nonce,
            },
            error,
        },
    };
    Ok(result)
}

/// HTTP client for the attestation service
pub struct IrisClient {
    base_url: String,
    client: Client,
}

impl IrisClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build attestation HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn messages_url(&self, source_domain: u32) -> String {
        format!("{}/v2/messages/{}", self.base_url, source_domain)
    }
}

#[async_trait]
impl AttestationSource for IrisClient {
    async fn fetch_attestation(
        &self,
        source_domain: u32,
        tx_hash: &str,
    ) -> Result<AttestationResult, RelayError> {
        let response = self
            .client
            .get(self.messages_url(source_domain))
            .query(&[("transactionHash", tx_hash)])
            .send()
            .await
            .map_err(|e| RelayError::AttestationService(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(tx_hash = %tx_hash, "Transfer not indexed by attestation service yet");
            return Ok(AttestationResult::NotFound);
        }
        if !status.is_success() {
            return Err(RelayError::AttestationService(format!(
                "unexpected status {} for {}",
                status, tx_hash
            )));
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| RelayError::AttestationService(format!("invalid response body: {}", e)))?;

        interpret(body)
    }
}
