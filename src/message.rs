//! Burn message decoding
//!
//! Fixed-offset layout, big-endian, no padding:
//!
//! | offset | size | field              |
//! |--------|------|--------------------|
//! | 0      | 4    | version            |
//! | 4      | 4    | source domain      |
//! | 8      | 4    | destination domain |
//! | 12     | 32   | nonce              |
//! | 44     | 32   | sender             |
//! | 76     | 32   | recipient          |
//! | 108    | 32   | amount             |
//!
//! Anything shorter than 140 bytes is rejected outright.

use alloy::primitives::{Address, FixedBytes, U256};

use crate::error::RelayError;
use crate::types::TransferPayload;

const VERSION_OFFSET: usize = 0;
const SOURCE_DOMAIN_OFFSET: usize = 4;
const DEST_DOMAIN_OFFSET: usize = 8;
const NONCE_OFFSET: usize = 12;
const SENDER_OFFSET: usize = 44;
const RECIPIENT_OFFSET: usize = 76;
const AMOUNT_OFFSET: usize = 108;

/// Minimum length of a decodable message
pub const MIN_MESSAGE_LEN: usize = 140;

/// All fixed fields of a burn message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    pub version: u32,
    pub source_domain: u32,
    pub dest_domain: u32,
    pub nonce: FixedBytes<32>,
    pub sender: FixedBytes<32>,
    /// Low 20 bytes of the 32-byte recipient slot
    pub recipient: Address,
    pub amount: U256,
}

impl BurnMessage {
    pub fn payload(&self) -> TransferPayload {
        TransferPayload {
            recipient: self.recipient,
            amount: self.amount,
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, RelayError> {
    let slot: [u8; 4] = field(bytes, offset)?;
    Ok(u32::from_be_bytes(slot))
}

fn read_bytes32(bytes: &[u8], offset: usize) -> Result<[u8; 32], RelayError> {
    field(bytes, offset)
}

/// Copy exactly `N` bytes at `offset`, failing if the slice ends early
fn field<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], RelayError> {
    let end = offset
        .checked_add(N)
        .ok_or_else(|| RelayError::MalformedMessage(format!("field offset {} overflows", offset)))?;
    let slice = bytes.get(offset..end).ok_or_else(|| {
        RelayError::MalformedMessage(format!(
            "field at {}..{} exceeds message length {}",
            offset,
            end,
            bytes.len()
        ))
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Decode a raw burn message
pub fn decode(bytes: &[u8]) -> Result<BurnMessage, RelayError> {
    if bytes.len() < MIN_MESSAGE_LEN {
        return Err(RelayError::MalformedMessage(format!(
            "message is {} bytes, need at least {}",
            bytes.len(),
            MIN_MESSAGE_LEN
        )));
    }

    let recipient_slot = read_bytes32(bytes, RECIPIENT_OFFSET)?;

    Ok(BurnMessage {
        version: read_u32(bytes, VERSION_OFFSET)?,
        source_domain: read_u32(bytes, SOURCE_DOMAIN_OFFSET)?,
        dest_domain: read_u32(bytes, DEST_DOMAIN_OFFSET)?,
        nonce: FixedBytes::from(read_bytes32(bytes, NONCE_OFFSET)?),
        sender: FixedBytes::from(read_bytes32(bytes, SENDER_OFFSET)?),
        recipient: Address::from_slice(&recipient_slot[12..]),
        amount: U256::from_be_bytes(read_bytes32(bytes, AMOUNT_OFFSET)?),
    })
}

/// Decode hex text, with or without a `0x` prefix, into raw bytes
pub fn decode_hex(text: &str) -> Result<Vec<u8>, RelayError> {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(stripped).map_err(|e| RelayError::MalformedMessage(format!("invalid hex: {}", e)))
}

/// Decode a hex-encoded burn message
pub fn decode_message_hex(text: &str) -> Result<BurnMessage, RelayError> {
    decode(&decode_hex(text)?)
}
