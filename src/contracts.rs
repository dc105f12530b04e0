//! MessageTransmitter contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The transmitter is
//! deployed at the same address on every supported destination chain.

use alloy::sol;

/// MessageTransmitter address shared by all supported chains
pub const DEFAULT_MESSAGE_TRANSMITTER: &str = "0xC30362313FBBA5cf9163F0bb16a0e01f01A896ca";

sol! {
    /// Destination-side message receiver
    #[sol(rpc)]
    contract MessageTransmitter {
        /// Verify the attestation over `message` and mint to the recipient
        ///
        /// # Arguments
        /// * `message` - Raw burn message bytes as emitted on the source chain
        /// * `attestation` - Attester signatures over the message hash
        function receiveMessage(bytes message, bytes attestation) external;
    }
}
