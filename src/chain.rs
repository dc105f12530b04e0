//! Destination chain connectors
//!
//! [`ChainConnector`] is the seam between the completion loop and a chain:
//! read chain id, nonce and gas price, estimate and submit `receiveMessage`,
//! and look up receipts. [`EvmConnector`] implements it over an alloy HTTP
//! provider with the relayer's wallet attached.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::fillers::{FillProvider, JoinFill, WalletFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{info, warn};

use crate::chains::DomainTable;
use crate::contracts::MessageTransmitter;

/// A fully specified `receiveMessage` transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionTx {
    pub message: Bytes,
    pub attestation: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// Connection handle for one destination chain
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Network name, for logs and metrics
    fn name(&self) -> &str;

    async fn chain_id(&self) -> Result<u64>;

    /// Next account nonce for the relayer
    async fn nonce(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn estimate_receive_gas(&self, message: &Bytes, attestation: &Bytes) -> Result<u64>;

    /// Sign and broadcast, returning the transaction hash
    async fn submit_receive(&self, tx: CompletionTx) -> Result<B256>;

    /// `Some(success)` once mined, `None` while still pending
    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>>;
}

type SignerProvider = FillProvider<
    JoinFill<Identity, WalletFiller<EthereumWallet>>,
    RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

/// alloy-backed connector for an EVM chain
pub struct EvmConnector {
    name: String,
    transmitter: Address,
    relayer: Address,
    provider: SignerProvider,
}

impl EvmConnector {
    pub fn new(
        name: &str,
        rpc_url: &str,
        transmitter: Address,
        signer: PrivateKeySigner,
    ) -> Result<Self> {
        let relayer = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).on_http(
            rpc_url
                .parse()
                .wrap_err_with(|| format!("Invalid RPC URL for {}: {}", name, rpc_url))?,
        );

        Ok(Self {
            name: name.to_string(),
            transmitter,
            relayer,
            provider,
        })
    }

    fn receive_request(&self, message: &Bytes, attestation: &Bytes) -> TransactionRequest {
        let calldata = MessageTransmitter::receiveMessageCall {
            message: message.clone(),
            attestation: attestation.clone(),
        }
        .abi_encode();

        TransactionRequest::default()
            .with_from(self.relayer)
            .with_to(self.transmitter)
            .with_input(calldata)
    }
}

#[async_trait]
impl ChainConnector for EvmConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.provider.get_chain_id().await?;
        Ok(chain_id)
    }

    async fn nonce(&self) -> Result<u64> {
        let nonce = self.provider.get_transaction_count(self.relayer).await?;
        Ok(nonce)
    }

    async fn gas_price(&self) -> Result<u128> {
        let price = self
            .provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")?;
        Ok(price)
    }

    async fn estimate_receive_gas(&self, message: &Bytes, attestation: &Bytes) -> Result<u64> {
        let tx = self.receive_request(message, attestation);
        let gas = self
            .provider
            .estimate_gas(&tx)
            .await
            .wrap_err("Failed to estimate gas")?;
        Ok(gas)
    }

    async fn submit_receive(&self, tx: CompletionTx) -> Result<B256> {
        let request = self
            .receive_request(&tx.message, &tx.attestation)
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit)
            .with_gas_price(tx.gas_price)
            .with_chain_id(tx.chain_id);

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| eyre!("Failed to send transaction: {}", e))?;

        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|r| r.status()))
    }
}

/// One connector per destination domain
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<u32, Arc<dyn ChainConnector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an [`EvmConnector`] for every network in the domain table
    ///
    /// A network whose connector cannot be built is skipped with a warning;
    /// transfers to it fail with an unknown-destination error.
    pub fn from_domains(
        domains: &DomainTable,
        transmitter: Address,
        signer: &PrivateKeySigner,
    ) -> Self {
        let mut set = Self::new();
        for entry in domains.entries() {
            match EvmConnector::new(&entry.name, &entry.rpc_url, transmitter, signer.clone()) {
                Ok(connector) => {
                    info!(
                        chain = %entry.name,
                        domain = entry.domain,
                        rpc_url = %entry.rpc_url,
                        "Created chain connector"
                    );
                    set.insert(entry.domain, Arc::new(connector));
                }
                Err(e) => {
                    warn!(
                        chain = %entry.name,
                        domain = entry.domain,
                        error = %e,
                        "Failed to create chain connector, skipping"
                    );
                }
            }
        }
        set
    }

    pub fn insert(&mut self, domain: u32, connector: Arc<dyn ChainConnector>) {
        self.connectors.insert(domain, connector);
    }

    pub fn get(&self, domain: u32) -> Option<Arc<dyn ChainConnector>> {
        self.connectors.get(&domain).cloned()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Read each chain id once and compare it with the expected one
    ///
    /// Returns the number of reachable chains. Nothing here is fatal.
    pub async fn check_connectivity(&self, domains: &DomainTable) -> usize {
        let mut reachable = 0;
        for (domain, connector) in &self.connectors {
            let expected = domains.get(*domain).and_then(|e| e.chain_id);
            match connector.chain_id().await {
                Ok(actual) => {
                    reachable += 1;
                    if let Some(expected) = expected.filter(|&e| e != actual) {
                        warn!(
                            chain = %connector.name(),
                            expected,
                            actual,
                            "Chain id mismatch, check the RPC URL"
                        );
                    } else {
                        info!(chain = %connector.name(), chain_id = actual, "Chain reachable");
                    }
                }
                Err(e) => {
                    warn!(chain = %connector.name(), error = %e, "Chain unreachable");
                }
            }
        }
        reachable
    }
}
