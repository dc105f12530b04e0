//! Integration tests for the CCTP relayer engine
//!
//! The engine is driven tick by tick against in-process mocks of the
//! attestation service and destination chains.
//!
//! Run with: cargo test --test integration_test -- --nocapture
//!
//! The live attestation service test is ignored by default:
//! cargo test --test integration_test -- --ignored --nocapture
//! Or set INTEGRATION_TEST=1 and run: cargo test --test integration_test

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use cctp_relayer::attestation::{Attestation, AttestationResult, AttestationSource, IrisClient};
use cctp_relayer::chain::{ChainConnector, CompletionTx, ConnectorSet};
use cctp_relayer::chains::{DomainTable, Network};
use cctp_relayer::completion::CompletionSettings;
use cctp_relayer::engine::{EngineSettings, RelayEngine};
use cctp_relayer::error::RelayError;
use cctp_relayer::types::TransferStatus;
use eyre::eyre;

const BASE: u32 = 6;
const ARBITRUM: u32 = 3;

/// Check if integration tests should run
fn should_run_integration() -> bool {
    env::var("INTEGRATION_TEST").is_ok()
}

mod mocks {
    use super::*;

    /// Plays back a fixed list of answers; the last one repeats forever
    pub struct ScriptedAttestation {
        pub calls: AtomicUsize,
        script: Vec<AttestationResult>,
    }

    impl ScriptedAttestation {
        pub fn new(script: Vec<AttestationResult>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script,
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AttestationSource for ScriptedAttestation {
        async fn fetch_attestation(
            &self,
            _source_domain: u32,
            _tx_hash: &str,
        ) -> Result<AttestationResult, RelayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script[n.min(self.script.len() - 1)].clone())
        }
    }

    #[derive(Clone, Copy)]
    pub enum Receipt {
        Success,
        Reverted,
        Never,
    }

    pub struct MockChain {
        pub submissions: AtomicUsize,
        pub last_tx: Mutex<Option<CompletionTx>>,
        receipt: Receipt,
        estimate_fails: bool,
        submit_latency: Duration,
    }

    impl MockChain {
        pub fn new(receipt: Receipt) -> Self {
            Self {
                submissions: AtomicUsize::new(0),
                last_tx: Mutex::new(None),
                receipt,
                estimate_fails: false,
                submit_latency: Duration::ZERO,
            }
        }

        pub fn failing_estimates(mut self) -> Self {
            self.estimate_fails = true;
            self
        }

        pub fn with_submit_latency(mut self, latency: Duration) -> Self {
            self.submit_latency = latency;
            self
        }

        pub fn submissions(&self) -> usize {
            self.submissions.load(Ordering::SeqCst)
        }

        pub fn last_tx(&self) -> Option<CompletionTx> {
            self.last_tx.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainConnector for MockChain {
        fn name(&self) -> &str {
            "arbitrum"
        }

        async fn chain_id(&self) -> eyre::Result<u64> {
            Ok(42161)
        }

        async fn nonce(&self) -> eyre::Result<u64> {
            Ok(7)
        }

        async fn gas_price(&self) -> eyre::Result<u128> {
            Ok(100_000_000)
        }

        async fn estimate_receive_gas(&self, _message: &Bytes, _attestation: &Bytes) -> eyre::Result<u64> {
            if self.estimate_fails {
                Err(eyre!("execution reverted"))
            } else {
                Ok(100_000)
            }
        }

        async fn submit_receive(&self, tx: CompletionTx) -> eyre::Result<B256> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            *self.last_tx.lock().unwrap() = Some(tx);
            if !self.submit_latency.is_zero() {
                tokio::time::sleep(self.submit_latency).await;
            }
            Ok(B256::repeat_byte(0xcd))
        }

        async fn receipt_status(&self, _tx_hash: B256) -> eyre::Result<Option<bool>> {
            Ok(match self.receipt {
                Receipt::Success => Some(true),
                Receipt::Reverted => Some(false),
                Receipt::Never => None,
            })
        }
    }
}

use mocks::{MockChain, Receipt, ScriptedAttestation};

/// A 140-byte burn message from Base to Arbitrum
fn burn_message(recipient: Address, amount: U256) -> Vec<u8> {
    let mut msg = Vec::with_capacity(140);
    msg.extend_from_slice(&1u32.to_be_bytes());
    msg.extend_from_slice(&BASE.to_be_bytes());
    msg.extend_from_slice(&ARBITRUM.to_be_bytes());
    msg.extend_from_slice(&[0x01; 32]);
    msg.extend_from_slice(&[0x02; 32]);
    let mut slot = [0u8; 32];
    slot[12..].copy_from_slice(recipient.as_slice());
    msg.extend_from_slice(&slot);
    msg.extend_from_slice(&amount.to_be_bytes::<32>());
    msg
}

fn recipient() -> Address {
    Address::repeat_byte(0x11)
}

fn attested() -> AttestationResult {
    AttestationResult::Attested(Attestation {
        message: Bytes::from(burn_message(recipient(), U256::from(1_000_000u64))),
        attestation: Bytes::from(vec![0xab; 130]),
        event_nonce: Some("0x2a".to_string()),
    })
}

fn settings() -> EngineSettings {
    EngineSettings {
        monitor_interval: Duration::from_millis(10),
        monitor_error_backoff: Duration::from_millis(20),
        completion: CompletionSettings {
            interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(20),
            receipt_timeout: Duration::from_millis(200),
            receipt_poll_interval: Duration::from_millis(10),
            ..CompletionSettings::default()
        },
        token_decimals: 6,
    }
}

fn engine_with(source: Arc<ScriptedAttestation>, chain: Option<Arc<MockChain>>) -> RelayEngine {
    let mut connectors = ConnectorSet::new();
    if let Some(chain) = chain {
        connectors.insert(ARBITRUM, chain);
    }
    RelayEngine::new(
        DomainTable::defaults(Network::Mainnet),
        source,
        connectors,
        settings(),
    )
}

// ============================================================================
// Registration and attestation
// ============================================================================

#[tokio::test]
async fn test_register_creates_pending_transfer() {
    let source = ScriptedAttestation::new(vec![AttestationResult::NotFound]);
    let engine = engine_with(source.clone(), None);

    let transfer = tokio_test::assert_ok!(engine.register_transfer("0xabc", BASE, ARBITRUM).await);
    assert_eq!(transfer.tx_hash, "0xabc");
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(transfer.source_domain, BASE);
    assert_eq!(transfer.dest_domain, ARBITRUM);

    let view = transfer.view(engine.token_decimals());
    assert_eq!(view.amount, BigDecimal::from(0));
    assert!(view.recipient.is_none());
    assert!(!view.has_attestation);
    assert!(view.completed_at.is_none());

    // Registration runs one immediate check
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_register_rejects_invalid_route() {
    let source = ScriptedAttestation::new(vec![AttestationResult::NotFound]);
    let engine = engine_with(source.clone(), None);

    let err = engine.register_transfer("0xabc", BASE, 42).await.unwrap_err();
    assert_eq!(
        err,
        RelayError::InvalidRoute {
            source_domain: BASE,
            dest_domain: 42
        }
    );
    assert!(engine.get_transfer("0xabc").await.is_none());
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_register_twice_keeps_one_record() {
    let source = ScriptedAttestation::new(vec![AttestationResult::NotFound]);
    let engine = engine_with(source.clone(), None);

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    let again = engine.register_transfer("0xABC", BASE, ARBITRUM).await.unwrap();
    assert_eq!(again.status, TransferStatus::Pending);
    assert_eq!(engine.list_transfers().await.len(), 1);
    // No second immediate check for a known hash
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_attested_message_populates_transfer() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let engine = engine_with(source, None);

    let transfer = engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Attested);

    let payload = transfer.payload.clone().unwrap();
    assert_eq!(payload.recipient, recipient());
    assert_eq!(payload.amount, U256::from(1_000_000u64));
    assert_eq!(transfer.event_nonce.as_deref(), Some("0x2a"));

    let view = transfer.view(6);
    assert_eq!(view.amount, BigDecimal::from(1));
    assert_eq!(
        view.recipient.as_deref(),
        Some("0x1111111111111111111111111111111111111111")
    );
    assert!(view.has_attestation);
}

#[tokio::test]
async fn test_attested_on_fourth_poll() {
    let source = ScriptedAttestation::new(vec![
        AttestationResult::NotFound,
        AttestationResult::NotFound,
        AttestationResult::NotFound,
        attested(),
    ]);
    let engine = engine_with(source.clone(), None);

    // Poll 1 happens at registration
    let transfer = engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);

    for poll in 2..=3 {
        let report = engine.monitor().tick().await;
        assert_eq!(report.attested, 0);
        assert_eq!(source.calls(), poll);
        assert_eq!(
            engine.get_transfer("0xabc").await.unwrap().status,
            TransferStatus::Pending
        );
    }

    let report = engine.monitor().tick().await;
    assert_eq!(report.attested, 1);
    assert_eq!(source.calls(), 4);
    assert_eq!(
        engine.get_transfer("0xabc").await.unwrap().status,
        TransferStatus::Attested
    );

    // Attested once: nothing left to poll
    let report = engine.monitor().tick().await;
    assert_eq!(report.polled, 0);
    assert_eq!(source.calls(), 4);
}

#[tokio::test]
async fn test_pending_attestation_is_not_a_state_change() {
    let source = ScriptedAttestation::new(vec![AttestationResult::Pending {
        status: Some("pending_confirmations".to_string()),
    }]);
    let engine = engine_with(source.clone(), None);

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    engine.monitor().tick().await;

    let transfer = engine.get_transfer("0xabc").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert!(!transfer.has_attestation());
    assert_eq!(source.calls(), 2);
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_completion_success() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(MockChain::new(Receipt::Success));
    let engine = engine_with(source, Some(chain.clone()));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    let report = engine.completion().tick().await;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);

    let transfer = engine.get_transfer("0xabc").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert!(transfer.completed_at.is_some());
    assert_eq!(
        transfer.completion_tx_hash.as_deref(),
        Some(format!("{:#x}", B256::repeat_byte(0xcd)).as_str())
    );

    let tx = chain.last_tx().unwrap();
    assert_eq!(tx.chain_id, 42161);
    assert_eq!(tx.nonce, 7);
    assert_eq!(tx.gas_price, 100_000_000);
    assert_eq!(tx.gas_limit, 120_000);
    assert_eq!(tx.attestation, Bytes::from(vec![0xab; 130]));

    let stats = engine.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total_volume, BigDecimal::from(1));
}

#[tokio::test]
async fn test_reverted_receipt_fails_transfer() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(MockChain::new(Receipt::Reverted));
    let engine = engine_with(source, Some(chain.clone()));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    let report = engine.completion().tick().await;
    assert_eq!(report.failed, 1);

    let transfer = engine.get_transfer("0xabc").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    assert!(transfer.completed_at.is_none());
    assert!(transfer.failure_reason.unwrap().contains("reverted"));

    // Failed is terminal: no automatic retry
    engine.completion().tick().await;
    engine.monitor().tick().await;
    assert_eq!(chain.submissions(), 1);
    assert_eq!(
        engine.get_transfer("0xabc").await.unwrap().status,
        TransferStatus::Failed
    );
}

#[tokio::test]
async fn test_receipt_timeout_fails_transfer() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(MockChain::new(Receipt::Never));
    let engine = engine_with(source, Some(chain.clone()));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    engine.completion().tick().await;

    let transfer = engine.get_transfer("0xabc").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    assert!(transfer.failure_reason.unwrap().contains("No receipt"));
    assert_eq!(chain.submissions(), 1);
}

#[tokio::test]
async fn test_unknown_destination_fails_without_submission() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let engine = engine_with(source, None);

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    let report = engine.completion().tick().await;
    assert_eq!(report.failed, 1);

    let transfer = engine.get_transfer("0xabc").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    assert!(transfer
        .failure_reason
        .unwrap()
        .contains("No chain connector for destination domain 3"));
}

#[tokio::test]
async fn test_one_failed_completion_does_not_block_others() {
    const ETHEREUM: u32 = 0;

    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(MockChain::new(Receipt::Success));
    let engine = engine_with(source, Some(chain.clone()));

    // No connector for Ethereum, one for Arbitrum
    engine.register_transfer("0xaaa", BASE, ETHEREUM).await.unwrap();
    engine.register_transfer("0xbbb", BASE, ARBITRUM).await.unwrap();

    let report = engine.completion().tick().await;
    assert_eq!(report.claimed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);

    let failed = engine.get_transfer("0xaaa").await.unwrap();
    assert_eq!(failed.status, TransferStatus::Failed);
    assert!(failed.failure_reason.unwrap().contains("domain 0"));

    let completed = engine.get_transfer("0xbbb").await.unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(chain.submissions(), 1);
}

#[tokio::test]
async fn test_gas_estimation_falls_back_to_default() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(MockChain::new(Receipt::Success).failing_estimates());
    let engine = engine_with(source, Some(chain.clone()));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    engine.completion().tick().await;

    assert_eq!(
        engine.get_transfer("0xabc").await.unwrap().status,
        TransferStatus::Completed
    );
    // 300000 default plus the 20% margin
    assert_eq!(chain.last_tx().unwrap().gas_limit, 360_000);
}

#[tokio::test]
async fn test_concurrent_ticks_submit_once() {
    let source = ScriptedAttestation::new(vec![attested()]);
    let chain = Arc::new(
        MockChain::new(Receipt::Success).with_submit_latency(Duration::from_millis(50)),
    );
    let engine = Arc::new(engine_with(source, Some(chain.clone())));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();

    let ticks = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.completion().tick().await })
    });
    let reports = futures::future::join_all(ticks).await;

    let claimed: usize = reports.into_iter().map(|r| r.unwrap().claimed).sum();
    assert_eq!(claimed, 1);
    assert_eq!(chain.submissions(), 1);
    assert_eq!(
        engine.get_transfer("0xabc").await.unwrap().status,
        TransferStatus::Completed
    );
}

#[tokio::test]
async fn test_undecodable_message_is_never_completed() {
    let source = ScriptedAttestation::new(vec![AttestationResult::Attested(Attestation {
        message: Bytes::from(vec![0u8; 100]),
        attestation: Bytes::from(vec![0xab; 130]),
        event_nonce: None,
    })]);
    let chain = Arc::new(MockChain::new(Receipt::Success));
    let engine = engine_with(source.clone(), Some(chain.clone()));

    let transfer = engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Attested);
    assert!(transfer.payload.is_none());
    assert!(transfer.decode_error.is_some());

    assert_eq!(engine.completion().tick().await.claimed, 0);
    assert_eq!(chain.submissions(), 0);

    // Still re-polled by the monitor
    engine.monitor().tick().await;
    assert_eq!(source.calls(), 2);
}

// ============================================================================
// Running loops
// ============================================================================

#[tokio::test]
async fn test_running_engine_statuses_are_monotonic() {
    let source = ScriptedAttestation::new(vec![AttestationResult::NotFound, attested()]);
    let chain = Arc::new(
        MockChain::new(Receipt::Success).with_submit_latency(Duration::from_millis(30)),
    );
    let engine = Arc::new(engine_with(source, Some(chain.clone())));

    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();
    let handle = engine.start();

    let mut observed = vec![TransferStatus::Pending];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = engine.get_transfer("0xabc").await.unwrap().status;
        if observed.last() != Some(&status) {
            observed.push(status);
        }
        if status.is_terminal() || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    handle.stop().await;

    assert_eq!(observed.last(), Some(&TransferStatus::Completed));
    let order = [
        TransferStatus::Pending,
        TransferStatus::Attested,
        TransferStatus::Completing,
        TransferStatus::Completed,
    ];
    let positions: Vec<usize> = observed
        .iter()
        .map(|s| order.iter().position(|o| o == s).unwrap())
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "statuses out of order: {:?}",
        observed
    );
    assert_eq!(chain.submissions(), 1);
}

#[tokio::test]
async fn test_stop_waits_for_loops() {
    let source = ScriptedAttestation::new(vec![AttestationResult::NotFound]);
    let engine = engine_with(source.clone(), None);
    engine.register_transfer("0xabc", BASE, ARBITRUM).await.unwrap();

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("engine did not stop");

    let calls = source.calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), calls);
    assert!(calls > 1);
}

// ============================================================================
// Live attestation service (requires network)
// ============================================================================

#[tokio::test]
#[ignore = "requires network access to the attestation service"]
async fn test_live_attestation_unknown_hash() {
    if !should_run_integration() {
        println!("Skipping: INTEGRATION_TEST not set");
        return;
    }

    let url = env::var("ATTESTATION_API_URL")
        .unwrap_or_else(|_| Network::Testnet.default_attestation_url().to_string());
    let client = IrisClient::new(&url, Duration::from_secs(30)).unwrap();

    let hash = format!("{:#x}", B256::ZERO);
    let result = client.fetch_attestation(BASE, &hash).await.unwrap();
    assert!(matches!(
        result,
        AttestationResult::NotFound | AttestationResult::Pending { .. }
    ));
}
