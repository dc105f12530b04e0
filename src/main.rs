//! CCTP Relayer
//!
//! Watches registered burns on CCTP source chains, waits for the attestation
//! service to sign them, and mints on the destination chain by submitting
//! `receiveMessage` to its MessageTransmitter.
//!
//! # Flow
//!
//! 1. A client registers a burn transaction via `POST /relayer/monitor`
//! 2. The monitor polls the attestation service until the burn is attested
//! 3. The completion worker submits the message and attestation on the
//!    destination chain and waits for the receipt

use std::sync::Arc;
use std::time::Duration;

use cctp_relayer::api::{self, AppState};
use cctp_relayer::attestation::IrisClient;
use cctp_relayer::chain::ConnectorSet;
use cctp_relayer::config::Config;
use cctp_relayer::engine::RelayEngine;
use cctp_relayer::metrics;
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting CCTP Relayer");

    let config = Config::load()?;
    info!(
        network = %config.network,
        attestation_api = %config.attestation.api_url,
        domains = config.domains.len(),
        "Configuration loaded"
    );

    let signer = config.signer()?;
    let relayer_address = format!("{:#x}", signer.address());
    info!(relayer_address = %relayer_address, "Relayer account loaded");

    let connectors =
        ConnectorSet::from_domains(&config.domains, config.transmitter_address()?, &signer);
    if connectors.is_empty() {
        warn!("No destination chain connectors, every completion will fail");
    }
    let reachable = connectors.check_connectivity(&config.domains).await;
    info!(
        reachable,
        configured = connectors.len(),
        "Chain connectivity checked"
    );

    let attestation = IrisClient::new(
        &config.attestation.api_url,
        Duration::from_secs(config.attestation.timeout_secs),
    )?;

    let engine = Arc::new(RelayEngine::new(
        config.domains.clone(),
        Arc::new(attestation),
        connectors,
        config.engine_settings(),
    ));
    let handle = engine.start();

    let state = AppState {
        engine: engine.clone(),
        chain_ids: Arc::new(config.chain_ids.clone()),
        relayer_address,
        network: config.network,
    };
    let addr = config.api_addr()?;
    let server = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(addr, state).await {
            error!(error = %e, "API server failed");
        }
    });

    wait_for_shutdown_signal().await;

    metrics::UP.set(0.0);
    server.abort();
    handle.stop().await;

    info!("CCTP Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cctp_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
