//! Registration and status API
//!
//! - POST /relayer/monitor - Register a burn for relay
//! - GET /relayer/status/{tx_hash} - One transfer
//! - GET /relayer/transfers - Every transfer plus a rollup
//! - GET /relayer/stats - Counts by status and completed volume
//! - GET /relayer/health - Relayer identity and load
//! - GET /health - Liveness probe
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::chains::{ChainIdTable, Network};
use crate::engine::RelayEngine;
use crate::error::RelayError;
use crate::metrics;
use crate::types::{RelayStats, TransferView};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RelayEngine>,
    pub chain_ids: Arc<ChainIdTable>,
    pub relayer_address: String,
    pub network: Network,
}

#[derive(Debug, Deserialize)]
pub struct MonitorRequest {
    pub tx_hash: String,
    /// Network name or EVM chain id
    pub source_chain: String,
    pub dest_chain: String,
}

#[derive(Serialize)]
pub struct TransfersResponse {
    pub transfers: Vec<TransferView>,
    pub summary: RelayStats,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: RelayStats,
    pub relayer_address: String,
    pub network: String,
}

#[derive(Serialize)]
pub struct RelayerHealthResponse {
    pub status: String,
    pub relayer_address: String,
    pub monitored_transfers: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// A status code and message, rendered as `{"detail": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = match &err {
            RelayError::InvalidRoute { .. } | RelayError::UnknownChain(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::RouteConflict { .. } => StatusCode::CONFLICT,
            RelayError::TransferNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InvalidTransition { .. }
            | RelayError::AttestationService(_)
            | RelayError::MalformedMessage(_)
            | RelayError::UnknownDestination(_)
            | RelayError::GasEstimation(_)
            | RelayError::Submission(_)
            | RelayError::ReceiptTimeout { .. }
            | RelayError::ReceiptFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl AppState {
    /// Map a request's chain identifier to its CCTP domain
    fn domain_for(&self, identifier: &str) -> Result<u32, RelayError> {
        let name = self.chain_ids.resolve(identifier);
        self.engine
            .domains()
            .domain_of(&name)
            .ok_or(RelayError::UnknownChain(name))
    }
}

async fn monitor_transfer(
    State(state): State<AppState>,
    Json(request): Json<MonitorRequest>,
) -> Result<Json<TransferView>, ApiError> {
    let source_domain = state.domain_for(&request.source_chain)?;
    let dest_domain = state.domain_for(&request.dest_chain)?;

    let transfer = state
        .engine
        .register_transfer(&request.tx_hash, source_domain, dest_domain)
        .await
        .map_err(|e| {
            warn!(tx_hash = %request.tx_hash, error = %e, "Rejected transfer registration");
            ApiError::from(e)
        })?;

    Ok(Json(transfer.view(state.engine.token_decimals())))
}

async fn transfer_status(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TransferView>, ApiError> {
    let transfer = state
        .engine
        .get_transfer(&tx_hash)
        .await
        .ok_or_else(|| ApiError::not_found("Transfer not found"))?;
    Ok(Json(transfer.view(state.engine.token_decimals())))
}

async fn all_transfers(State(state): State<AppState>) -> Json<TransfersResponse> {
    let decimals = state.engine.token_decimals();
    let transfers = state.engine.list_transfers().await;
    let summary = RelayStats::from_transfers(&transfers, decimals);

    Json(TransfersResponse {
        transfers: transfers.iter().map(|t| t.view(decimals)).collect(),
        summary,
    })
}

async fn relayer_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.engine.stats().await,
        relayer_address: state.relayer_address.clone(),
        network: state.network.to_string(),
    })
}

async fn relayer_health(State(state): State<AppState>) -> Json<RelayerHealthResponse> {
    Json(RelayerHealthResponse {
        status: "healthy".to_string(),
        relayer_address: state.relayer_address.clone(),
        monitored_transfers: state.engine.registry().len().await,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> Response {
    match metrics::encode() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/relayer/monitor", post(monitor_transfer))
        .route("/relayer/status/{tx_hash}", get(transfer_status))
        .route("/relayer/transfers", get(all_transfers))
        .route("/relayer/stats", get(relayer_stats))
        .route("/relayer/health", get(relayer_health))
        .route("/health", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> eyre::Result<()> {
    let app = router(state);

    info!("API server listening on {}", addr);
    info!("  POST /relayer/monitor          - Register a transfer");
    info!("  GET  /relayer/status/{{tx_hash}} - Transfer status");
    info!("  GET  /metrics                  - Prometheus metrics");

    metrics::UP.set(1.0);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
