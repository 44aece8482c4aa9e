use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::{str::FromStr, sync::Arc};
use tracing::{info, warn};

use super::auth::CronToken;
use super::models::*;
use crate::{
    error::{AppError, AppResult},
    ledger::{
        derivation::derive_receiving_address,
        models::validate_btc_amount,
        settings::BitcoinSettings,
        store::PaymentStore,
    },
    middleware::{RateLimitLayer, ValidatedJson},
    reconciliation::{CycleReport, Reconciler},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub reconciler: Arc<Reconciler>,
    pub cron_token: Arc<CronToken>,
    pub cron_rate_limit: RateLimitLayer,
}

// ========== CRON ==========

/// POST /cron/reconcile - Run one reconciliation cycle
pub async fn trigger_reconcile(State(state): State<AppState>) -> AppResult<Json<CycleReport>> {
    info!("⏰ Reconciliation triggered");
    let report = state.reconciler.run_cycle().await?;
    Ok(Json(report))
}

/// GET /cron/reconcile/last - Report of the last completed cycle
pub async fn last_reconcile_report(State(state): State<AppState>) -> AppResult<Json<CycleReport>> {
    state
        .reconciler
        .last_report()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no reconciliation cycle has completed yet".to_string()))
}

// ========== PAYMENTS ==========

/// POST /api/v1/payments - Open a payment obligation on a fresh address
pub async fn create_payment(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentResponse>)> {
    let expected_amount = Decimal::from_str(request.expected_amount.trim())
        .map_err(|_| AppError::InvalidInput(format!("invalid amount {:?}", request.expected_amount)))?;
    let expected_amount = validate_btc_amount(expected_amount).map_err(AppError::InvalidInput)?;

    let settings = BitcoinSettings::from_map(&state.store.load_settings().await?)?;
    let xpub = settings.require_xpub()?.to_string();
    let network = settings.network;
    let derive = move |index: u32| derive_receiving_address(&xpub, network, index);

    let snapshot = state
        .store
        .open_obligation(request.purpose, request.reference_id, expected_amount, &derive)
        .await?;

    info!(
        "✅ Opened {} obligation {} for {} BTC at {} (index {})",
        request.purpose.as_str(),
        request.reference_id,
        expected_amount,
        snapshot.address.address,
        snapshot.address.derivation_index
    );

    Ok((StatusCode::CREATED, Json(PaymentResponse::from(snapshot))))
}

/// GET /api/v1/payments/:address - Payment state for one deposit address
pub async fn get_payment(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<PaymentResponse>> {
    let snapshot = state
        .store
        .find_by_address(address.trim())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment for address {}", address)))?;

    Ok(Json(PaymentResponse::from(snapshot)))
}

// ========== HEALTH ==========

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: database unreachable: {}", e);
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database_ok { "healthy" } else { "degraded" }.to_string(),
            database: if database_ok { "ok" } else { "unreachable" }.to_string(),
            reconciling: state.reconciler.is_running(),
            last_cycle_at: state.reconciler.last_report().map(|r| r.finished_at),
            timestamp: Utc::now(),
        }),
    )
}
