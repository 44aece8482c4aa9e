use crate::ledger::models::*;
use crate::ledger::store::PaymentSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ========== REQUEST MODELS ==========

/// Request to open a payment obligation for an order or vendor bond
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub purpose: AddressPurpose,
    pub reference_id: Uuid,

    /// BTC amount as a decimal string, e.g. "0.00100000"
    #[validate(length(min = 1, max = 32, message = "expected_amount must be a decimal string"))]
    pub expected_amount: String,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct ObservationResponse {
    pub received_amount: String,
    pub confirmations: i32,
    pub txid: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Deposit address with its payment state
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub address: String,
    pub derivation_index: i32,
    pub purpose: AddressPurpose,
    pub reference_id: Uuid,
    pub status: PaymentStatus,

    // Amounts are rendered with all 8 decimals
    pub expected_amount: String,
    pub received_amount: String,
    pub confirmations: i32,
    pub txid: Option<String>,
    pub used: bool,

    pub last_checked_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub latest_observation: Option<ObservationResponse>,
}

impl From<PaymentSnapshot> for PaymentResponse {
    fn from(snapshot: PaymentSnapshot) -> Self {
        let PaymentSnapshot {
            address,
            payment,
            latest_observation,
        } = snapshot;

        Self {
            payment_id: payment.id,
            address: address.address,
            derivation_index: address.derivation_index,
            purpose: address.purpose,
            reference_id: address.reference_id,
            status: payment.status,
            expected_amount: format_btc(payment.expected_amount),
            received_amount: format_btc(payment.received_amount),
            confirmations: payment.confirmations,
            txid: payment.txid,
            used: address.used,
            last_checked_at: payment.last_checked_at,
            confirmed_at: payment.confirmed_at,
            created_at: payment.created_at,
            latest_observation: latest_observation.map(|o| ObservationResponse {
                received_amount: format_btc(o.received_amount),
                confirmations: o.confirmations,
                txid: o.txid,
                observed_at: o.observed_at,
            }),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub reconciling: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

pub fn format_btc(amount: Decimal) -> String {
    let mut amount = amount;
    amount.rescale(BTC_DECIMALS);
    amount.to_string()
}
