use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::*;

/// Derives the deposit address for a freshly allocated index
pub type AddressDeriver<'a> = &'a (dyn Fn(u32) -> AppResult<String> + Send + Sync);

/// Result of persisting one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Observation stored, payment still awaiting
    Recorded,
    /// Observation stored and this call moved the payment to confirmed
    Confirmed,
    /// Observation stored; someone else confirmed the payment first
    AlreadyConfirmed,
    /// A newer, higher reading was persisted concurrently; nothing written
    Stale,
}

/// Everything known about one deposit address
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSnapshot {
    pub address: DepositAddress,
    pub payment: Payment,
    pub latest_observation: Option<PaymentObservation>,
}

/// Persistence seam for the address ledger and reconciliation loop
///
/// INVARIANTS:
/// - `apply_observation` writes the observation before any status change,
///   in one transaction
/// - confirmation is guarded on `status = awaiting`, so side effects on the
///   owning order/bond happen at most once
/// - the persisted received amount never decreases; a lower reading is only
///   stored when it confirms the payment on its own
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    /// Raw `btc_*` rows from the settings store
    async fn load_settings(&self) -> AppResult<HashMap<String, String>>;

    /// All payments currently awaiting funds
    async fn list_awaiting(&self) -> AppResult<Vec<PendingPayment>>;

    /// Record that the address was checked without usable data
    async fn touch_checked(&self, payment_id: Uuid, checked_at: DateTime<Utc>) -> AppResult<()>;

    async fn apply_observation(
        &self,
        payment: &PendingPayment,
        observation: &Observation,
        confirm: bool,
    ) -> AppResult<ApplyOutcome>;

    /// Audit a provider reading that went backwards
    async fn record_inconsistency(
        &self,
        payment: &PendingPayment,
        observation: &Observation,
    ) -> AppResult<()>;

    /// Allocate an index, derive the address and open an awaiting payment
    async fn open_obligation(
        &self,
        purpose: AddressPurpose,
        reference_id: Uuid,
        expected_amount: Decimal,
        derive: AddressDeriver<'_>,
    ) -> AppResult<PaymentSnapshot>;

    async fn find_by_address(&self, address: &str) -> AppResult<Option<PaymentSnapshot>>;
}
