// In-memory PaymentStore used by unit tests.
//
// Mirrors the guarded semantics of the Postgres repository: the monotonic
// received amount, the `status = awaiting` confirmation guard and at-most-once
// owner side effects.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::*;
use super::store::{AddressDeriver, ApplyOutcome, PaymentSnapshot, PaymentStore};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Inner {
    settings: HashMap<String, String>,
    addresses: Vec<DepositAddress>,
    payments: Vec<Payment>,
    observations: Vec<PaymentObservation>,
    /// Owner rows moved to confirmed, in order, once per transition
    owner_confirmations: Vec<(AddressPurpose, Uuid)>,
    inconsistencies: usize,
    failing_writes: HashSet<String>,
    next_index: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    /// Seed an awaiting payment directly, bypassing derivation
    pub fn seed(&self, address: &str, purpose: AddressPurpose, expected_amount: Decimal) -> Uuid {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        inner.next_index += 1;

        let now = Utc::now();
        let deposit = DepositAddress {
            id: Uuid::new_v4(),
            address: address.to_string(),
            derivation_index: index as i32,
            purpose,
            expected_amount,
            reference_id: Uuid::new_v4(),
            used: false,
            created_at: now,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            address_id: deposit.id,
            status: PaymentStatus::Awaiting,
            expected_amount,
            received_amount: Decimal::ZERO,
            confirmations: 0,
            txid: None,
            last_checked_at: None,
            confirmed_at: None,
            created_at: now,
        };
        let reference_id = deposit.reference_id;
        inner.addresses.push(deposit);
        inner.payments.push(payment);
        reference_id
    }

    /// Make every write for `address` fail with a database error
    pub fn fail_writes_for(&self, address: &str) {
        self.inner.lock().failing_writes.insert(address.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failing_writes.clear();
    }

    pub fn status_of(&self, address: &str) -> Option<PaymentStatus> {
        let inner = self.inner.lock();
        let deposit = inner.addresses.iter().find(|a| a.address == address)?;
        inner
            .payments
            .iter()
            .find(|p| p.address_id == deposit.id)
            .map(|p| p.status)
    }

    pub fn payment_of(&self, address: &str) -> Option<Payment> {
        let inner = self.inner.lock();
        let deposit = inner.addresses.iter().find(|a| a.address == address)?;
        inner
            .payments
            .iter()
            .find(|p| p.address_id == deposit.id)
            .cloned()
    }

    pub fn is_used(&self, address: &str) -> bool {
        self.inner
            .lock()
            .addresses
            .iter()
            .any(|a| a.address == address && a.used)
    }

    pub fn owner_confirmations(&self) -> Vec<(AddressPurpose, Uuid)> {
        self.inner.lock().owner_confirmations.clone()
    }

    pub fn observation_count(&self) -> usize {
        self.inner.lock().observations.len()
    }

    pub fn inconsistency_count(&self) -> usize {
        self.inner.lock().inconsistencies
    }
}

fn write_failure(address: &str) -> AppError {
    AppError::Database(sqlx::Error::Protocol(format!("simulated write failure for {}", address)))
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn load_settings(&self) -> AppResult<HashMap<String, String>> {
        Ok(self.inner.lock().settings.clone())
    }

    async fn list_awaiting(&self) -> AppResult<Vec<PendingPayment>> {
        let inner = self.inner.lock();
        let pending = inner
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Awaiting)
            .filter_map(|p| {
                let deposit = inner.addresses.iter().find(|a| a.id == p.address_id)?;
                Some(PendingPayment {
                    payment_id: p.id,
                    address_id: deposit.id,
                    address: deposit.address.clone(),
                    purpose: deposit.purpose,
                    reference_id: deposit.reference_id,
                    expected_amount: p.expected_amount,
                    received_amount: p.received_amount,
                    confirmations: p.confirmations,
                })
            })
            .collect();
        Ok(pending)
    }

    async fn touch_checked(&self, payment_id: Uuid, checked_at: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if let Some(payment) = inner.payments.iter_mut().find(|p| p.id == payment_id) {
            payment.last_checked_at = Some(checked_at);
        }
        Ok(())
    }

    async fn apply_observation(
        &self,
        pending: &PendingPayment,
        observation: &Observation,
        confirm: bool,
    ) -> AppResult<ApplyOutcome> {
        let mut inner = self.inner.lock();

        if inner.failing_writes.contains(&pending.address) {
            return Err(write_failure(&pending.address));
        }

        let payment = inner
            .payments
            .iter_mut()
            .find(|p| p.id == pending.payment_id)
            .ok_or_else(|| AppError::NotFound(pending.payment_id.to_string()))?;

        if payment.received_amount > observation.received_amount && !confirm {
            return Ok(ApplyOutcome::Stale);
        }

        payment.received_amount = payment.received_amount.max(observation.received_amount);
        payment.confirmations = observation.confirmations as i32;
        if observation.txid.is_some() {
            payment.txid = observation.txid.clone();
        }
        payment.last_checked_at = Some(observation.observed_at);

        let outcome = if !confirm {
            ApplyOutcome::Recorded
        } else if payment.status == PaymentStatus::Awaiting {
            payment.status = PaymentStatus::Confirmed;
            payment.confirmed_at = Some(observation.observed_at);
            ApplyOutcome::Confirmed
        } else {
            ApplyOutcome::AlreadyConfirmed
        };

        inner.observations.push(PaymentObservation {
            id: Uuid::new_v4(),
            payment_id: pending.payment_id,
            received_amount: observation.received_amount,
            confirmations: observation.confirmations as i32,
            txid: observation.txid.clone(),
            observed_at: observation.observed_at,
        });

        if outcome == ApplyOutcome::Confirmed {
            if let Some(deposit) = inner.addresses.iter_mut().find(|a| a.id == pending.address_id) {
                deposit.used = true;
            }
            inner
                .owner_confirmations
                .push((pending.purpose, pending.reference_id));
        }

        Ok(outcome)
    }

    async fn record_inconsistency(
        &self,
        _payment: &PendingPayment,
        _observation: &Observation,
    ) -> AppResult<()> {
        self.inner.lock().inconsistencies += 1;
        Ok(())
    }

    async fn open_obligation(
        &self,
        purpose: AddressPurpose,
        reference_id: Uuid,
        expected_amount: Decimal,
        derive: AddressDeriver<'_>,
    ) -> AppResult<PaymentSnapshot> {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        let address = derive(index)?;

        if inner.addresses.iter().any(|a| a.address == address) {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "duplicate address {}",
                address
            ))));
        }
        inner.next_index += 1;

        let now = Utc::now();
        let deposit = DepositAddress {
            id: Uuid::new_v4(),
            address,
            derivation_index: index as i32,
            purpose,
            expected_amount,
            reference_id,
            used: false,
            created_at: now,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            address_id: deposit.id,
            status: PaymentStatus::Awaiting,
            expected_amount,
            received_amount: Decimal::ZERO,
            confirmations: 0,
            txid: None,
            last_checked_at: None,
            confirmed_at: None,
            created_at: now,
        };
        inner.addresses.push(deposit.clone());
        inner.payments.push(payment.clone());

        Ok(PaymentSnapshot {
            address: deposit,
            payment,
            latest_observation: None,
        })
    }

    async fn find_by_address(&self, address: &str) -> AppResult<Option<PaymentSnapshot>> {
        let inner = self.inner.lock();
        let Some(deposit) = inner.addresses.iter().find(|a| a.address == address) else {
            return Ok(None);
        };
        let payment = inner
            .payments
            .iter()
            .find(|p| p.address_id == deposit.id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("payment for address {}", address)))?;
        let latest_observation = inner
            .observations
            .iter()
            .filter(|o| o.payment_id == payment.id)
            .max_by_key(|o| o.observed_at)
            .cloned();

        Ok(Some(PaymentSnapshot {
            address: deposit.clone(),
            payment,
            latest_observation,
        }))
    }
}
