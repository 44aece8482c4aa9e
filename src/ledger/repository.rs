use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::BigDecimal;
use sqlx::{prelude::FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::store::{AddressDeriver, ApplyOutcome, PaymentSnapshot, PaymentStore};
use crate::error::{AppError, AppResult};

/// Ledger repository - Postgres-backed address ledger and payment state
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    async fn log_audit_event(
        tx: &mut Transaction<'_, Postgres>,
        event_type: AuditEventType,
        entity_id: Uuid,
        details: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (event_type, entity_id, details)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event_type)
        .bind(entity_id)
        .bind(details)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

// ========== ROW MAPPING ==========

#[derive(FromRow)]
struct PendingRow {
    payment_id: Uuid,
    address_id: Uuid,
    address: String,
    purpose: AddressPurpose,
    reference_id: Uuid,
    expected_amount: BigDecimal,
    received_amount: BigDecimal,
    confirmations: i32,
}

#[derive(FromRow)]
struct AddressRow {
    id: Uuid,
    address: String,
    derivation_index: i32,
    purpose: AddressPurpose,
    expected_amount: BigDecimal,
    reference_id: Uuid,
    used: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    address_id: Uuid,
    status: PaymentStatus,
    expected_amount: BigDecimal,
    received_amount: BigDecimal,
    confirmations: i32,
    txid: Option<String>,
    last_checked_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ObservationRow {
    id: Uuid,
    payment_id: Uuid,
    received_amount: BigDecimal,
    confirmations: i32,
    txid: Option<String>,
    observed_at: DateTime<Utc>,
}

fn to_big(amount: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&amount.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion failed for {}: {}", amount, e)))
}

fn from_big(amount: &BigDecimal) -> AppResult<Decimal> {
    let text = amount.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| AppError::Internal(format!("Decimal conversion failed for {}: {}", text, e)))
}

impl TryFrom<PendingRow> for PendingPayment {
    type Error = AppError;

    fn try_from(row: PendingRow) -> AppResult<Self> {
        Ok(PendingPayment {
            payment_id: row.payment_id,
            address_id: row.address_id,
            address: row.address,
            purpose: row.purpose,
            reference_id: row.reference_id,
            expected_amount: from_big(&row.expected_amount)?,
            received_amount: from_big(&row.received_amount)?,
            confirmations: row.confirmations,
        })
    }
}

impl TryFrom<AddressRow> for DepositAddress {
    type Error = AppError;

    fn try_from(row: AddressRow) -> AppResult<Self> {
        Ok(DepositAddress {
            id: row.id,
            address: row.address,
            derivation_index: row.derivation_index,
            purpose: row.purpose,
            expected_amount: from_big(&row.expected_amount)?,
            reference_id: row.reference_id,
            used: row.used,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> AppResult<Self> {
        Ok(Payment {
            id: row.id,
            address_id: row.address_id,
            status: row.status,
            expected_amount: from_big(&row.expected_amount)?,
            received_amount: from_big(&row.received_amount)?,
            confirmations: row.confirmations,
            txid: row.txid,
            last_checked_at: row.last_checked_at,
            confirmed_at: row.confirmed_at,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ObservationRow> for PaymentObservation {
    type Error = AppError;

    fn try_from(row: ObservationRow) -> AppResult<Self> {
        Ok(PaymentObservation {
            id: row.id,
            payment_id: row.payment_id,
            received_amount: from_big(&row.received_amount)?,
            confirmations: row.confirmations,
            txid: row.txid,
            observed_at: row.observed_at,
        })
    }
}

/// Table holding the order/bond whose payment state we own
fn owner_table(purpose: AddressPurpose) -> &'static str {
    match purpose {
        AddressPurpose::Order => "orders",
        AddressPurpose::Bond => "vendor_bonds",
    }
}

fn confirmations_to_db(confirmations: u32) -> i32 {
    i32::try_from(confirmations).unwrap_or(i32::MAX)
}

const ADDRESS_COLUMNS: &str =
    "id, address, derivation_index, purpose, expected_amount, reference_id, used, created_at";

const PAYMENT_COLUMNS: &str = "id, address_id, status, expected_amount, received_amount, \
     confirmations, txid, last_checked_at, confirmed_at, created_at";

#[async_trait]
impl PaymentStore for LedgerRepository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn load_settings(&self) -> AppResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT key, value
            FROM settings
            WHERE key LIKE 'btc\_%'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn list_awaiting(&self) -> AppResult<Vec<PendingPayment>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT
                p.id AS payment_id,
                a.id AS address_id,
                a.address,
                a.purpose,
                a.reference_id,
                p.expected_amount,
                p.received_amount,
                p.confirmations
            FROM bitcoin_payments p
            JOIN bitcoin_addresses a ON a.id = p.address_id
            WHERE p.status = 'awaiting'
            ORDER BY p.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PendingPayment::try_from).collect()
    }

    async fn touch_checked(&self, payment_id: Uuid, checked_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE bitcoin_payments
            SET last_checked_at = $2
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_observation(
        &self,
        payment: &PendingPayment,
        observation: &Observation,
        confirm: bool,
    ) -> AppResult<ApplyOutcome> {
        let received = to_big(observation.received_amount)?;
        let confirmations = confirmations_to_db(observation.confirmations);

        let mut tx = self.begin_tx().await?;

        // Monotonic guard: an overlapping run may already have stored a higher
        // reading. A confirming reading goes through but never lowers the amount.
        let updated = sqlx::query(
            r#"
            UPDATE bitcoin_payments
            SET received_amount = GREATEST(received_amount, $2),
                confirmations = $3,
                txid = COALESCE($4, txid),
                last_checked_at = $5
            WHERE id = $1 AND ($6 OR received_amount <= $2)
            "#,
        )
        .bind(payment.payment_id)
        .bind(&received)
        .bind(confirmations)
        .bind(&observation.txid)
        .bind(observation.observed_at)
        .bind(confirm)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("Skipping stale observation for {}", payment.address);
            return Ok(ApplyOutcome::Stale);
        }

        sqlx::query(
            r#"
            INSERT INTO payment_observations (payment_id, received_amount, confirmations, txid, observed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(payment.payment_id)
        .bind(&received)
        .bind(confirmations)
        .bind(&observation.txid)
        .bind(observation.observed_at)
        .execute(&mut *tx)
        .await?;

        if !confirm {
            tx.commit().await?;
            return Ok(ApplyOutcome::Recorded);
        }

        let transitioned = sqlx::query(
            r#"
            UPDATE bitcoin_payments
            SET status = 'confirmed', confirmed_at = $2
            WHERE id = $1 AND status = 'awaiting'
            "#,
        )
        .bind(payment.payment_id)
        .bind(observation.observed_at)
        .execute(&mut *tx)
        .await?;

        if transitioned.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(ApplyOutcome::AlreadyConfirmed);
        }

        sqlx::query("UPDATE bitcoin_addresses SET used = TRUE WHERE id = $1")
            .bind(payment.address_id)
            .execute(&mut *tx)
            .await?;

        let owner_sql = format!(
            "UPDATE {} SET payment_status = 'confirmed', updated_at = NOW() \
             WHERE id = $1 AND payment_status = 'awaiting'",
            owner_table(payment.purpose)
        );
        sqlx::query(&owner_sql)
            .bind(payment.reference_id)
            .execute(&mut *tx)
            .await?;

        Self::log_audit_event(
            &mut tx,
            AuditEventType::PaymentConfirmed,
            payment.payment_id,
            serde_json::json!({
                "address": payment.address,
                "purpose": payment.purpose,
                "reference_id": payment.reference_id,
                "expected_amount": payment.expected_amount.to_string(),
                "received_amount": observation.received_amount.to_string(),
                "confirmations": observation.confirmations,
                "txid": observation.txid,
            }),
        )
        .await?;

        tx.commit().await?;

        debug!(
            "Owner row confirmed for {} {} ({})",
            payment.purpose.as_str(),
            payment.reference_id,
            payment.address
        );

        Ok(ApplyOutcome::Confirmed)
    }

    async fn record_inconsistency(
        &self,
        payment: &PendingPayment,
        observation: &Observation,
    ) -> AppResult<()> {
        let mut tx = self.begin_tx().await?;

        Self::log_audit_event(
            &mut tx,
            AuditEventType::ProviderInconsistency,
            payment.payment_id,
            serde_json::json!({
                "address": payment.address,
                "persisted_amount": payment.received_amount.to_string(),
                "observed_amount": observation.received_amount.to_string(),
                "observed_at": observation.observed_at,
            }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn open_obligation(
        &self,
        purpose: AddressPurpose,
        reference_id: Uuid,
        expected_amount: Decimal,
        derive: AddressDeriver<'_>,
    ) -> AppResult<PaymentSnapshot> {
        let expected = to_big(expected_amount)?;
        let mut tx = self.begin_tx().await?;

        let index: i64 = sqlx::query_scalar("SELECT nextval('bitcoin_address_index_seq')")
            .fetch_one(&mut *tx)
            .await?;
        let index = u32::try_from(index)
            .map_err(|_| AppError::Internal(format!("Derivation index {} out of range", index)))?;

        let address = derive(index)?;

        let address_row = sqlx::query_as::<_, AddressRow>(&format!(
            r#"
            INSERT INTO bitcoin_addresses (address, derivation_index, purpose, expected_amount, reference_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            ADDRESS_COLUMNS
        ))
        .bind(&address)
        .bind(index as i32) // below 2^31, derivation rejects hardened indexes
        .bind(purpose)
        .bind(&expected)
        .bind(reference_id)
        .fetch_one(&mut *tx)
        .await?;

        let payment_row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO bitcoin_payments (address_id, expected_amount)
            VALUES ($1, $2)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(address_row.id)
        .bind(&expected)
        .fetch_one(&mut *tx)
        .await?;

        Self::log_audit_event(
            &mut tx,
            AuditEventType::ObligationOpened,
            payment_row.id,
            serde_json::json!({
                "address": address,
                "derivation_index": index,
                "purpose": purpose,
                "reference_id": reference_id,
                "expected_amount": expected_amount.to_string(),
            }),
        )
        .await?;

        tx.commit().await?;

        Ok(PaymentSnapshot {
            address: DepositAddress::try_from(address_row)?,
            payment: Payment::try_from(payment_row)?,
            latest_observation: None,
        })
    }

    async fn find_by_address(&self, address: &str) -> AppResult<Option<PaymentSnapshot>> {
        let address_row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {} FROM bitcoin_addresses WHERE address = $1",
            ADDRESS_COLUMNS
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        let Some(address_row) = address_row else {
            return Ok(None);
        };

        let payment_row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM bitcoin_payments WHERE address_id = $1 ORDER BY created_at DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(address_row.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment for address {}", address)))?;

        let observation_row = sqlx::query_as::<_, ObservationRow>(
            r#"
            SELECT id, payment_id, received_amount, confirmations, txid, observed_at
            FROM payment_observations
            WHERE payment_id = $1
            ORDER BY observed_at DESC
            LIMIT 1
            "#,
        )
        .bind(payment_row.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(PaymentSnapshot {
            address: DepositAddress::try_from(address_row)?,
            payment: Payment::try_from(payment_row)?,
            latest_observation: observation_row
                .map(PaymentObservation::try_from)
                .transpose()?,
        }))
    }
}
