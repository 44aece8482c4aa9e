use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::prober::{BlockchainProber, ProbePolicy, ProbeResult};
use crate::adapters::registry::ProviderRegistry;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{BtcNetwork, PendingPayment, ProviderKind};
use crate::ledger::settings::BitcoinSettings;
use crate::ledger::store::{ApplyOutcome, PaymentStore};
use crate::reconciliation::evaluator::{evaluate, Decision};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Maximum concurrent address probes
    pub workers: usize,
    /// Wall-clock budget for one cycle; unfinished addresses are deferred
    pub batch_deadline: Duration,
    pub probe_policy: ProbePolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_deadline: Duration::from_secs(240),
            probe_policy: ProbePolicy::default(),
        }
    }
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub provider: ProviderKind,
    pub network: BtcNetwork,
    pub required_confirmations: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Addresses whose processing finished this cycle
    pub checked: usize,
    pub confirmed: usize,
    /// Confirmed by an overlapping run before this one got there
    pub already_confirmed: usize,
    pub awaiting: usize,
    pub provider_failures: usize,
    pub inconsistencies: usize,
    pub persistence_failures: usize,
    /// Not reached before the batch deadline
    pub deferred: usize,
}

impl CycleReport {
    fn new(settings: &BitcoinSettings) -> Self {
        let now = Utc::now();
        Self {
            cycle_id: Uuid::new_v4(),
            provider: settings.provider,
            network: settings.network,
            required_confirmations: settings.required_confirmations,
            started_at: now,
            finished_at: now,
            checked: 0,
            confirmed: 0,
            already_confirmed: 0,
            awaiting: 0,
            provider_failures: 0,
            inconsistencies: 0,
            persistence_failures: 0,
            deferred: 0,
        }
    }

    fn tally(&mut self, outcome: AddressOutcome) {
        self.checked += 1;
        match outcome {
            AddressOutcome::Confirmed => self.confirmed += 1,
            AddressOutcome::AlreadyConfirmed => self.already_confirmed += 1,
            AddressOutcome::Awaiting => self.awaiting += 1,
            AddressOutcome::NoData => self.provider_failures += 1,
            AddressOutcome::Inconsistent => self.inconsistencies += 1,
            AddressOutcome::PersistenceFailed => self.persistence_failures += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressOutcome {
    Confirmed,
    AlreadyConfirmed,
    Awaiting,
    NoData,
    Inconsistent,
    PersistenceFailed,
}

/// Resets the single-flight flag however the cycle ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one batch of awaiting payments through probe, evaluate, persist
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    providers: Arc<ProviderRegistry>,
    config: ReconcilerConfig,
    running: AtomicBool,
    last_report: RwLock<Option<CycleReport>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        providers: Arc<ProviderRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            providers,
            config,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    /// Run one full cycle. Safe to call again from scratch at any time.
    ///
    /// Fails only on configuration or listing errors; per-address problems
    /// are counted in the report.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::CycleInProgress);
        }
        let _guard = CycleGuard(&self.running);

        let settings = BitcoinSettings::from_map(&self.store.load_settings().await?)?;
        let provider = self.providers.get(settings.provider).ok_or_else(|| {
            AppError::Config(format!("provider {} is not registered", settings.provider))
        })?;
        let prober = BlockchainProber::new(provider, self.config.probe_policy.clone());

        let pending = self.store.list_awaiting().await?;
        let mut report = CycleReport::new(&settings);

        info!(
            "🔄 Reconciliation cycle {} starting: {} awaiting payments via {} ({}, {} confirmations required)",
            report.cycle_id,
            pending.len(),
            settings.provider,
            settings.network,
            settings.required_confirmations
        );

        let deadline = tokio::time::Instant::now() + self.config.batch_deadline;
        let (prober, settings) = (&prober, &settings);
        let mut results = stream::iter(pending.iter().cloned())
            .map(move |payment| async move { self.reconcile_one(prober, settings, &payment).await })
            .buffer_unordered(self.config.workers.max(1));

        loop {
            match tokio::time::timeout_at(deadline, results.next()).await {
                Ok(Some(outcome)) => report.tally(outcome),
                Ok(None) => break,
                Err(_) => {
                    report.deferred = pending.len() - report.checked;
                    warn!(
                        "⏱️  Batch deadline of {:?} reached, deferring {} addresses to the next cycle",
                        self.config.batch_deadline, report.deferred
                    );
                    break;
                }
            }
        }
        drop(results);

        if report.checked > 0 && report.provider_failures == report.checked {
            warn!(
                "⚠️  {} returned no data for all {} addresses this cycle, provider may be down",
                settings.provider, report.checked
            );
        }

        report.finished_at = Utc::now();
        info!(
            "✅ Reconciliation cycle {} done: checked={} confirmed={} awaiting={} provider_failures={} inconsistencies={} persistence_failures={} deferred={}",
            report.cycle_id,
            report.checked,
            report.confirmed,
            report.awaiting,
            report.provider_failures,
            report.inconsistencies,
            report.persistence_failures,
            report.deferred
        );

        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    #[instrument(skip_all, fields(address = %payment.address, payment_id = %payment.payment_id))]
    async fn reconcile_one(
        &self,
        prober: &BlockchainProber,
        settings: &BitcoinSettings,
        payment: &PendingPayment,
    ) -> AddressOutcome {
        let observation = match prober.probe(&payment.address, settings.network).await {
            ProbeResult::Observed(observation) => observation,
            ProbeResult::NoData { .. } => {
                if let Err(e) = self.store.touch_checked(payment.payment_id, Utc::now()).await {
                    warn!("Failed to record check time: {}", e);
                }
                return AddressOutcome::NoData;
            }
        };

        let decision = evaluate(payment, &observation, settings.required_confirmations);

        match decision {
            Decision::Regressed { persisted, observed } => {
                warn!(
                    "⚠️  {} reported {} BTC, below persisted {} BTC; ignoring reading",
                    prober.provider_kind(),
                    observed,
                    persisted
                );
                if let Err(e) = self.store.record_inconsistency(payment, &observation).await {
                    error!("Failed to audit provider inconsistency: {}", e);
                }
                if let Err(e) = self.store.touch_checked(payment.payment_id, observation.observed_at).await {
                    warn!("Failed to record check time: {}", e);
                }
                return AddressOutcome::Inconsistent;
            }
            Decision::Confirm if observation.received_amount < payment.received_amount => {
                // Unconfirmed funds seen earlier are gone, but what remains settles the payment
                warn!(
                    "⚠️  {} reported {} BTC, below persisted {} BTC; confirming on the fresh reading",
                    prober.provider_kind(),
                    observation.received_amount,
                    payment.received_amount
                );
                if let Err(e) = self.store.record_inconsistency(payment, &observation).await {
                    error!("Failed to audit provider inconsistency: {}", e);
                }
            }
            _ => {}
        }

        let confirm = decision == Decision::Confirm;
        match self.store.apply_observation(payment, &observation, confirm).await {
            Ok(ApplyOutcome::Confirmed) => {
                info!(
                    "✅ Payment confirmed: {} BTC with {} confirmations ({} {})",
                    observation.received_amount,
                    observation.confirmations,
                    payment.purpose.as_str(),
                    payment.reference_id
                );
                AddressOutcome::Confirmed
            }
            Ok(ApplyOutcome::AlreadyConfirmed) => {
                debug!("Payment was confirmed by an overlapping cycle");
                AddressOutcome::AlreadyConfirmed
            }
            Ok(ApplyOutcome::Recorded) => {
                debug!(
                    "Still awaiting: {}/{} BTC, {}/{} confirmations",
                    observation.received_amount,
                    payment.expected_amount,
                    observation.confirmations,
                    settings.required_confirmations
                );
                AddressOutcome::Awaiting
            }
            Ok(ApplyOutcome::Stale) => {
                debug!("A newer reading was persisted concurrently");
                AddressOutcome::Awaiting
            }
            Err(e) => {
                error!("❌ Failed to persist observation, will retry next cycle: {}", e);
                AddressOutcome::PersistenceFailed
            }
        }
    }
}
