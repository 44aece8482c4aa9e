// Blockchain status prober.
//
// Wraps one ChainProvider with address validation, a per-call timeout and
// exponential backoff. Never returns an error: every failure collapses into
// `ProbeResult::NoData` so a batch keeps going.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, warn};

use crate::adapters::traits::{AddressStatus, ChainProvider};
use crate::error::ProbeError;
use crate::ledger::derivation::parse_address;
use crate::ledger::models::{btc_from_sats, BtcNetwork, Observation, ProviderKind};

#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Observed(Observation),
    /// Provider unusable this cycle; treated as zero amount, zero confirmations
    NoData { reason: String },
}

impl ProbeResult {
    pub fn is_no_data(&self) -> bool {
        matches!(self, ProbeResult::NoData { .. })
    }
}

pub struct BlockchainProber {
    provider: Arc<dyn ChainProvider>,
    policy: ProbePolicy,
}

impl BlockchainProber {
    pub fn new(provider: Arc<dyn ChainProvider>, policy: ProbePolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub async fn probe(&self, address: &str, network: BtcNetwork) -> ProbeResult {
        if let Err(e) = parse_address(address, network) {
            warn!("⚠️  Skipping probe: {}", e);
            return ProbeResult::NoData {
                reason: e.to_string(),
            };
        }

        match self.fetch_with_retries(address, network).await {
            Ok(status) => ProbeResult::Observed(Observation {
                received_amount: btc_from_sats(status.received_sats),
                confirmations: status.confirmations,
                txid: status.txid,
                observed_at: Utc::now(),
            }),
            Err(e) => {
                warn!("⚠️  No data for {} this cycle: {}", address, e);
                ProbeResult::NoData {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        address: &str,
        network: BtcNetwork,
    ) -> Result<AddressStatus, ProbeError> {
        let kind = self.provider.kind();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.policy.call_timeout,
                self.provider.address_status(address, network),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout {
                    provider: kind,
                    timeout: self.policy.call_timeout,
                }),
            };

            match result {
                Ok(status) => {
                    debug!(
                        "{} reports {} sats / {} conf for {} (attempt {})",
                        kind, status.received_sats, status.confirmations, address, attempt
                    );
                    return Ok(status);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = with_jitter(backoff);
                    warn!(
                        "🔄 {} probe for {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        kind, address, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2).min(self.policy.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Add up to 50% random jitter so concurrent retries spread out
fn with_jitter(base: Duration) -> Duration {
    let max_extra = (base.as_millis() as u64) / 2;
    if max_extra == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=max_extra))
}
