use std::time::Duration;

use serde::Deserialize;

use crate::adapters::prober::ProbePolicy;
use crate::reconciliation::ReconcilerConfig;

/// Process configuration, read from the environment (and `.env`).
///
/// Bitcoin settings (provider, network, confirmations, xpub) are not here:
/// they live in the admin settings table and are reloaded every cycle.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Shared secret expected in `X-Cron-Token`; empty disables the gated routes
    pub cron_token: String,
    pub reconcile_workers: usize,
    pub batch_deadline_secs: u64,
    pub probe_timeout_secs: u64,
    pub probe_max_attempts: u32,
    pub probe_backoff_ms: u64,
    pub probe_max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub cron_rate_limit_per_minute: u32,
    pub blockstream_base_url: Option<String>,
    pub blockcypher_base_url: Option<String>,
    pub blockcypher_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default().try_parsing(true))
    }

    fn load(env: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Config = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/payments")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("cron_token", "")?
            .set_default("reconcile_workers", 8)?
            .set_default("batch_deadline_secs", 240)?
            .set_default("probe_timeout_secs", 10)?
            .set_default("probe_max_attempts", 3)?
            .set_default("probe_backoff_ms", 500)?
            .set_default("probe_max_backoff_ms", 8_000)?
            .set_default("request_timeout_secs", 300)?
            .set_default("cron_rate_limit_per_minute", 12)?
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.reconcile_workers == 0 {
            return Err(config::ConfigError::Message(
                "RECONCILE_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.probe_max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "PROBE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs <= self.batch_deadline_secs {
            return Err(config::ConfigError::Message(
                "REQUEST_TIMEOUT_SECS must exceed BATCH_DEADLINE_SECS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            call_timeout: Duration::from_secs(self.probe_timeout_secs),
            max_attempts: self.probe_max_attempts,
            initial_backoff: Duration::from_millis(self.probe_backoff_ms),
            max_backoff: Duration::from_millis(self.probe_max_backoff_ms),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            workers: self.reconcile_workers,
            batch_deadline: Duration::from_secs(self.batch_deadline_secs),
            probe_policy: self.probe_policy(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let source = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default()
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = Config::load(env(&[])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.reconcile_workers, 8);
        assert_eq!(config.cron_token, "");
        assert!(config.blockcypher_token.is_none());

        let policy = config.probe_policy();
        assert_eq!(policy.call_timeout, Duration::from_secs(10));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::load(env(&[
            ("RECONCILE_WORKERS", "16"),
            ("CRON_TOKEN", "s3cret"),
            ("BLOCKSTREAM_BASE_URL", "http://esplora:3000"),
        ]))
        .unwrap();

        assert_eq!(config.reconciler_config().workers, 16);
        assert_eq!(config.cron_token, "s3cret");
        assert_eq!(config.blockstream_base_url.as_deref(), Some("http://esplora:3000"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::load(env(&[("RECONCILE_WORKERS", "0")])).is_err());
        assert!(Config::load(env(&[("RECONCILE_WORKERS", "many")])).is_err());
        assert!(Config::load(env(&[("REQUEST_TIMEOUT_SECS", "60")])).is_err());
    }
}
