// Typed view over the admin key/value settings store.
//
// Loaded once per reconciliation cycle and passed explicitly. Missing keys
// fall back to documented defaults; present-but-invalid values are fatal.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::debug;

use crate::error::SettingsError;
use crate::ledger::models::{BtcNetwork, ProviderKind};

pub const KEY_PROVIDER: &str = "btc_provider";
pub const KEY_NETWORK: &str = "btc_network";
pub const KEY_CONFIRMATIONS: &str = "btc_confirmations";
pub const KEY_XPUB: &str = "btc_xpub";

pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Blockstream;
pub const DEFAULT_NETWORK: BtcNetwork = BtcNetwork::Testnet;
pub const DEFAULT_CONFIRMATIONS: u32 = 3;
pub const CONFIRMATIONS_RANGE: RangeInclusive<u32> = 1..=6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitcoinSettings {
    pub provider: ProviderKind,
    pub network: BtcNetwork,
    pub required_confirmations: u32,
    /// Only used when opening new obligations
    #[serde(skip_serializing)]
    pub xpub: Option<String>,
}

impl Default for BitcoinSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER,
            network: DEFAULT_NETWORK,
            required_confirmations: DEFAULT_CONFIRMATIONS,
            xpub: None,
        }
    }
}

impl BitcoinSettings {
    /// Build settings from raw key/value rows
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let provider = match non_empty(values, KEY_PROVIDER) {
            Some(raw) => raw.parse::<ProviderKind>().map_err(|reason| SettingsError::InvalidValue {
                key: KEY_PROVIDER.to_string(),
                value: raw.to_string(),
                reason,
            })?,
            None => {
                debug!("{} not set, using {}", KEY_PROVIDER, DEFAULT_PROVIDER);
                DEFAULT_PROVIDER
            }
        };

        let network = match non_empty(values, KEY_NETWORK) {
            Some(raw) => raw.parse::<BtcNetwork>().map_err(|reason| SettingsError::InvalidValue {
                key: KEY_NETWORK.to_string(),
                value: raw.to_string(),
                reason,
            })?,
            None => {
                debug!("{} not set, using {}", KEY_NETWORK, DEFAULT_NETWORK);
                DEFAULT_NETWORK
            }
        };

        let required_confirmations = match non_empty(values, KEY_CONFIRMATIONS) {
            Some(raw) => parse_confirmations(raw)?,
            None => {
                debug!("{} not set, using {}", KEY_CONFIRMATIONS, DEFAULT_CONFIRMATIONS);
                DEFAULT_CONFIRMATIONS
            }
        };

        let xpub = non_empty(values, KEY_XPUB).map(str::to_string);

        Ok(Self {
            provider,
            network,
            required_confirmations,
            xpub,
        })
    }

    pub fn require_xpub(&self) -> Result<&str, SettingsError> {
        self.xpub.as_deref().ok_or(SettingsError::MissingXpub)
    }
}

fn non_empty<'a>(values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_confirmations(raw: &str) -> Result<u32, SettingsError> {
    let invalid = |reason: &str| SettingsError::InvalidValue {
        key: KEY_CONFIRMATIONS.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let value = raw.parse::<u32>().map_err(|_| invalid("not an integer"))?;
    if !CONFIRMATIONS_RANGE.contains(&value) {
        return Err(invalid("must be between 1 and 6"));
    }
    Ok(value)
}
