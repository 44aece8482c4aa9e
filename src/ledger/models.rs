use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Satoshis per bitcoin, as a decimal scale
pub const BTC_DECIMALS: u32 = 8;

/// Largest amount that can ever exist on chain, in satoshis
pub const MAX_SATS: i64 = 21_000_000 * 100_000_000;

/// Chain data providers the prober can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Blockstream,
    Blockcypher,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Blockstream => "blockstream",
            ProviderKind::Blockcypher => "blockcypher",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blockstream" => Ok(ProviderKind::Blockstream),
            "blockcypher" => Ok(ProviderKind::Blockcypher),
            other => Err(format!("unsupported provider '{}'", other)),
        }
    }
}

/// Bitcoin network the deposit addresses live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    Mainnet,
    Testnet,
}

impl BtcNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            BtcNetwork::Mainnet => "mainnet",
            BtcNetwork::Testnet => "testnet",
        }
    }

    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            BtcNetwork::Mainnet => bitcoin::Network::Bitcoin,
            BtcNetwork::Testnet => bitcoin::Network::Testnet,
        }
    }
}

impl fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BtcNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(BtcNetwork::Mainnet),
            "testnet" | "test" | "testnet3" => Ok(BtcNetwork::Testnet),
            other => Err(format!("unsupported network '{}'", other)),
        }
    }
}

/// What a deposit address was generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "address_purpose", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AddressPurpose {
    Order,
    Bond,
}

impl AddressPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressPurpose::Order => "order",
            AddressPurpose::Bond => "bond",
        }
    }
}

/// Payment obligation status
///
/// `Awaiting -> Confirmed` is the only transition this service performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Awaiting,
    Confirmed,
}

/// One-time deposit address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    pub id: Uuid,
    pub address: String,
    pub derivation_index: i32,
    pub purpose: AddressPurpose,
    pub expected_amount: Decimal,
    /// Order or bond id this address was issued for
    pub reference_id: Uuid,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Payment obligation attached to a deposit address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub address_id: Uuid,
    pub status: PaymentStatus,
    pub expected_amount: Decimal,
    pub received_amount: Decimal,
    pub confirmations: i32,
    pub txid: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Awaiting payment joined with its address, as fed to the reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayment {
    pub payment_id: Uuid,
    pub address_id: Uuid,
    pub address: String,
    pub purpose: AddressPurpose,
    pub reference_id: Uuid,
    pub expected_amount: Decimal,
    /// Last persisted reading, used to enforce the monotonic-amount invariant
    pub received_amount: Decimal,
    pub confirmations: i32,
}

/// On-chain status of an address at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub received_amount: Decimal,
    pub confirmations: u32,
    pub txid: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Persisted observation history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentObservation {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub received_amount: Decimal,
    pub confirmations: i32,
    pub txid: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
pub enum AuditEventType {
    ObligationOpened,
    PaymentConfirmed,
    ProviderInconsistency,
}

/// Convert an integer satoshi amount to BTC without going through floats
pub fn btc_from_sats(sats: i64) -> Decimal {
    Decimal::new(sats, BTC_DECIMALS)
}

/// Validate a BTC amount: strictly positive, at most 8 fractional digits,
/// within the total supply.
pub fn validate_btc_amount(amount: Decimal) -> Result<Decimal, String> {
    if amount <= Decimal::ZERO {
        return Err("amount must be greater than zero".to_string());
    }
    let normalized = amount.normalize();
    if normalized.scale() > BTC_DECIMALS {
        return Err(format!(
            "amount {} has more than {} decimal places",
            amount, BTC_DECIMALS
        ));
    }
    if normalized > btc_from_sats(MAX_SATS) {
        return Err(format!("amount {} exceeds total supply", amount));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sats_conversion_is_exact() {
        assert_eq!(btc_from_sats(1), dec!(0.00000001));
        assert_eq!(btc_from_sats(100_000), dec!(0.001));
        assert_eq!(btc_from_sats(100_000), dec!(0.00100000));
        assert_eq!(btc_from_sats(MAX_SATS), dec!(21000000));
    }

    #[test]
    fn test_validate_btc_amount() {
        assert_eq!(validate_btc_amount(dec!(0.00100000)), Ok(dec!(0.001)));
        assert!(validate_btc_amount(dec!(0.00000001)).is_ok());
        assert!(validate_btc_amount(dec!(0.000000001)).is_err());
        assert!(validate_btc_amount(Decimal::ZERO).is_err());
        assert!(validate_btc_amount(dec!(-1)).is_err());
        assert!(validate_btc_amount(dec!(21000000.00000001)).is_err());
    }

    #[test]
    fn test_provider_and_network_parsing() {
        assert_eq!("Blockstream".parse::<ProviderKind>(), Ok(ProviderKind::Blockstream));
        assert_eq!("blockcypher".parse::<ProviderKind>(), Ok(ProviderKind::Blockcypher));
        assert!("mempool".parse::<ProviderKind>().is_err());

        assert_eq!("mainnet".parse::<BtcNetwork>(), Ok(BtcNetwork::Mainnet));
        assert_eq!(" testnet ".parse::<BtcNetwork>(), Ok(BtcNetwork::Testnet));
        assert!("regtest".parse::<BtcNetwork>().is_err());
    }
}
