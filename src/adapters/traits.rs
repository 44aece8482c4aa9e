use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::ledger::models::{BtcNetwork, ProviderKind, MAX_SATS};

/// Raw on-chain status of one address as reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStatus {
    /// Total paid to the address, confirmed and unconfirmed, in satoshis
    pub received_sats: i64,
    /// Confirmations of the least-confirmed funding transaction
    pub confirmations: u32,
    /// Most recent funding transaction
    pub txid: Option<String>,
}

impl AddressStatus {
    pub fn empty() -> Self {
        Self {
            received_sats: 0,
            confirmations: 0,
            txid: None,
        }
    }
}

/// One funding output paid to the watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingOutput {
    pub txid: String,
    pub value_sats: i64,
    pub confirmations: u32,
}

/// Block explorer backend. Implementations are plain reads; retries and
/// timeouts are applied by the prober.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn address_status(
        &self,
        address: &str,
        network: BtcNetwork,
    ) -> Result<AddressStatus, ProbeError>;
}

/// Fold funding outputs (newest first) into a single status
pub fn summarize_funding(
    provider: ProviderKind,
    outputs: &[FundingOutput],
) -> Result<AddressStatus, ProbeError> {
    if outputs.is_empty() {
        return Ok(AddressStatus::empty());
    }

    let mut received_sats: i64 = 0;
    for output in outputs {
        if output.value_sats < 0 {
            return Err(ProbeError::Malformed {
                provider,
                message: format!("negative output value in {}", output.txid),
            });
        }
        validate_txid(provider, &output.txid)?;
        received_sats = received_sats
            .checked_add(output.value_sats)
            .filter(|total| *total <= MAX_SATS)
            .ok_or_else(|| ProbeError::Malformed {
                provider,
                message: "received amount exceeds total supply".to_string(),
            })?;
    }

    let confirmations = outputs
        .iter()
        .map(|o| o.confirmations)
        .min()
        .unwrap_or(0);

    Ok(AddressStatus {
        received_sats,
        confirmations,
        txid: outputs.first().map(|o| o.txid.to_ascii_lowercase()),
    })
}

/// Transaction ids are 32-byte hex strings
pub fn validate_txid(provider: ProviderKind, txid: &str) -> Result<(), ProbeError> {
    match hex::decode(txid) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(ProbeError::Malformed {
            provider,
            message: format!("invalid txid {:?}", txid),
        }),
    }
}
