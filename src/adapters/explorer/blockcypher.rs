use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{get_json, trim_base};
use crate::adapters::traits::{summarize_funding, AddressStatus, ChainProvider, FundingOutput};
use crate::error::ProbeError;
use crate::ledger::models::{BtcNetwork, ProviderKind};

const API: &str = "https://api.blockcypher.com/v1/btc";

/// BlockCypher address endpoint
pub struct BlockcypherProvider {
    client: Client,
    base_override: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddressResponse {
    #[serde(default)]
    pub total_received: i64,
    #[serde(default)]
    pub txrefs: Vec<TxRef>,
    #[serde(default)]
    pub unconfirmed_txrefs: Vec<TxRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TxRef {
    pub tx_hash: String,
    /// -1 when this reference is an output paying the address
    pub tx_input_n: i64,
    pub value: i64,
    #[serde(default)]
    pub confirmations: u64,
}

impl BlockcypherProvider {
    pub fn new(client: Client, base_override: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_override: base_override.map(|b| trim_base(&b)),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn address_url(&self, address: &str, network: BtcNetwork) -> String {
        let base = match &self.base_override {
            Some(base) => base.clone(),
            None => {
                let chain = match network {
                    BtcNetwork::Mainnet => "main",
                    BtcNetwork::Testnet => "test3",
                };
                format!("{}/{}", API, chain)
            }
        };

        let mut url = format!("{}/addrs/{}?limit=50", base, address);
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(token);
        }
        url
    }
}

/// Outputs paying the address, unconfirmed first
pub(crate) fn funding_outputs(response: &AddressResponse) -> Vec<FundingOutput> {
    response
        .unconfirmed_txrefs
        .iter()
        .map(|r| (r, 0u64))
        .chain(response.txrefs.iter().map(|r| (r, r.confirmations)))
        .filter(|(r, _)| r.tx_input_n == -1)
        .map(|(r, confirmations)| FundingOutput {
            txid: r.tx_hash.clone(),
            value_sats: r.value,
            confirmations: confirmations.min(u32::MAX as u64) as u32,
        })
        .collect()
}

#[async_trait]
impl ChainProvider for BlockcypherProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Blockcypher
    }

    async fn address_status(
        &self,
        address: &str,
        network: BtcNetwork,
    ) -> Result<AddressStatus, ProbeError> {
        let response: AddressResponse =
            get_json(&self.client, self.kind(), &self.address_url(address, network)).await?;

        let outputs = funding_outputs(&response);
        debug!(
            "BlockCypher: {} has {} funding refs (total_received {})",
            address,
            outputs.len(),
            response.total_received
        );

        let status = summarize_funding(self.kind(), &outputs)?;

        // Truncated txref lists still report the confirmed total
        if status.received_sats < response.total_received {
            return Ok(AddressStatus {
                received_sats: response.total_received,
                ..status
            });
        }

        Ok(status)
    }
}
