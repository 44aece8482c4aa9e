use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{get_json, get_text, trim_base};
use crate::adapters::traits::{summarize_funding, AddressStatus, ChainProvider, FundingOutput};
use crate::error::ProbeError;
use crate::ledger::models::{BtcNetwork, ProviderKind};

const MAINNET_API: &str = "https://blockstream.info/api";
const TESTNET_API: &str = "https://blockstream.info/testnet/api";

/// Confirmed transactions per Esplora history page
const CHAIN_PAGE_SIZE: usize = 25;
/// Upper bound on history pages fetched for one address
const MAX_CHAIN_PAGES: usize = 40;

/// Esplora REST API (blockstream.info or a self-hosted instance)
pub struct BlockstreamProvider {
    client: Client,
    base_override: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraTx {
    pub txid: String,
    pub status: EsploraStatus,
    #[serde(default)]
    pub vout: Vec<EsploraVout>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraVout {
    pub scriptpubkey_address: Option<String>,
    pub value: i64,
}

impl BlockstreamProvider {
    pub fn new(client: Client, base_override: Option<String>) -> Self {
        Self {
            client,
            base_override: base_override.map(|b| trim_base(&b)),
        }
    }

    fn base_url(&self, network: BtcNetwork) -> String {
        match &self.base_override {
            Some(base) => base.clone(),
            None => match network {
                BtcNetwork::Mainnet => MAINNET_API.to_string(),
                BtcNetwork::Testnet => TESTNET_API.to_string(),
            },
        }
    }

    async fn tip_height(&self, base: &str) -> Result<u64, ProbeError> {
        let body = get_text(&self.client, self.kind(), &format!("{}/blocks/tip/height", base)).await?;
        body.trim().parse::<u64>().map_err(|_| ProbeError::Malformed {
            provider: self.kind(),
            message: format!("invalid tip height {:?}", body.trim()),
        })
    }
}

/// Txid to continue confirmed history from, when `page` came back full
pub(crate) fn next_chain_cursor(page: &[EsploraTx]) -> Option<&str> {
    let confirmed: Vec<&EsploraTx> = page.iter().filter(|tx| tx.status.confirmed).collect();
    if confirmed.len() < CHAIN_PAGE_SIZE {
        return None;
    }
    confirmed.last().map(|tx| tx.txid.as_str())
}

/// Outputs paying `address`, newest transaction first
pub(crate) fn funding_outputs(address: &str, tip_height: u64, txs: &[EsploraTx]) -> Vec<FundingOutput> {
    txs.iter()
        .filter_map(|tx| {
            let value_sats: i64 = tx
                .vout
                .iter()
                .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
                .map(|out| out.value)
                .sum();
            if value_sats == 0 {
                return None;
            }

            let confirmations = match (tx.status.confirmed, tx.status.block_height) {
                (true, Some(height)) => (tip_height.saturating_sub(height) + 1).min(u32::MAX as u64) as u32,
                _ => 0,
            };

            Some(FundingOutput {
                txid: tx.txid.clone(),
                value_sats,
                confirmations,
            })
        })
        .collect()
}

#[async_trait]
impl ChainProvider for BlockstreamProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Blockstream
    }

    async fn address_status(
        &self,
        address: &str,
        network: BtcNetwork,
    ) -> Result<AddressStatus, ProbeError> {
        let base = self.base_url(network);

        // First page: mempool plus the newest confirmed transactions
        let mut txs: Vec<EsploraTx> =
            get_json(&self.client, self.kind(), &format!("{}/address/{}/txs", base, address)).await?;
        let mut cursor = next_chain_cursor(&txs).map(str::to_string);
        let mut pages = 1;

        while let Some(last_seen) = cursor.take() {
            if pages >= MAX_CHAIN_PAGES {
                warn!(
                    "⚠️  Esplora: {} has more than {} history pages, received amount is a lower bound",
                    address, MAX_CHAIN_PAGES
                );
                break;
            }
            let page: Vec<EsploraTx> = get_json(
                &self.client,
                self.kind(),
                &format!("{}/address/{}/txs/chain/{}", base, address, last_seen),
            )
            .await?;
            pages += 1;
            cursor = next_chain_cursor(&page).map(str::to_string);
            txs.extend(page);
        }

        let tip_height = self.tip_height(&base).await?;

        let outputs = funding_outputs(address, tip_height, &txs);
        debug!(
            "Esplora: {} has {} funding txs at tip {}",
            address,
            outputs.len(),
            tip_height
        );

        summarize_funding(self.kind(), &outputs)
    }
}
