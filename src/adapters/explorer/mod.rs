pub mod blockcypher;
pub mod blockstream;

pub use blockcypher::BlockcypherProvider;
pub use blockstream::BlockstreamProvider;

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::ProbeError;
use crate::ledger::models::ProviderKind;

/// GET a URL and return the body, mapping transport and status failures
pub(crate) async fn get_text(
    client: &Client,
    provider: ProviderKind,
    url: &str,
) -> Result<String, ProbeError> {
    let response = client.get(url).send().await.map_err(|e| ProbeError::Http {
        provider,
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status {
            provider,
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| ProbeError::Http {
        provider,
        message: e.to_string(),
    })
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: ProviderKind,
    url: &str,
) -> Result<T, ProbeError> {
    let body = get_text(client, provider, url).await?;
    parse_json(provider, &body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: ProviderKind,
    body: &str,
) -> Result<T, ProbeError> {
    serde_json::from_str(body).map_err(|e| ProbeError::Malformed {
        provider,
        message: format!("invalid JSON: {}", e),
    })
}

fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}
