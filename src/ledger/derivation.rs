use std::str::FromStr;

use bitcoin::secp256k1::Secp256k1;
use bitcoin::util::bip32::{ChildNumber, ExtendedPubKey};
use bitcoin::{Address, PublicKey};

use crate::error::{AppError, AppResult, SettingsError};
use crate::ledger::models::BtcNetwork;

/// Derive the native segwit receiving address at `0/<index>` below the xpub.
pub fn derive_receiving_address(xpub: &str, network: BtcNetwork, index: u32) -> AppResult<String> {
    let xpub = ExtendedPubKey::from_str(xpub.trim())?;

    if !same_network(xpub.network, network.to_bitcoin()) {
        return Err(SettingsError::XpubNetworkMismatch {
            expected: network.to_string(),
        }
        .into());
    }

    let secp = Secp256k1::verification_only();
    let path = [
        ChildNumber::from_normal_idx(0)?,
        ChildNumber::from_normal_idx(index)?,
    ];
    let child = xpub.derive_pub(&secp, &path)?;
    let address = Address::p2wpkh(&PublicKey::new(child.public_key), network.to_bitcoin())?;

    Ok(address.to_string())
}

/// Parse an address and check it belongs to the configured network
pub fn parse_address(address: &str, network: BtcNetwork) -> AppResult<Address> {
    let parsed = Address::from_str(address.trim())
        .map_err(|e| AppError::InvalidAddress(format!("{}: {}", address, e)))?;

    if !same_network(parsed.network, network.to_bitcoin()) {
        return Err(AppError::InvalidAddress(format!(
            "{} is not a {} address",
            address, network
        )));
    }

    Ok(parsed)
}

// tpub/testnet-encoded keys and addresses are shared by testnet, signet and regtest
fn same_network(actual: bitcoin::Network, expected: bitcoin::Network) -> bool {
    use bitcoin::Network::*;
    match expected {
        Bitcoin => actual == Bitcoin,
        Testnet | Signet | Regtest => actual != Bitcoin,
    }
}
