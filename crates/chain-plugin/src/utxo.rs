// OTC Broker Engine
// Copyright (C) 2026 OTC Broker Engine contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! A Bitcoin-family (UTXO) [`ChainPlugin`] implementation, modeling deposits
//! as balance probes against an address-indexing RPC/explorer rather than
//! event logs, and exposing the raw parent-transaction lookups the vesting
//! tracer (spec §4.7) walks to find a UTXO's coinbase ancestor.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{DealId, EscrowAccountRef, Side};
use parking_lot::Mutex;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::trait_::{
    ChainPlugin, ConfirmedDeposits, ObservedDeposit, PriceQuote, SubmitOutcome, SubmitRequest,
    TransferEvent,
};

/// Configuration for a [`UtxoChainPlugin`].
#[derive(Debug, Clone)]
pub struct UtxoChainConfig {
    /// Chain identifier, e.g. `"BTC"`.
    pub chain_id: String,
    /// Base URL of an address-indexing explorer API (esplora-compatible).
    pub explorer_base_url: String,
    /// Confirmations required before a deposit counts as confirmed.
    pub confirmation_threshold: u64,
    /// Hot-wallet seed used to derive escrow addresses.
    pub hot_wallet_seed: String,
    /// Operator address/descriptor, if applicable.
    pub operator_address: Option<String>,
    /// Block height at or before which a coinbase output is vested (spec §4.7).
    pub vesting_threshold_height: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    vin: Vec<EsploraVin>,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    txid: Option<String>,
    is_coinbase: Option<bool>,
}

/// A Bitcoin-family chain plugin using an esplora-compatible address/UTXO
/// explorer. Deposits are observed as synthetic balance probes (spec §3)
/// since UTXO sets do not map 1:1 onto an ordered transfer log the way
/// account-model Transfer events do.
#[derive(Debug)]
pub struct UtxoChainPlugin {
    cfg: UtxoChainConfig,
    client: Client,
    /// In-memory vesting cache keyed by txid, mirroring spec §4.7
    /// "transient errors are memory-only" pending persistence by the store.
    vesting_cache: Mutex<HashMap<String, bool>>,
}

impl UtxoChainPlugin {
    /// Construct a plugin pointed at `cfg.explorer_base_url`.
    pub fn new(cfg: UtxoChainConfig) -> eyre::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { cfg, client, vesting_cache: Mutex::new(HashMap::new()) })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> BrokerResult<T> {
        let url = format!("{}{}", self.cfg.explorer_base_url, path);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Plugin(format!("GET {url}: {e}")))?
            .json()
            .await
            .map_err(|e| BrokerError::Plugin(format!("decode {url}: {e}")))
    }

    fn derive_address(&self, deal_id: DealId, side: Side) -> (String, u64) {
        let mut hasher = Sha256::new();
        hasher.update(self.cfg.hot_wallet_seed.as_bytes());
        hasher.update(deal_id.0.as_bytes());
        hasher.update([match side {
            Side::A => 0u8,
            Side::B => 1u8,
        }]);
        let digest = hasher.finalize();
        let index = u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"));
        // A bech32/base58 encoder is an outer collaborator concern per spec
        // §1 ("key derivation mechanics for any specific chain" is out of
        // scope); the hex digest stands in as the derived account handle
        // this plugin and the recovery manager use internally.
        (format!("bc1-derived-{}", hex::encode(&digest[..20])), index)
    }
}

#[async_trait]
impl ChainPlugin for UtxoChainPlugin {
    fn chain_id(&self) -> &str {
        &self.cfg.chain_id
    }

    async fn derive_escrow(&self, deal_id: DealId, side: Side) -> BrokerResult<EscrowAccountRef> {
        let (address, index) = self.derive_address(deal_id, side);
        Ok(EscrowAccountRef { address, derivation_index: index })
    }

    async fn list_confirmed_deposits(
        &self,
        _asset: &str,
        address: &str,
        min_confirmations: u64,
    ) -> BrokerResult<ConfirmedDeposits> {
        let utxos: Vec<EsploraUtxo> = self.get_json(&format!("/address/{address}/utxo")).await?;
        let tip_height: u64 = self.get_json("/blocks/tip/height").await?;

        let mut deposits = Vec::with_capacity(utxos.len());
        let mut total_confirmed = Decimal::ZERO;
        for utxo in utxos {
            let confirmations = match utxo.status.block_height {
                Some(h) if utxo.status.confirmed => tip_height.saturating_sub(h) + 1,
                _ => 0,
            };
            let amount = Decimal::new(utxo.value as i64, 8); // satoshis -> BTC
            if confirmations >= min_confirmations {
                total_confirmed += amount;
            }
            deposits.push(ObservedDeposit {
                // UTXO txids are real from the outset (no synthetic probe
                // needed for the UTXO model itself), but are marked
                // synthetic=false only once vesting classification has run;
                // the txid resolver does not apply here (spec §4.7 scopes
                // synthetic resolution to balance-queried account chains).
                tx_id: utxo.txid,
                amount,
                block_height: utxo.status.block_height.unwrap_or(tip_height),
                confirmations,
                synthetic: false,
            });
        }
        debug!(address, count = deposits.len(), "listed utxo deposits");
        Ok(ConfirmedDeposits { deposits, total_confirmed })
    }

    async fn resolve_transfer_events(
        &self,
        _asset: &str,
        _address: &str,
        _from_block: u64,
        _to_block: u64,
    ) -> BrokerResult<Vec<TransferEvent>> {
        // UTXO deposits carry a real txid from `list_confirmed_deposits`
        // already; there is no synthetic-id resolution path for this chain
        // family (spec §4.7's resolver targets balance-queried ERC-20-style
        // assets specifically).
        Ok(vec![])
    }

    async fn get_tx_confirmations(&self, tx_id: &str) -> BrokerResult<i64> {
        let tx: EsploraTx = match self.get_json(&format!("/tx/{tx_id}")).await {
            Ok(tx) => tx,
            Err(_) => return Ok(-1),
        };
        if !tx.status.confirmed {
            return Ok(0);
        }
        let tip_height: u64 = self.get_json("/blocks/tip/height").await?;
        let block_height = tx.status.block_height.unwrap_or(tip_height);
        Ok((tip_height.saturating_sub(block_height) + 1) as i64)
    }

    fn get_confirmation_threshold(&self) -> u64 {
        self.cfg.confirmation_threshold
    }

    async fn submit(&self, request: &SubmitRequest) -> BrokerResult<SubmitOutcome> {
        // Broadcasting a PSBT-signed transaction is delegated to the
        // external signer this plugin references by derivation index;
        // constructing and signing the raw transaction template here.
        let _ = request;
        Err(BrokerError::Plugin(
            "utxo chain submission requires an external PSBT signer, not configured".to_string(),
        ))
    }

    async fn approve_broker_for_erc20(
        &self,
        _escrow: &EscrowAccountRef,
        _token_addr: &str,
    ) -> BrokerResult<SubmitOutcome> {
        Err(BrokerError::Plugin("UTXO chains have no ERC-20 allowance concept".to_string()))
    }

    async fn quote_native_for_usd(&self) -> BrokerResult<PriceQuote> {
        #[derive(Deserialize)]
        struct Resp {
            bitcoin: std::collections::HashMap<String, f64>,
        }
        let resp: Resp = self
            .client
            .get("https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd")
            .send()
            .await
            .map_err(|e| BrokerError::NoPriceOracle(e.to_string()))?
            .json()
            .await
            .map_err(|e| BrokerError::NoPriceOracle(e.to_string()))?;
        let price = resp
            .bitcoin
            .get("usd")
            .copied()
            .ok_or_else(|| BrokerError::NoPriceOracle("no usd price for bitcoin".to_string()))?;
        Ok(PriceQuote {
            price: Decimal::try_from(price).unwrap_or_default(),
            source: "coingecko".to_string(),
        })
    }

    fn get_operator_address(&self) -> Option<String> {
        self.cfg.operator_address.clone()
    }

    async fn current_gas_price(&self) -> BrokerResult<u128> {
        #[derive(Deserialize)]
        struct FeeEstimates(std::collections::HashMap<String, f64>);
        let estimates: FeeEstimates = self.get_json("/fee-estimates").await?;
        let sat_per_vb = estimates.0.get("6").copied().unwrap_or(5.0);
        Ok(sat_per_vb as u128)
    }

    async fn native_balance(&self, address: &str) -> BrokerResult<Decimal> {
        let deposits = self.list_confirmed_deposits("", address, 0).await?;
        Ok(deposits.deposits.iter().map(|d| d.amount).sum())
    }

    fn as_vesting_source(self: std::sync::Arc<Self>) -> Option<std::sync::Arc<dyn VestingSource>> {
        Some(self)
    }
}

/// Capability a chain plugin exposes to the vesting tracer (spec §4.7): walk
/// a transaction back to its coinbase ancestor. Only UTXO chains with a
/// coinbase-vesting rule implement this; EVM chains have no such concept.
#[async_trait]
pub trait VestingSource: Send + Sync {
    /// Whether `txid` is itself a coinbase transaction.
    async fn is_coinbase(&self, txid: &str) -> BrokerResult<bool>;

    /// The immediate non-coinbase parent this transaction's first input
    /// spends from, or `None` if this transaction is a coinbase (no
    /// parent) or has no resolvable inputs.
    async fn parent_txid(&self, txid: &str) -> BrokerResult<Option<String>>;

    /// The block height `txid` was confirmed in, used once a coinbase
    /// ancestor is found to classify vested vs. unvested (spec §4.7).
    async fn confirmed_height(&self, txid: &str) -> BrokerResult<Option<u64>>;

    /// The configured vesting threshold height for this chain.
    fn vesting_threshold_height(&self) -> u64;
}

#[async_trait]
impl VestingSource for UtxoChainPlugin {
    async fn is_coinbase(&self, txid: &str) -> BrokerResult<bool> {
        if let Some(cached) = self.vesting_cache.lock().get(txid) {
            return Ok(*cached);
        }
        let tx: EsploraTx = self.get_json(&format!("/tx/{txid}")).await?;
        let is_coinbase = tx.vin.first().and_then(|v| v.is_coinbase).unwrap_or(false);
        self.vesting_cache.lock().insert(txid.to_string(), is_coinbase);
        Ok(is_coinbase)
    }

    async fn parent_txid(&self, txid: &str) -> BrokerResult<Option<String>> {
        let tx: EsploraTx = self.get_json(&format!("/tx/{txid}")).await?;
        if tx.vin.first().and_then(|v| v.is_coinbase).unwrap_or(false) {
            return Ok(None);
        }
        Ok(tx.vin.first().and_then(|v| v.txid.clone()))
    }

    async fn confirmed_height(&self, txid: &str) -> BrokerResult<Option<u64>> {
        let tx: EsploraTx = self.get_json(&format!("/tx/{txid}")).await?;
        Ok(tx.status.block_height)
    }

    fn vesting_threshold_height(&self) -> u64 {
        self.cfg.vesting_threshold_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_addresses_differ_by_side() {
        let cfg = UtxoChainConfig {
            chain_id: "BTC".to_string(),
            explorer_base_url: "https://blockstream.info/api".to_string(),
            confirmation_threshold: 3,
            hot_wallet_seed: "test-seed".to_string(),
            operator_address: None,
            vesting_threshold_height: 700_000,
        };
        let plugin = UtxoChainPlugin::new(cfg).unwrap();
        let deal = DealId::new();
        let (a, _) = plugin.derive_address(deal, Side::A);
        let (b, _) = plugin.derive_address(deal, Side::B);
        assert_ne!(a, b);
    }
}
