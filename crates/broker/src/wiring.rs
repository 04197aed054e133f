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

//! Assembles a [`ChainRegistry`] from [`Config`], choosing the EVM or UTXO
//! plugin implementation per chain by a naming convention (`BTC`/`LTC`/...
//! are UTXO-family; everything else is EVM-family). A real deployment would
//! likely make this explicit per-chain configuration; the convention keeps
//! the CLI's surface small for this crate's own test harness and examples.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use otc_chain_plugin::evm::{EvmChainConfig, EvmChainPlugin};
use otc_chain_plugin::registry::ChainRegistry;
use otc_chain_plugin::utxo::{UtxoChainConfig, UtxoChainPlugin};
use otc_common::config::{ChainConfig, Config};

const UTXO_CHAIN_IDS: &[&str] = &["BTC", "LTC", "DOGE"];

/// Build a [`ChainRegistry`] with one plugin per chain in `config.chains`.
pub async fn build_registry(config: &Config) -> Result<ChainRegistry> {
    let mut registry = ChainRegistry::new();
    for (id, chain_cfg) in &config.chains {
        let plugin: Arc<dyn otc_chain_plugin::trait_::ChainPlugin> =
            if UTXO_CHAIN_IDS.contains(&id.to_uppercase().as_str()) {
                Arc::new(build_utxo_plugin(chain_cfg, config)?)
            } else {
                Arc::new(build_evm_plugin(chain_cfg, config).await?)
            };
        registry.register(plugin);
    }
    Ok(registry)
}

async fn build_evm_plugin(chain_cfg: &ChainConfig, config: &Config) -> Result<EvmChainPlugin> {
    let explorer_chain_id = chain_cfg
        .chain_id
        .to_uppercase()
        .as_str()
        .eq("POLYGON")
        .then_some(137)
        .unwrap_or(1);
    let cfg = EvmChainConfig {
        chain_id: chain_cfg.chain_id.clone(),
        rpc_urls: chain_cfg.rpc_urls.clone(),
        confirmation_threshold: chain_cfg.confirmations,
        broker_address: chain_cfg
            .broker_address
            .clone()
            .ok_or_else(|| eyre::eyre!("{}: BROKER_ADDRESS must be set", chain_cfg.chain_id))?,
        operator_address: chain_cfg.operator_address.clone(),
        tank_address: None,
        hot_wallet_seed: config.hot_wallet_seed.clone(),
        operator_signing_key_hex: chain_cfg.operator_signing_key_hex.clone(),
        explorer_api_key: chain_cfg.explorer_api_key.clone(),
        explorer_chain_id,
        gas_ceiling_gwei: chain_cfg.gas_ceiling_gwei,
    };
    EvmChainPlugin::new(cfg).await.wrap_err_with(|| format!("building EVM plugin for {}", chain_cfg.chain_id))
}

fn build_utxo_plugin(chain_cfg: &ChainConfig, config: &Config) -> Result<UtxoChainPlugin> {
    let explorer_base_url = chain_cfg
        .rpc_urls
        .first()
        .cloned()
        .ok_or_else(|| eyre::eyre!("{}: RPC_URL must be set", chain_cfg.chain_id))?;
    let cfg = UtxoChainConfig {
        chain_id: chain_cfg.chain_id.clone(),
        explorer_base_url,
        confirmation_threshold: chain_cfg.confirmations,
        hot_wallet_seed: config.hot_wallet_seed.clone(),
        operator_address: chain_cfg.operator_address.clone(),
        vesting_threshold_height: chain_cfg.vesting_threshold_height,
    };
    UtxoChainPlugin::new(cfg).wrap_err_with(|| format!("building UTXO plugin for {}", chain_cfg.chain_id))
}
