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

//! Daemon configuration, assembled from the environment variables in [`crate::env`].

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::env as var;

/// Per-chain configuration, one entry per supported [`crate::types::ChainId`].
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Human-readable chain identifier, e.g. `"ETH"`, `"POLYGON"`, `"BTC"`.
    pub chain_id: String,
    /// RPC endpoint(s), comma-separated in the source env var.
    pub rpc_urls: Vec<String>,
    /// Confirmations required before a deposit counts as confirmed.
    pub confirmations: u64,
    /// Confirmations required before a deposit is even collected/listed.
    pub collect_confirmations: u64,
    /// Operator address on this chain, if applicable.
    pub operator_address: Option<String>,
    /// Shared broker contract address on this chain (EVM-family only).
    pub broker_address: Option<String>,
    /// API key for the chain's block explorer, used for bulk deposit scans.
    pub explorer_api_key: Option<String>,
    /// Gas-price circuit-breaker ceiling, in gwei.
    pub gas_ceiling_gwei: f64,
    /// Minimum refundable balance before a gas refund is queued (§4.4 phase 4).
    pub min_refund_threshold: String,
    /// Floor native amount sent by a gas-funding transfer regardless of the
    /// estimated approval cost (§4.5 step 3 `perChainFloor`).
    pub gas_funding_floor: String,
    /// Block height at or before which a coinbase output is vested (§4.7).
    /// Only meaningful for UTXO-family chains; ignored otherwise.
    pub vesting_threshold_height: u64,
    /// Raw hex operator signing key for this chain's EIP-191 native-call
    /// signatures (spec §6). Distinct from [`Config::operator_key_ref`],
    /// which only ever names a KMS/HSM reference; this is the material a
    /// real deployment's KMS client would hand back for a single signing
    /// call and never persist, supplied directly here for chains without one.
    pub operator_signing_key_hex: Option<String>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Recovery Manager cycle interval.
    pub recovery_interval: Duration,
    /// Stuck-item threshold (§4.4 phase 1).
    pub stuck_threshold: Duration,
    /// Suspect-submitted-item threshold (§4.4 phase 2).
    pub failed_tx_threshold: Duration,
    /// Max recovery attempts before a queue item is FAILED.
    pub max_recovery_attempts: u32,
    /// Deal Engine tick interval.
    pub engine_tick_interval: Duration,
    /// Queue Dispatcher per-tick fan-out limit.
    pub dispatcher_fanout_limit: usize,
    /// Queue Dispatcher stall window before a gas bump.
    pub dispatcher_stall_window: Duration,
    /// Queue Dispatcher gas-bump multiplicative factor.
    pub dispatcher_gas_bump_factor: f64,
    /// Default deal deadline from creation when none is supplied explicitly.
    pub default_deal_deadline: Duration,
    /// Approval lock window before a gas refund is considered (§4.4 phase 4).
    pub approval_lock_window: Duration,
    /// Price oracle cache TTL.
    pub oracle_cache_ttl: Duration,
    /// Rate limit between re-checks of an already-approved escrow (§4.4 phase 3).
    pub approval_recheck_interval: Duration,
    /// Txid Resolver cycle interval (§4.7).
    pub txid_resolver_interval: Duration,
    /// Txid Resolver's symmetric block-height search span (§4.7).
    pub txid_resolver_search_span: u64,
    /// Txid Resolver's max attempts per synthetic deposit before giving up (§4.7).
    pub txid_resolver_max_attempts: u32,
    /// Hot-wallet seed used for deterministic escrow derivation. Never logged.
    pub hot_wallet_seed: String,
    /// Operator signing key reference (derivation path / KMS id).
    pub operator_key_ref: String,
    /// Gas-tank signing key reference.
    pub tank_key_ref: String,
    /// Per-chain settings, keyed by chain id.
    pub chains: HashMap<String, ChainConfig>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Assemble configuration from the process environment.
    ///
    /// Per-chain variables follow `{CHAIN_ENV_PREFIX}{ID}_{FIELD}`, e.g.
    /// `BROKER_CHAIN_ETH_RPC_URL`. `chain_ids` enumerates the chains to load;
    /// the outer collaborator (deployment tooling) is responsible for
    /// supplying the list, since the core does not guess chain identifiers.
    pub fn from_env(chain_ids: &[&str]) -> eyre::Result<Self> {
        let database_url = env::var(var::DATABASE_URL)
            .map_err(|_| eyre::eyre!("{} must be set", var::DATABASE_URL))?;

        let mut chains = HashMap::new();
        for id in chain_ids {
            let prefix = format!("{}{}", var::CHAIN_ENV_PREFIX, id.to_uppercase());
            let rpc_urls = env::var(format!("{prefix}_RPC_URL"))
                .map_err(|_| eyre::eyre!("{prefix}_RPC_URL must be set"))?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            chains.insert(
                id.to_string(),
                ChainConfig {
                    chain_id: id.to_string(),
                    rpc_urls,
                    confirmations: env_u64(&format!("{prefix}_CONFIRMATIONS"), 12),
                    collect_confirmations: env_u64(&format!("{prefix}_COLLECT_CONFIRMATIONS"), 1),
                    operator_address: env::var(format!("{prefix}_OPERATOR_ADDRESS")).ok(),
                    broker_address: env::var(format!("{prefix}_BROKER_ADDRESS")).ok(),
                    explorer_api_key: env::var(format!("{prefix}_EXPLORER_API_KEY")).ok(),
                    gas_ceiling_gwei: env_f64(&format!("{prefix}_GAS_CEILING_GWEI"), 500.0),
                    min_refund_threshold: env::var(format!("{prefix}_MIN_REFUND_THRESHOLD"))
                        .unwrap_or_else(|_| "0.001".to_string()),
                    gas_funding_floor: env::var(format!("{prefix}_GAS_FUNDING_FLOOR"))
                        .unwrap_or_else(|_| "0.005".to_string()),
                    vesting_threshold_height: env_u64(&format!("{prefix}_VESTING_THRESHOLD_HEIGHT"), 0),
                    operator_signing_key_hex: env::var(format!("{prefix}_OPERATOR_SIGNING_KEY_HEX")).ok(),
                },
            );
        }

        Ok(Self {
            database_url,
            recovery_interval: Duration::from_secs(env_u64(var::RECOVERY_INTERVAL_SECS, 60)),
            stuck_threshold: Duration::from_secs(env_u64(var::STUCK_THRESHOLD_SECS, 300)),
            failed_tx_threshold: Duration::from_secs(env_u64(var::FAILED_TX_THRESHOLD_SECS, 180)),
            max_recovery_attempts: env_u64(var::MAX_RECOVERY_ATTEMPTS, 5) as u32,
            engine_tick_interval: Duration::from_secs(env_u64(var::ENGINE_TICK_INTERVAL_SECS, 15)),
            dispatcher_fanout_limit: env_u64(var::DISPATCHER_FANOUT_LIMIT, 10) as usize,
            dispatcher_stall_window: Duration::from_secs(env_u64(
                var::DISPATCHER_STALL_WINDOW_SECS,
                120,
            )),
            dispatcher_gas_bump_factor: env_f64(var::DISPATCHER_GAS_BUMP_FACTOR, 1.2),
            default_deal_deadline: Duration::from_secs(env_u64(
                var::DEFAULT_DEAL_DEADLINE_SECS,
                24 * 3600,
            )),
            approval_lock_window: Duration::from_secs(env_u64(
                var::APPROVAL_LOCK_WINDOW_SECS,
                3600,
            )),
            oracle_cache_ttl: Duration::from_secs(env_u64(var::ORACLE_CACHE_TTL_SECS, 30)),
            approval_recheck_interval: Duration::from_secs(env_u64(
                var::APPROVAL_RECHECK_INTERVAL_SECS,
                900,
            )),
            txid_resolver_interval: Duration::from_secs(env_u64(
                var::TXID_RESOLVER_INTERVAL_SECS,
                60,
            )),
            txid_resolver_search_span: env_u64(var::TXID_RESOLVER_SEARCH_SPAN, 50),
            txid_resolver_max_attempts: env_u64(var::TXID_RESOLVER_MAX_ATTEMPTS, 10) as u32,
            hot_wallet_seed: env::var(var::HOT_WALLET_SEED)
                .map_err(|_| eyre::eyre!("{} must be set", var::HOT_WALLET_SEED))?,
            operator_key_ref: env::var(var::OPERATOR_KEY_REF)
                .map_err(|_| eyre::eyre!("{} must be set", var::OPERATOR_KEY_REF))?,
            tank_key_ref: env::var(var::TANK_KEY_REF)
                .map_err(|_| eyre::eyre!("{} must be set", var::TANK_KEY_REF))?,
            chains,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_reads_chain_settings() {
        env::set_var(var::DATABASE_URL, "postgres://localhost/otc_test");
        env::set_var(var::HOT_WALLET_SEED, "test-seed");
        env::set_var(var::OPERATOR_KEY_REF, "op-key-0");
        env::set_var(var::TANK_KEY_REF, "tank-key-0");
        env::set_var("BROKER_CHAIN_ETH_RPC_URL", "https://eth.example/rpc,https://eth2.example/rpc");
        env::set_var("BROKER_CHAIN_ETH_CONFIRMATIONS", "6");

        let cfg = Config::from_env(&["eth"]).unwrap();
        let eth = cfg.chains.get("eth").unwrap();
        assert_eq!(eth.rpc_urls.len(), 2);
        assert_eq!(eth.confirmations, 6);
        assert_eq!(cfg.database_url, "postgres://localhost/otc_test");
    }
}
