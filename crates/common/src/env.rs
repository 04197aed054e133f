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

//! Environment variable name constants for the broker daemon.
//!
//! These are the enumerated configuration options from the specification's
//! external-interfaces section: recovery cadence, thresholds, per-chain RPC
//! settings, the hot-wallet seed, gas-price circuit breakers and the oracle
//! cache TTL. Centralising the names here keeps `Config::from_env` and the
//! CLI's `--help` output in sync.

/// Postgres connection string for the persistence store.
pub const DATABASE_URL: &str = "BROKER_DATABASE_URL";

/// Seconds between Recovery Manager cycles.
pub const RECOVERY_INTERVAL_SECS: &str = "BROKER_RECOVERY_INTERVAL_SECS";

/// Seconds a PENDING queue item may sit with no `submittedTx` before it is
/// considered stuck (§4.4 phase 1).
pub const STUCK_THRESHOLD_SECS: &str = "BROKER_STUCK_THRESHOLD_SECS";

/// Seconds a SUBMITTED queue item may sit unconfirmed before it is treated
/// as suspect (§4.4 phase 2).
pub const FAILED_TX_THRESHOLD_SECS: &str = "BROKER_FAILED_TX_THRESHOLD_SECS";

/// Maximum recovery attempts before a queue item is marked FAILED.
pub const MAX_RECOVERY_ATTEMPTS: &str = "BROKER_MAX_RECOVERY_ATTEMPTS";

/// Seconds between Deal Engine ticks.
pub const ENGINE_TICK_INTERVAL_SECS: &str = "BROKER_ENGINE_TICK_INTERVAL_SECS";

/// Per-tick fan-out limit for the Queue Dispatcher (§4.3).
pub const DISPATCHER_FANOUT_LIMIT: &str = "BROKER_DISPATCHER_FANOUT_LIMIT";

/// Seconds a SUBMITTED-but-unconfirmed item waits before a gas bump.
pub const DISPATCHER_STALL_WINDOW_SECS: &str = "BROKER_DISPATCHER_STALL_WINDOW_SECS";

/// Multiplicative gas-bump factor applied on stall (e.g. `1.2`).
pub const DISPATCHER_GAS_BUMP_FACTOR: &str = "BROKER_DISPATCHER_GAS_BUMP_FACTOR";

/// Default deal deadline, in seconds from creation, when not set explicitly.
pub const DEFAULT_DEAL_DEADLINE_SECS: &str = "BROKER_DEFAULT_DEAL_DEADLINE_SECS";

/// Seconds an approval must remain CONFIRMED with no pending broker ops
/// before its escrow is eligible for a gas refund (§4.4 phase 4).
pub const APPROVAL_LOCK_WINDOW_SECS: &str = "BROKER_APPROVAL_LOCK_WINDOW_SECS";

/// Cache TTL, in seconds, for the native/USD price oracle (§4.6).
pub const ORACLE_CACHE_TTL_SECS: &str = "BROKER_ORACLE_CACHE_TTL_SECS";

/// Seconds between re-checks of an already-approved escrow's allowance,
/// rate-limiting the Recovery Manager's missing-allowance phase (§4.4 phase 3).
pub const APPROVAL_RECHECK_INTERVAL_SECS: &str = "BROKER_APPROVAL_RECHECK_INTERVAL_SECS";

/// Hot-wallet seed used for deterministic escrow derivation. Never logged.
pub const HOT_WALLET_SEED: &str = "BROKER_HOT_WALLET_SEED";

/// Operator private-key reference (a derivation path or KMS key id, never a raw key).
pub const OPERATOR_KEY_REF: &str = "BROKER_OPERATOR_KEY_REF";

/// Gas-tank private-key reference.
pub const TANK_KEY_REF: &str = "BROKER_TANK_KEY_REF";

/// Seconds between Txid Resolver cycles (§4.7).
pub const TXID_RESOLVER_INTERVAL_SECS: &str = "BROKER_TXID_RESOLVER_INTERVAL_SECS";

/// Block-height window, searched symmetrically around a synthetic deposit's
/// observed height, for the real transaction behind it (§4.7).
pub const TXID_RESOLVER_SEARCH_SPAN: &str = "BROKER_TXID_RESOLVER_SEARCH_SPAN";

/// Maximum resolution attempts before a synthetic deposit is given up on.
pub const TXID_RESOLVER_MAX_ATTEMPTS: &str = "BROKER_TXID_RESOLVER_MAX_ATTEMPTS";

/// Prefix for per-chain environment variables, e.g. `BROKER_CHAIN_ETH_RPC_URL`.
///
/// A chain's full variable set is `{PREFIX}{ID}_RPC_URL`, `{PREFIX}{ID}_CONFIRMATIONS`,
/// `{PREFIX}{ID}_COLLECT_CONFIRMATIONS`, `{PREFIX}{ID}_OPERATOR_ADDRESS`,
/// `{PREFIX}{ID}_BROKER_ADDRESS`, `{PREFIX}{ID}_EXPLORER_API_KEY`,
/// `{PREFIX}{ID}_GAS_CEILING_GWEI`, `{PREFIX}{ID}_MIN_REFUND_THRESHOLD`,
/// `{PREFIX}{ID}_GAS_FUNDING_FLOOR`, `{PREFIX}{ID}_VESTING_THRESHOLD_HEIGHT`,
/// `{PREFIX}{ID}_OPERATOR_SIGNING_KEY_HEX`.
pub const CHAIN_ENV_PREFIX: &str = "BROKER_CHAIN_";
