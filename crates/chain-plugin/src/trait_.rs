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

//! The `ChainPlugin` trait itself (spec §4.1).

use async_trait::async_trait;
use otc_common::types::{DealId, Side};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

use crate::BrokerResult;

/// One confirmed or synthetic transfer into an escrow address.
#[derive(Debug, Clone)]
pub struct ObservedDeposit {
    /// A real transaction hash, or a synthetic id (spec §3, §4.7) such as
    /// `"erc20-balance-0x..."` for chains that expose only a balance.
    pub tx_id: String,
    /// Decimal amount observed.
    pub amount: Decimal,
    /// Block height the transfer was included in.
    pub block_height: u64,
    /// Confirmations observed at query time.
    pub confirmations: u64,
    /// Whether `tx_id` is synthetic rather than a real chain tx hash.
    pub synthetic: bool,
}

/// Result of [`ChainPlugin::list_confirmed_deposits`].
#[derive(Debug, Clone)]
pub struct ConfirmedDeposits {
    /// Every transfer observed, confirmed or not.
    pub deposits: Vec<ObservedDeposit>,
    /// Sum of amounts across deposits meeting `min_confirmations`.
    pub total_confirmed: Decimal,
}

/// One ERC-20/native Transfer-equivalent event, used by the txid resolver (spec §4.7).
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// The real transaction hash this event occurred in.
    pub tx_hash: String,
    /// Log index within the transaction (0 for native transfers).
    pub log_index: u64,
    /// Block number the event was included in.
    pub block_number: u64,
    /// Destination address.
    pub to: String,
    /// Decimal amount transferred.
    pub amount: Decimal,
}

/// Outcome of [`ChainPlugin::submit`].
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The broadcast transaction id.
    pub tx_id: String,
    /// The nonce (or chain-equivalent sequencing value) used.
    pub nonce: u64,
    /// The gas price used, in wei (or chain-equivalent unit).
    pub gas_price: u128,
}

/// A price quote from a plugin's oracle (spec §4.1 `quoteNativeForUSD`).
#[derive(Debug, Clone)]
pub struct PriceQuote {
    /// USD price of one unit of the chain's native asset.
    pub price: Decimal,
    /// Human-readable source identifier, for audit (e.g. `"coingecko"`).
    pub source: String,
}

/// A queued outbound transaction as the plugin needs to see it to submit.
/// Mirrors the relevant fields of `otc_common::types::QueueItem` without
/// requiring `otc-chain-plugin` to depend on the persistence-facing shape.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Owning deal, for derivation and logging.
    pub deal_id: DealId,
    /// Which side this transaction is for, if side-specific.
    pub side: Option<Side>,
    /// Sending address.
    pub from_addr: String,
    /// Receiving address.
    pub to_addr: String,
    /// Asset symbol/address (empty for an approval-only call).
    pub asset: String,
    /// Amount to move.
    pub amount: Decimal,
    /// Nonce to reuse on a gas-bumped re-submission, if this is a retry.
    pub original_nonce: Option<u64>,
    /// Gas price to use (bumped already, if this is a retry), in wei.
    pub gas_price_hint: Option<u128>,
    /// A discriminator the plugin uses to pick the right contract call
    /// (e.g. `"BROKER_SWAP"`, `"PHASE_1_SWAP"`, `"APPROVE_BROKER"`). Kept as
    /// a string so `otc-chain-plugin` does not need to depend on
    /// `otc_common::types::QueueItemPurpose` for every call site.
    pub purpose: String,
    /// The refund/payback address, for broker swap/revert calls (spec §6
    /// `IBroker`'s `payback` parameter). `None` for calls that carry no
    /// such concept (a plain transfer, an approval).
    pub payback: Option<String>,
    /// The settlement recipient, for broker swap calls. Usually equal to
    /// `to_addr`, but kept distinct since `to_addr` means "escrow" for some
    /// purposes (e.g. gas funding) and "recipient" for others.
    pub recipient: Option<String>,
    /// Protocol fee recipient, for broker calls that require it.
    pub fee_recipient: Option<String>,
    /// Protocol fee amount, for broker calls that require it.
    pub fees: Option<Decimal>,
}

/// The uniform capability set every supported chain exposes (spec §4.1).
///
/// Implementations may use block-explorer bulk APIs, filter-based log
/// scans, or balance probes internally; that choice is invisible here.
#[async_trait]
pub trait ChainPlugin: Send + Sync + fmt::Debug {
    /// This plugin's chain identifier, e.g. `"ETH"`.
    fn chain_id(&self) -> &str;

    /// Deterministically derive an escrow address for `(deal_id, side)` from
    /// the shared hot-wallet seed. The same pair always yields the same
    /// address.
    async fn derive_escrow(
        &self,
        deal_id: DealId,
        side: Side,
    ) -> BrokerResult<otc_common::types::EscrowAccountRef>;

    /// List deposits into `address` for `asset`, plus their summed confirmed
    /// balance at `min_confirmations`.
    async fn list_confirmed_deposits(
        &self,
        asset: &str,
        address: &str,
        min_confirmations: u64,
    ) -> BrokerResult<ConfirmedDeposits>;

    /// Resolve transfer events in `[from_block, to_block]`, used by the
    /// txid resolver to find the real hash behind a synthetic deposit id.
    async fn resolve_transfer_events(
        &self,
        asset: &str,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> BrokerResult<Vec<TransferEvent>>;

    /// Confirmations for `tx_id`. Zero or negative means not found, failed,
    /// or reorged away.
    async fn get_tx_confirmations(&self, tx_id: &str) -> BrokerResult<i64>;

    /// Gas actually used by `tx_id`, once confirmed. Feeds the Gas
    /// Reimbursement Calculator (spec §4.6), which reads it off the first
    /// confirmed settlement item for a deal. `None` when the chain has no
    /// gas-metering concept (UTXO chains) or the tx is not yet confirmed.
    async fn get_tx_gas_used(&self, tx_id: &str) -> BrokerResult<Option<u64>> {
        let _ = tx_id;
        Ok(None)
    }

    /// Confirmations required before a deposit on this chain counts as confirmed.
    fn get_confirmation_threshold(&self) -> u64;

    /// Sign and broadcast `request`. Must be idempotent given the same
    /// `original_nonce`/`gas_price_hint` (a re-submission with a bumped
    /// price replaces, rather than duplicates, the prior attempt).
    async fn submit(&self, request: &SubmitRequest) -> BrokerResult<SubmitOutcome>;

    /// Whether `escrow_addr` has already approved `token_addr` for the
    /// broker contract (EVM-family only).
    async fn check_broker_approval(
        &self,
        escrow_addr: &str,
        token_addr: &str,
    ) -> BrokerResult<bool> {
        let _ = (escrow_addr, token_addr);
        Ok(true)
    }

    /// Submit an ERC-20 `approve(broker, amount)` from `escrow`, returning the tx id.
    async fn approve_broker_for_erc20(
        &self,
        escrow: &otc_common::types::EscrowAccountRef,
        token_addr: &str,
    ) -> BrokerResult<SubmitOutcome>;

    /// USD price for one unit of the chain's native asset (spec §4.6).
    async fn quote_native_for_usd(&self) -> BrokerResult<PriceQuote>;

    /// The operator's address on this chain, if one is configured.
    fn get_operator_address(&self) -> Option<String>;

    /// The gas-tank wallet's address on this chain, if gas-funding (spec
    /// §4.5) is configured for it.
    fn get_tank_address(&self) -> Option<String> {
        None
    }

    /// Current gas price estimate, in wei (or chain-equivalent unit).
    async fn current_gas_price(&self) -> BrokerResult<u128>;

    /// Native balance of `address`, as a decimal amount.
    async fn native_balance(&self, address: &str) -> BrokerResult<Decimal>;

    /// Estimated native cost of a broker-approval transaction at the current
    /// gas price (spec §4.5 step 1). Zero on chains with no approval concept
    /// (native-only chains, UTXO chains).
    async fn estimate_approval_gas_cost(&self) -> BrokerResult<Decimal> {
        Ok(Decimal::ZERO)
    }

    /// Estimated native cost of a plain transfer at the current gas price
    /// (spec §4.4 phase 4 `estimatedRefundCost`). Zero on chains with no
    /// gas-metering concept.
    async fn estimate_native_transfer_gas_cost(&self) -> BrokerResult<Decimal> {
        Ok(Decimal::ZERO)
    }

    /// This plugin's vesting-tracer capability (spec §4.7), for chains with a
    /// coinbase-vesting rule. `None` for chains with no such concept (EVM
    /// chains, and any other balance- or log-queried asset).
    fn as_vesting_source(self: Arc<Self>) -> Option<Arc<dyn crate::utxo::VestingSource>> {
        None
    }
}
