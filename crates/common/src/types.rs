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

//! The data model from the specification's §3, as plain Rust types shared by
//! every crate in the workspace. None of these types know how to persist or
//! transmit themselves; [`otc_store`] and [`otc_chain_plugin`] own that.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque deal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub Uuid);

impl DealId {
    /// Generate a fresh deal id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DealId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chain identifier, e.g. `"ETH"`, `"POLYGON"`, `"BTC"`. Kept as a string
/// rather than a closed enum so the [`crate::config::Config`] can register
/// additional chains without a code change, per the plugin-based design in
/// spec §4.1 / §9 ("add a chain by implementing the capability set").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    /// Construct from any string-like value, upper-cased for consistency.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_uppercase())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which counterparty a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Counterparty A.
    A,
    /// Counterparty B.
    B,
}

impl Side {
    /// The other side.
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self { Self::A => "A", Self::B => "B" })
    }
}

/// Deal lifecycle stage (spec §3). Transitions form the directed graph
/// `DRAFT -> COLLECTION -> READY -> SWAP -> PAYOUT -> CLOSED`, with
/// `COLLECTION -> REVERTED` and `READY -> REVERTED` as the only other edges.
/// `CLOSED` and `REVERTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Deal created, escrows not yet derived.
    Draft,
    /// Escrows derived, waiting on confirmed deposits from both sides.
    Collection,
    /// Both sides funded and (if ERC-20) approved; waiting to be swapped.
    Ready,
    /// Settlement queue items submitted, waiting on confirmation.
    Swap,
    /// Settlement confirmed; gas reimbursement / surplus refund in flight.
    Payout,
    /// Terminal: deal settled successfully.
    Closed,
    /// Terminal: deal cancelled or timed out, any received funds refunded.
    Reverted,
}

impl Stage {
    /// Whether this stage is terminal (no further transitions permitted).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Reverted)
    }

    /// Whether `to` is a legal transition from `self` per spec §3's directed graph.
    pub fn can_transition_to(self, to: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, to),
            (Draft, Collection)
                | (Collection, Ready)
                | (Ready, Swap)
                | (Swap, Payout)
                | (Payout, Closed)
                | (Collection, Reverted)
                | (Ready, Reverted)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Collection => "COLLECTION",
            Self::Ready => "READY",
            Self::Swap => "SWAP",
            Self::Payout => "PAYOUT",
            Self::Closed => "CLOSED",
            Self::Reverted => "REVERTED",
        };
        write!(f, "{s}")
    }
}

/// One party's specification within a deal (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySpec {
    /// Which side this is.
    pub side: Side,
    /// Chain this party is paying/receiving on.
    pub chain: ChainId,
    /// Asset symbol or contract address, as the plugin expects it.
    pub asset: String,
    /// Address to refund surplus or cancelled funds to (the "payback" address).
    pub refund_address: String,
    /// Address that receives the settled amount.
    pub recipient_address: String,
    /// Amount this party is expected to deposit, as a decimal string amount.
    pub expected_amount: Decimal,
    /// Fee amount deducted from this side's settlement, as a decimal amount.
    pub fee_amount: Decimal,
    /// Address the protocol fee is paid to.
    pub fee_recipient: String,
    /// Escrow account reference, set once the Deal Engine derives it.
    pub escrow: Option<EscrowAccountRef>,
    /// Whether this side's confirmed deposits cover `expected_amount`.
    pub funded: bool,
}

/// A chain-scoped escrow account plus a reference to how the operator can
/// sign for it (a derivation index, never a raw private key in core memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowAccountRef {
    /// The escrow's on-chain address.
    pub address: String,
    /// Derivation index used to derive this address from the hot-wallet seed.
    pub derivation_index: u64,
}

/// Whether, and how, a settled deal's tank gas spend is reimbursed (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasReimbursementConfig {
    /// Whether reimbursement is active for this deal.
    pub active: bool,
    /// Which side pays the reimbursement.
    pub paying_side: Option<Side>,
    /// The computed result, once settlement has happened.
    pub result: Option<GasReimbursementResult>,
}

impl Default for GasReimbursementConfig {
    fn default() -> Self {
        Self { active: false, paying_side: None, result: None }
    }
}

/// The computed outcome of the gas reimbursement calculation (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasReimbursementResult {
    /// Token amount transferred to the tank.
    pub token_amount: Decimal,
    /// Token symbol/address the reimbursement was paid in.
    pub token: String,
    /// Native/USD rate used, for audit.
    pub native_usd_rate: Decimal,
    /// Token/USD rate used, for audit.
    pub token_usd_rate: Decimal,
    /// Gas used by the first settlement transaction.
    pub actual_gas_used: u64,
    /// Gas price used in the computation, in wei.
    pub gas_price_wei: u128,
}

/// A single human-readable deal event (spec §3 "append-only event log").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealEvent {
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// Human-readable description.
    pub message: String,
}

/// The full deal record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    /// Opaque unique id.
    pub id: DealId,
    /// Counterparty A's specification.
    pub party_a: PartySpec,
    /// Counterparty B's specification.
    pub party_b: PartySpec,
    /// Current lifecycle stage.
    pub stage: Stage,
    /// Append-only event log.
    pub events: Vec<DealEvent>,
    /// Gas reimbursement configuration, if any.
    pub gas_reimbursement: GasReimbursementConfig,
    /// Deadline after which an underfunded deal in COLLECTION reverts (§4.2.1).
    pub deadline: DateTime<Utc>,
    /// Set when a fatal invariant violation requires operator review; no
    /// further stage transitions happen on this deal while set (spec §7).
    pub operator_review: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Borrow the [`PartySpec`] for the given side.
    pub fn party(&self, side: Side) -> &PartySpec {
        match side {
            Side::A => &self.party_a,
            Side::B => &self.party_b,
        }
    }

    /// Mutably borrow the [`PartySpec`] for the given side.
    pub fn party_mut(&mut self, side: Side) -> &mut PartySpec {
        match side {
            Side::A => &mut self.party_a,
            Side::B => &mut self.party_b,
        }
    }

    /// Append a human-readable event to the log.
    pub fn record_event(&mut self, message: impl Into<String>) {
        self.events.push(DealEvent { at: Utc::now(), message: message.into() });
    }
}

/// A transfer observed into an escrow address (spec §3 DepositRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    /// Row id.
    pub id: Uuid,
    /// Owning deal.
    pub deal_id: DealId,
    /// Chain the deposit occurred on.
    pub chain: ChainId,
    /// Escrow address the transfer was made to.
    pub escrow_address: String,
    /// Asset symbol/address.
    pub asset: String,
    /// On-chain transaction id, or a synthetic id until resolved.
    pub tx_id: String,
    /// The original synthetic id, preserved across resolution (spec §8 round-trip law).
    pub original_tx_id: Option<String>,
    /// Decimal-string amount observed.
    pub amount: Decimal,
    /// Block height the transfer was included in.
    pub block_height: u64,
    /// Confirmations last observed.
    pub confirmations_last_seen: u64,
    /// Whether this deposit used a synthetic (balance-probe) identifier.
    pub synthetic: bool,
    /// Resolution status of a synthetic deposit.
    pub resolution_status: ResolutionStatus,
    /// First-observed timestamp.
    pub created_at: DateTime<Utc>,
}

/// Synthetic-deposit resolution status (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Not a synthetic deposit; no resolution needed.
    NotApplicable,
    /// Synthetic, resolution not yet attempted or still in progress.
    Pending,
    /// Resolved to a real transaction hash.
    Resolved,
    /// Exhausted the bounded attempt budget without a match.
    Failed,
}

/// Purpose of a queued outbound transaction (spec §3 QueueItem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemPurpose {
    /// ERC-20 `approve` granting the broker an allowance from an escrow.
    ApproveBroker,
    /// ERC-20 settlement call (`swapERC20`).
    BrokerSwap,
    /// ERC-20 cancellation call (`revertERC20`).
    BrokerRevert,
    /// ERC-20 refund of a cancelled/expired deal.
    BrokerRefund,
    /// Native settlement call (`swapNative`), carrying `msg.value`.
    Phase1Swap,
    /// Refund of deposits beyond the expected amount.
    SurplusRefund,
    /// Tank -> escrow transfer funding gas for an approval.
    GasFunding,
    /// Escrow -> tank transfer refunding unused gas.
    GasRefundToTank,
}

impl QueueItemPurpose {
    /// Whether this purpose only makes sense following a successful
    /// settlement; such PENDING items are dropped when a deal reverts (§4.3).
    pub fn only_on_success(self) -> bool {
        matches!(self, Self::SurplusRefund | Self::GasRefundToTank)
    }
}

/// Lifecycle status of a [`QueueItemPurpose`] (spec §3 QueueItem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    /// Not yet submitted.
    Pending,
    /// Submitted, awaiting confirmation.
    Submitted,
    /// Confirmed on-chain; terminal on success.
    Confirmed,
    /// Exhausted recovery attempts; terminal on failure.
    Failed,
}

/// A single outbound chain transaction the broker must submit (spec §3 QueueItem).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Row id.
    pub id: Uuid,
    /// Owning deal.
    pub deal_id: DealId,
    /// Chain to submit on.
    pub chain: ChainId,
    /// Sending address (escrow, tank, or operator, depending on purpose).
    pub from_addr: String,
    /// Receiving address.
    pub to_addr: String,
    /// Asset symbol/address being moved (empty for a pure approval call).
    pub asset: String,
    /// Amount to transfer, as a decimal amount.
    pub amount: Decimal,
    /// What this transaction accomplishes.
    pub purpose: QueueItemPurpose,
    /// Per-(deal, chain) submission order. Lower `seq` must CONFIRM first.
    pub seq: i64,
    /// Current lifecycle status.
    pub status: QueueItemStatus,
    /// The on-chain tx id once submitted.
    pub submitted_tx: Option<String>,
    /// Creation timestamp, used as the tie-break across (deal, chain) groups.
    pub created_at: DateTime<Utc>,
    /// Free-form phase label (e.g. which settlement leg this is).
    pub phase: String,
    /// How many times gas has been bumped on this item.
    pub gas_bump_attempts: u32,
    /// Gas price used for the most recent submission, in wei.
    pub last_gas_price: Option<u128>,
    /// Nonce captured at first submission; re-submissions reuse it.
    pub original_nonce: Option<u64>,
    /// When the item was last (re-)submitted.
    pub last_submit_at: Option<DateTime<Utc>>,
    /// How many recovery attempts have been made on this item.
    pub recovery_attempts: u32,
    /// When the Recovery Manager last touched this item.
    pub last_recovery_at: Option<DateTime<Utc>>,
    /// The error recorded by the most recent recovery attempt, if any.
    pub recovery_error: Option<String>,
    /// For broker operations: the refund/payback address.
    pub payback: Option<String>,
    /// For broker operations: the settlement recipient.
    pub recipient: Option<String>,
    /// For broker operations: the protocol fee recipient.
    pub fee_recipient: Option<String>,
    /// For broker operations: the protocol fee amount.
    pub fees: Option<Decimal>,
    /// Gas actually used by the confirmed transaction, once known. Feeds the
    /// Gas Reimbursement Calculator (spec §4.6), which reads it off the
    /// first confirmed settlement item for a deal.
    pub gas_used: Option<u64>,
}

/// A process-wide coordination lease (spec §3 Lease).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Lease type/name, e.g. `"RECOVERY_GLOBAL"`.
    pub lease_type: String,
    /// Opaque identifier of the holder (process id / hostname / uuid).
    pub holder_id: String,
    /// When the lease expires and may be re-acquired by anyone.
    pub expires_at: DateTime<Utc>,
}

/// One audited Recovery Manager action (spec §3 RecoveryLog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryLogEntry {
    /// Row id.
    pub id: Uuid,
    /// Recovery phase/type, e.g. `"stuck_item"`, `"gas_refund"`.
    pub entry_type: String,
    /// Chain the action concerns, if any.
    pub chain: Option<ChainId>,
    /// What was attempted.
    pub action: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Error message, if any.
    pub error: Option<String>,
    /// Arbitrary structured metadata (queue item id, escrow address, ...).
    pub metadata: serde_json::Value,
    /// When the action was attempted.
    pub created_at: DateTime<Utc>,
}

/// Status of a queued gas refund to the tank (spec §3 GasRefund).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GasRefundStatus {
    /// Inserted, linked queue item not yet submitted.
    Queued,
    /// Linked queue item submitted.
    Submitted,
    /// Linked queue item confirmed.
    Confirmed,
    /// Below `minRefundThreshold`; no queue item was created.
    Skipped,
}

/// A record of gas spent funding an escrow, to be refunded to the tank (spec §3 GasRefund).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasRefund {
    /// Row id.
    pub id: Uuid,
    /// Owning deal.
    pub deal_id: DealId,
    /// Chain the escrow lives on.
    pub chain: ChainId,
    /// Escrow address that was funded.
    pub escrow_address: String,
    /// The approval transaction hash this refund is linked to.
    pub approval_tx_hash: String,
    /// Amount to refund, as a decimal amount.
    pub refund_amount: Decimal,
    /// Current status.
    pub status: GasRefundStatus,
    /// The [`QueueItem`] id created atomically with this row, if not SKIPPED.
    pub linked_queue_item_id: Option<Uuid>,
    /// Arbitrary structured metadata.
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Coinbase-vesting classification for a UTXO-chain transaction (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VestingStatus {
    /// Coinbase ancestor found at or before the vesting threshold height.
    Vested,
    /// Coinbase ancestor found after the vesting threshold height.
    Unvested,
    /// Trace in progress / not yet resolved.
    Pending,
    /// No information yet.
    Unknown,
    /// Trace hit a structural limit (max depth, no parent inputs); persisted
    /// so the trace is not retried every cycle.
    TracingFailed,
}

/// A cached/persisted vesting classification (spec §3 VestingCacheEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VestingCacheEntry {
    /// The UTXO transaction id.
    pub txid: String,
    /// Whether this transaction is itself a coinbase transaction.
    pub is_coinbase: bool,
    /// The coinbase ancestor's block height, once traced.
    pub coinbase_block_height: Option<u64>,
    /// The immediate parent transaction id walked during tracing.
    pub parent_txid: Option<String>,
    /// Current classification.
    pub vesting_status: VestingStatus,
    /// When this entry was last (re-)traced.
    pub traced_at: DateTime<Utc>,
    /// Error message from the most recent trace attempt, if any.
    pub error_message: Option<String>,
}

/// Audit row for one synthetic-deposit resolution attempt (spec §3 TxidResolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxidResolution {
    /// Row id.
    pub id: Uuid,
    /// The deposit this resolution attempt concerns.
    pub deposit_id: Uuid,
    /// Lower bound of the block window searched.
    pub window_from_block: u64,
    /// Upper bound of the block window searched.
    pub window_to_block: u64,
    /// Number of candidate transfer events considered.
    pub candidates_considered: u32,
    /// Confidence of the chosen match, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// The transaction hash chosen, if any.
    pub chosen_tx_hash: Option<String>,
    /// When the attempt was made.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_graph_matches_spec() {
        assert!(Stage::Draft.can_transition_to(Stage::Collection));
        assert!(Stage::Collection.can_transition_to(Stage::Ready));
        assert!(Stage::Collection.can_transition_to(Stage::Reverted));
        assert!(Stage::Ready.can_transition_to(Stage::Swap));
        assert!(Stage::Ready.can_transition_to(Stage::Reverted));
        assert!(Stage::Swap.can_transition_to(Stage::Payout));
        assert!(Stage::Payout.can_transition_to(Stage::Closed));

        assert!(!Stage::Draft.can_transition_to(Stage::Ready));
        assert!(!Stage::Swap.can_transition_to(Stage::Reverted));
        assert!(!Stage::Closed.can_transition_to(Stage::Draft));
        assert!(Stage::Closed.is_terminal());
        assert!(Stage::Reverted.is_terminal());
        assert!(!Stage::Swap.is_terminal());
    }

    #[test]
    fn side_other_is_involutive() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other().other(), Side::B);
    }

    #[test]
    fn queue_item_purpose_success_only() {
        assert!(QueueItemPurpose::SurplusRefund.only_on_success());
        assert!(QueueItemPurpose::GasRefundToTank.only_on_success());
        assert!(!QueueItemPurpose::BrokerSwap.only_on_success());
        assert!(!QueueItemPurpose::ApproveBroker.only_on_success());
    }
}
