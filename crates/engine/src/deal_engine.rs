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

//! The Deal Engine (spec §4.2): advances each non-terminal deal's state
//! machine on every tick, enqueueing exactly the on-chain actions a stage
//! transition requires in the same transaction as the stage write.

use std::time::Duration;

use chrono::Utc;
use otc_chain_plugin::registry::ChainRegistry;
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{
    Deal, DealId, PartySpec, QueueItem, QueueItemPurpose, QueueItemStatus, Side, Stage,
};
use otc_store::Store;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gas_reimbursement;

/// Drives every non-terminal deal's stage machine on a fixed interval.
#[derive(Debug)]
pub struct DealEngine {
    store: Store,
    registry: ChainRegistry,
    tick_interval: Duration,
    deal_deadline: Duration,
    vesting: crate::vesting_tracer::VestingTracer,
}

/// An asset looks like an ERC-20 contract if it is a `0x`-prefixed 40-hex-digit
/// address; anything else (a bare symbol like `"ETH"` or `"BTC"`) is native.
fn is_erc20(asset: &str) -> bool {
    asset.len() == 42 && asset.starts_with("0x") && asset[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

impl DealEngine {
    /// Build an engine over `store`/`registry`, ticking every `tick_interval`
    /// and defaulting fresh deals to `deal_deadline` from creation.
    pub fn new(store: Store, registry: ChainRegistry, tick_interval: Duration, deal_deadline: Duration) -> Self {
        let vesting = crate::vesting_tracer::VestingTracer::new(store.clone());
        Self { store, registry, tick_interval, deal_deadline, vesting }
    }

    /// Run the tick loop until the process is asked to shut down. Mirrors the
    /// other long-running loops in this workspace: a `tokio::select!` between
    /// an interval tick and a cancellation signal.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "deal engine tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("deal engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every non-terminal deal (spec §4.2 "Tick").
    pub async fn tick(&self) -> BrokerResult<()> {
        let deals = otc_store::deals::list_non_terminal(self.store.pool()).await?;
        for deal in deals {
            if deal.operator_review {
                continue;
            }
            if let Err(e) = self.advance(deal.id).await {
                warn!(deal_id = %deal.id, error = %e, "deal advance failed; retrying next tick");
            }
        }
        Ok(())
    }

    /// Re-fetch `deal_id` and attempt the single transition its current
    /// stage permits, if any precondition is already satisfied.
    async fn advance(&self, deal_id: DealId) -> BrokerResult<()> {
        let deal = otc_store::deals::get(self.store.pool(), deal_id)
            .await?
            .ok_or_else(|| BrokerError::Plugin(format!("deal {deal_id} vanished mid-tick")))?;

        match deal.stage {
            Stage::Draft => self.draft_to_collection(deal).await,
            Stage::Collection => self.collection_tick(deal).await,
            Stage::Ready => self.ready_to_swap(deal).await,
            Stage::Swap => self.swap_to_payout(deal).await,
            Stage::Payout => self.payout_to_closed(deal).await,
            Stage::Closed | Stage::Reverted => Ok(()),
        }
    }

    /// Next free `seq` for `(deal_id, chain)`: one past the current max,
    /// computed from persisted items rather than a separate counter table.
    async fn next_seq(&self, deal_id: DealId, chain: &otc_common::types::ChainId) -> BrokerResult<i64> {
        let items = otc_store::queue::list_for_deal(self.store.pool(), deal_id).await?;
        Ok(items.iter().filter(|i| &i.chain == chain).map(|i| i.seq).max().map(|m| m + 1).unwrap_or(0))
    }

    fn new_queue_item(
        &self,
        deal: &Deal,
        chain: otc_common::types::ChainId,
        from_addr: String,
        to_addr: String,
        asset: String,
        amount: Decimal,
        purpose: QueueItemPurpose,
        seq: i64,
        phase: &str,
    ) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            deal_id: deal.id,
            chain,
            from_addr,
            to_addr,
            asset,
            amount,
            purpose,
            seq,
            status: QueueItemStatus::Pending,
            submitted_tx: None,
            created_at: Utc::now(),
            phase: phase.to_string(),
            gas_bump_attempts: 0,
            last_gas_price: None,
            original_nonce: None,
            last_submit_at: None,
            recovery_attempts: 0,
            last_recovery_at: None,
            recovery_error: None,
            payback: None,
            recipient: None,
            fee_recipient: None,
            fees: None,
            gas_used: None,
        }
    }

    /// DRAFT -> COLLECTION (spec §4.2): derive both escrows, if absent.
    async fn draft_to_collection(&self, mut deal: Deal) -> BrokerResult<()> {
        for side in [Side::A, Side::B] {
            if deal.party(side).escrow.is_some() {
                continue;
            }
            let plugin = self.registry.get(&deal.party(side).chain.0)?;
            let escrow = plugin.derive_escrow(deal.id, side).await?;
            deal.party_mut(side).escrow = Some(escrow);
        }
        deal.stage = Stage::Collection;
        deal.record_event("escrows derived; collection started");
        deal.updated_at = Utc::now();
        otc_store::deals::update(self.store.pool(), &deal).await
    }

    /// Persist every deposit the plugin currently observes at `side`'s
    /// escrow (insert is idempotent on `(chain, tx_id)`, spec §3 "never
    /// deleted") and report whether the confirmed total covers the expected
    /// amount. Persisting here, rather than only once funded, is what feeds
    /// the surplus/refund accounting in `revert`/`swap_to_payout` and queues
    /// synthetic ids for the txid resolver.
    async fn record_deposits_and_check_funded(
        &self,
        tx: &mut otc_store::StoreTx<'_>,
        deal: &Deal,
        side: Side,
    ) -> BrokerResult<bool> {
        let party = deal.party(side);
        let escrow = party.escrow.as_ref().ok_or_else(|| {
            BrokerError::Plugin(format!("deal {} side {side} has no escrow in COLLECTION", deal.id))
        })?;
        let plugin = self.registry.get(&party.chain.0)?;
        let threshold = plugin.get_confirmation_threshold();
        let observed = plugin.list_confirmed_deposits(&party.asset, &escrow.address, threshold).await?;
        let vesting_source = plugin.clone().as_vesting_source();
        let mut usable_total = Decimal::ZERO;
        for deposit in &observed.deposits {
            let vested = match &vesting_source {
                Some(source) => {
                    matches!(self.vesting.classify(source, &deposit.tx_id).await?, otc_common::types::VestingStatus::Vested)
                }
                None => true,
            };
            if vested && deposit.confirmations >= threshold {
                usable_total += deposit.amount;
            }
            let record = otc_common::types::DepositRecord {
                id: Uuid::new_v4(),
                deal_id: deal.id,
                chain: party.chain.clone(),
                escrow_address: escrow.address.clone(),
                asset: party.asset.clone(),
                tx_id: deposit.tx_id.clone(),
                original_tx_id: deposit.synthetic.then(|| deposit.tx_id.clone()),
                amount: deposit.amount,
                block_height: deposit.block_height,
                confirmations_last_seen: deposit.confirmations,
                synthetic: deposit.synthetic,
                resolution_status: if deposit.synthetic {
                    otc_common::types::ResolutionStatus::Pending
                } else {
                    otc_common::types::ResolutionStatus::NotApplicable
                },
                created_at: Utc::now(),
            };
            otc_store::deposits::insert(&mut **tx, &record).await?;
        }
        Ok(usable_total >= party.expected_amount)
    }

    /// Whether `side`'s escrow already holds a broker allowance, trivially
    /// true for native assets that need no approval.
    async fn check_approved(&self, deal: &Deal, side: Side) -> BrokerResult<bool> {
        let party = deal.party(side);
        if !is_erc20(&party.asset) {
            return Ok(true);
        }
        let escrow = party.escrow.as_ref().ok_or_else(|| {
            BrokerError::Plugin(format!("deal {} side {side} has no escrow in COLLECTION", deal.id))
        })?;
        let plugin = self.registry.get(&party.chain.0)?;
        plugin.check_broker_approval(&escrow.address, &party.asset).await
    }

    /// Whether an APPROVE_BROKER item for `side` already exists (any status),
    /// so the tick doesn't enqueue a duplicate on every pass.
    async fn has_pending_approval(&self, deal: &Deal, side: Side) -> BrokerResult<bool> {
        let items = otc_store::queue::list_for_deal(self.store.pool(), deal.id).await?;
        let party = deal.party(side);
        Ok(items
            .iter()
            .any(|i| i.purpose == QueueItemPurpose::ApproveBroker && i.chain == party.chain))
    }

    /// COLLECTION (spec §4.2): fund-check both sides, enqueue missing
    /// approvals, and move to READY once both are funded and approved.
    async fn collection_tick(&self, mut deal: Deal) -> BrokerResult<()> {
        if Utc::now() >= deal.deadline {
            return self.revert(deal, "collection deadline elapsed").await;
        }

        let mut both_ready = true;
        let mut tx = self.store.begin().await?;
        for side in [Side::A, Side::B] {
            if !deal.party(side).funded {
                if self.record_deposits_and_check_funded(&mut tx, &deal, side).await? {
                    deal.party_mut(side).funded = true;
                    deal.record_event(format!("side {side} funded"));
                } else {
                    both_ready = false;
                    continue;
                }
            }

            if is_erc20(&deal.party(side).asset) && !self.check_approved(&deal, side).await? {
                both_ready = false;
                if !self.has_pending_approval(&deal, side).await? {
                    let party = deal.party(side);
                    let escrow = party.escrow.as_ref().expect("funded side has an escrow");
                    let seq = self.next_seq(deal.id, &party.chain).await?;
                    let item = self.new_queue_item(
                        &deal,
                        party.chain.clone(),
                        escrow.address.clone(),
                        escrow.address.clone(),
                        party.asset.clone(),
                        Decimal::ZERO,
                        QueueItemPurpose::ApproveBroker,
                        seq,
                        "approval",
                    );
                    otc_store::queue::insert(&mut *tx, &item).await?;
                    deal.record_event(format!("broker approval queued for side {side}"));
                }
            }
        }

        if both_ready {
            deal.stage = Stage::Ready;
            deal.record_event("both sides funded and approved; ready to swap");
        }
        deal.updated_at = Utc::now();
        otc_store::deals::update(&mut *tx, &deal).await?;
        tx.commit().await.map_err(BrokerError::Store)
    }

    /// COLLECTION/READY -> REVERTED (spec §4.2): revert any side that
    /// actually received funds; unfunded sides require no on-chain action.
    async fn revert(&self, mut deal: Deal, reason: &str) -> BrokerResult<()> {
        let mut tx = self.store.begin().await?;
        for side in [Side::A, Side::B] {
            let party = deal.party(side).clone();
            let received = otc_store::deposits::list_for_deal(&mut *tx, deal.id)
                .await?
                .into_iter()
                .filter(|d| d.chain == party.chain && d.asset == party.asset)
                .fold(Decimal::ZERO, |acc, d| acc + d.amount);
            if received == Decimal::ZERO {
                continue;
            }
            let escrow = match &party.escrow {
                Some(e) => e,
                None => continue,
            };
            let seq = self.next_seq(deal.id, &party.chain).await?;
            let mut item = self.new_queue_item(
                &deal,
                party.chain.clone(),
                escrow.address.clone(),
                party.refund_address.clone(),
                party.asset.clone(),
                received,
                QueueItemPurpose::BrokerRevert,
                seq,
                "revert",
            );
            item.payback = Some(party.refund_address.clone());
            item.recipient = Some(party.refund_address.clone());
            otc_store::queue::insert(&mut *tx, &item).await?;
        }

        // Any still-PENDING item that only made sense after a successful
        // settlement is dead weight once the deal is reverting (spec §4.3).
        for item in otc_store::queue::list_for_deal(&mut *tx, deal.id).await? {
            if item.status == QueueItemStatus::Pending && item.purpose.only_on_success() {
                otc_store::queue::delete_pending(&mut *tx, item.id).await?;
            }
        }

        deal.stage = Stage::Reverted;
        deal.record_event(format!("reverted: {reason}"));
        deal.updated_at = Utc::now();
        otc_store::deals::update(&mut *tx, &deal).await?;
        tx.commit().await.map_err(BrokerError::Store)
    }

    /// Whether a settlement item for `side` has already been enqueued.
    async fn has_settlement_item(&self, deal: &Deal, side: Side) -> BrokerResult<bool> {
        let items = otc_store::queue::list_for_deal(self.store.pool(), deal.id).await?;
        let party = deal.party(side);
        Ok(items.iter().any(|i| {
            i.chain == party.chain
                && matches!(i.purpose, QueueItemPurpose::BrokerSwap | QueueItemPurpose::Phase1Swap)
        }))
    }

    /// READY -> SWAP (spec §4.2): enqueue the atomic settlement call per side.
    /// Side A's item is always sequenced before side B's on a shared chain so
    /// the submission order is deterministic.
    async fn ready_to_swap(&self, mut deal: Deal) -> BrokerResult<()> {
        let mut tx = self.store.begin().await?;
        for side in [Side::A, Side::B] {
            if self.has_settlement_item(&deal, side).await? {
                continue;
            }
            let party: PartySpec = deal.party(side).clone();
            let escrow = party.escrow.as_ref().ok_or_else(|| {
                BrokerError::Plugin(format!("deal {} side {side} has no escrow in READY", deal.id))
            })?;
            let net_amount = party.expected_amount - party.fee_amount;
            let purpose =
                if is_erc20(&party.asset) { QueueItemPurpose::BrokerSwap } else { QueueItemPurpose::Phase1Swap };
            let seq = self.next_seq(deal.id, &party.chain).await?;
            let mut item = self.new_queue_item(
                &deal,
                party.chain.clone(),
                escrow.address.clone(),
                party.recipient_address.clone(),
                party.asset.clone(),
                net_amount,
                purpose,
                seq,
                "settlement",
            );
            item.recipient = Some(party.recipient_address.clone());
            item.fee_recipient = Some(party.fee_recipient.clone());
            item.fees = Some(party.fee_amount);
            otc_store::queue::insert(&mut *tx, &item).await?;
            deal.record_event(format!("settlement queued for side {side}"));
        }
        deal.stage = Stage::Swap;
        deal.updated_at = Utc::now();
        otc_store::deals::update(&mut *tx, &deal).await?;
        tx.commit().await.map_err(BrokerError::Store)
    }

    /// SWAP -> PAYOUT (spec §4.2): once both settlement items CONFIRMED,
    /// compute gas reimbursement (§4.6) and enqueue surplus refunds.
    async fn swap_to_payout(&self, mut deal: Deal) -> BrokerResult<()> {
        let items = otc_store::queue::list_for_deal(self.store.pool(), deal.id).await?;
        let settlements: Vec<&QueueItem> = items
            .iter()
            .filter(|i| matches!(i.purpose, QueueItemPurpose::BrokerSwap | QueueItemPurpose::Phase1Swap))
            .collect();
        if settlements.is_empty() || !settlements.iter().all(|i| i.status == QueueItemStatus::Confirmed) {
            return Ok(());
        }

        let mut tx = self.store.begin().await?;

        if deal.gas_reimbursement.active && deal.gas_reimbursement.result.is_none() {
            if let Some(first) = settlements.iter().min_by_key(|i| i.seq) {
                if let Some(gas_used) = first.gas_used {
                    let plugin = self.registry.get(&first.chain.0)?;
                    let gas_price = first.last_gas_price.unwrap_or(0);
                    if let Some(result) = gas_reimbursement::compute(&*plugin, &deal, gas_used, gas_price).await {
                        let paying_side = deal.gas_reimbursement.paying_side.unwrap_or(Side::A);
                        let party = deal.party(paying_side);
                        if let (Some(escrow), Some(tank_address)) = (&party.escrow, plugin.get_tank_address()) {
                            let seq = self.next_seq(deal.id, &party.chain).await?;
                            let item = self.new_queue_item(
                                &deal,
                                party.chain.clone(),
                                escrow.address.clone(),
                                tank_address,
                                result.token.clone(),
                                result.token_amount,
                                QueueItemPurpose::GasRefundToTank,
                                seq,
                                "gas_reimbursement",
                            );
                            otc_store::queue::insert(&mut *tx, &item).await?;
                        }
                        deal.record_event(format!(
                            "gas reimbursement queued: {} {}",
                            result.token_amount, result.token
                        ));
                        deal.gas_reimbursement.result = Some(result);
                    } else {
                        deal.record_event("gas reimbursement skipped: oracle unavailable");
                    }
                }
            }
        }

        for side in [Side::A, Side::B] {
            let party = deal.party(side).clone();
            let escrow = match &party.escrow {
                Some(e) => e,
                None => continue,
            };
            let received = otc_store::deposits::list_for_deal(&mut *tx, deal.id)
                .await?
                .into_iter()
                .filter(|d| d.chain == party.chain && d.asset == party.asset)
                .fold(Decimal::ZERO, |acc, d| acc + d.amount);
            let surplus = received - party.expected_amount;
            if surplus > Decimal::ZERO {
                let already = otc_store::queue::list_for_deal(&mut *tx, deal.id)
                    .await?
                    .into_iter()
                    .any(|i| i.purpose == QueueItemPurpose::SurplusRefund && i.chain == party.chain);
                if !already {
                    let seq = self.next_seq(deal.id, &party.chain).await?;
                    let mut item = self.new_queue_item(
                        &deal,
                        party.chain.clone(),
                        escrow.address.clone(),
                        party.refund_address.clone(),
                        party.asset.clone(),
                        surplus,
                        QueueItemPurpose::SurplusRefund,
                        seq,
                        "surplus_refund",
                    );
                    item.payback = Some(party.refund_address.clone());
                    otc_store::queue::insert(&mut *tx, &item).await?;
                    deal.record_event(format!("surplus {surplus} refunded for side {side}"));
                }
            }
        }

        deal.stage = Stage::Payout;
        deal.updated_at = Utc::now();
        otc_store::deals::update(&mut *tx, &deal).await?;
        tx.commit().await.map_err(BrokerError::Store)
    }

    /// PAYOUT -> CLOSED (spec §4.2): once every payout item CONFIRMED, close
    /// with a terminal settlement-summary event.
    async fn payout_to_closed(&self, mut deal: Deal) -> BrokerResult<()> {
        let items = otc_store::queue::list_for_deal(self.store.pool(), deal.id).await?;
        let payout_purposes =
            [QueueItemPurpose::SurplusRefund, QueueItemPurpose::GasRefundToTank];
        let payouts: Vec<&QueueItem> =
            items.iter().filter(|i| payout_purposes.contains(&i.purpose)).collect();
        if !payouts.iter().all(|i| i.status == QueueItemStatus::Confirmed) {
            return Ok(());
        }

        deal.stage = Stage::Closed;
        deal.record_event("deal closed: settlement and payouts confirmed");
        deal.updated_at = Utc::now();
        otc_store::deals::update(self.store.pool(), &deal).await
    }

    /// Create a fresh deal in DRAFT, defaulting the deadline if the caller
    /// did not supply one (spec §6 "create-deal" RPC surface).
    pub async fn create_deal(&self, party_a: PartySpec, party_b: PartySpec, deadline: Option<chrono::DateTime<Utc>>) -> BrokerResult<Deal> {
        let now = Utc::now();
        let deal = Deal {
            id: DealId::new(),
            party_a,
            party_b,
            stage: Stage::Draft,
            events: vec![],
            gas_reimbursement: Default::default(),
            deadline: deadline.unwrap_or_else(|| now + chrono::Duration::from_std(self.deal_deadline).unwrap_or(chrono::Duration::hours(24))),
            operator_review: false,
            created_at: now,
            updated_at: now,
        };
        otc_store::deals::insert(self.store.pool(), &deal).await?;
        Ok(deal)
    }

    /// Fetch a deal by id (spec §6 "get-deal").
    pub async fn get_deal(&self, id: DealId) -> BrokerResult<Option<Deal>> {
        otc_store::deals::get(self.store.pool(), id).await
    }

    /// List every deal, optionally filtered to one stage (spec §6 "list-deals").
    pub async fn list_deals(&self, stage: Option<Stage>) -> BrokerResult<Vec<Deal>> {
        otc_store::deals::list(self.store.pool(), stage).await
    }

    /// Cancel a deal externally (spec §6 "cancel-deal"). Only legal from
    /// DRAFT (immediate, no funds possible yet), COLLECTION or READY.
    pub async fn cancel_deal(&self, id: DealId) -> BrokerResult<()> {
        let deal = otc_store::deals::get(self.store.pool(), id)
            .await?
            .ok_or_else(|| BrokerError::Plugin(format!("deal {id} not found")))?;
        match deal.stage {
            Stage::Draft => {
                let mut deal = deal;
                deal.stage = Stage::Reverted;
                deal.record_event("cancelled before funding");
                deal.updated_at = Utc::now();
                otc_store::deals::update(self.store.pool(), &deal).await
            }
            Stage::Collection | Stage::Ready => self.revert(deal, "cancelled by operator").await,
            other => Err(BrokerError::Plugin(format!("cannot cancel deal in stage {other}"))),
        }
    }

    /// Admin spend from one side's escrow to an arbitrary destination (spec
    /// §6 "admin spend-from-escrow"). Rejected during SWAP, where a broker
    /// settlement call may already be in flight against that escrow's
    /// balance and a side-channel withdrawal would invalidate it. Submitted
    /// directly through the plugin rather than the queue: this is an
    /// operator-initiated, one-off action outside the deal's own lifecycle,
    /// not one of the purposes in `QueueItemPurpose`.
    pub async fn admin_spend_from_escrow(
        &self,
        id: DealId,
        side: Side,
        to_addr: &str,
        amount: Decimal,
    ) -> BrokerResult<String> {
        let mut deal = otc_store::deals::get(self.store.pool(), id)
            .await?
            .ok_or_else(|| BrokerError::Plugin(format!("deal {id} not found")))?;
        if deal.stage == Stage::Swap {
            return Err(BrokerError::InvariantViolation(format!(
                "deal {id} is in SWAP; admin spend-from-escrow is rejected while settlement may be in flight"
            )));
        }
        let party = deal.party(side).clone();
        let escrow = party
            .escrow
            .as_ref()
            .ok_or_else(|| BrokerError::Plugin(format!("deal {id} side {side} has no escrow")))?;
        let plugin = self.registry.get(&party.chain.0)?;
        let outcome = plugin
            .submit(&otc_chain_plugin::trait_::SubmitRequest {
                deal_id: id,
                side: Some(side),
                from_addr: escrow.address.clone(),
                to_addr: to_addr.to_string(),
                asset: party.asset.clone(),
                amount,
                original_nonce: None,
                gas_price_hint: None,
                purpose: "ADMIN_SPEND".to_string(),
                payback: None,
                recipient: None,
                fee_recipient: None,
                fees: None,
            })
            .await?;
        deal.record_event(format!(
            "admin spend from side {side} escrow: {amount} {} to {to_addr} (tx {})",
            party.asset, outcome.tx_id
        ));
        deal.updated_at = Utc::now();
        otc_store::deals::update(self.store.pool(), &deal).await?;
        Ok(outcome.tx_id)
    }
}
