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

//! [`QueueDispatcher`]: the per-tick selection, submission and confirmation
//! poll described in spec §4.3.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use otc_chain_plugin::registry::ChainRegistry;
use otc_chain_plugin::trait_::SubmitRequest;
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{ChainId, DealId, QueueItem, QueueItemStatus};
use otc_store::Store;
use tracing::{error, info, warn};

/// Drains PENDING queue items through their chain plugin, honouring
/// per-(deal, chain) `seq` order, and polls SUBMITTED items to confirmation.
#[derive(Debug)]
pub struct QueueDispatcher {
    store: Store,
    registry: ChainRegistry,
    tick_interval: Duration,
    fanout_limit: usize,
    stall_window: Duration,
    gas_bump_factor: f64,
    metrics: otc_common::metrics::Metrics,
}

impl QueueDispatcher {
    /// Build a dispatcher over `store`/`registry`.
    pub fn new(
        store: Store,
        registry: ChainRegistry,
        tick_interval: Duration,
        fanout_limit: usize,
        stall_window: Duration,
        gas_bump_factor: f64,
    ) -> Self {
        Self {
            store,
            registry,
            tick_interval,
            fanout_limit,
            stall_window,
            gas_bump_factor,
            metrics: otc_common::metrics::Metrics::new(),
        }
    }

    /// This dispatcher's queue-depth and plugin-call-latency counters, for
    /// the outer collaborator to scrape.
    pub fn metrics(&self) -> &otc_common::metrics::Metrics {
        &self.metrics
    }

    /// Run the dispatch loop until asked to shut down.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "dispatcher tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One dispatch pass: select and submit eligible PENDING items, then
    /// poll every SUBMITTED item for confirmation or stall.
    pub async fn tick(&self) -> BrokerResult<()> {
        let pending = otc_store::queue::list_pending(self.store.pool()).await?;
        self.metrics.set_queue_depth(pending.len() as i64);

        for item in self.select_eligible().await? {
            if let Err(e) = self.submit_item(item).await {
                if e.is_transient() {
                    info!(error = %e, "queue item submission hit a transient error; will retry next tick");
                } else {
                    warn!(error = %e, "queue item submission failed; will retry next tick");
                }
            }
        }

        for item in otc_store::queue::list_submitted(self.store.pool()).await? {
            if let Err(e) = self.poll_item(item).await {
                if e.is_transient() {
                    info!(error = %e, "queue item confirmation poll hit a transient error");
                } else {
                    warn!(error = %e, "queue item confirmation poll failed");
                }
            }
        }
        Ok(())
    }

    /// The lowest-`seq` PENDING item in each (deal, chain) group whose
    /// lower-`seq` predecessors are all CONFIRMED, sorted by `created_at`
    /// ascending and capped to `fanout_limit` (spec §4.3 "Selection order").
    async fn select_eligible(&self) -> BrokerResult<Vec<QueueItem>> {
        let pending = otc_store::queue::list_pending(self.store.pool()).await?;
        if pending.is_empty() {
            return Ok(vec![]);
        }

        let mut by_deal: HashMap<DealId, Vec<QueueItem>> = HashMap::new();
        for item in pending {
            by_deal.entry(item.deal_id).or_default().push(item);
        }

        let mut candidates = Vec::new();
        for (deal_id, pending_for_deal) in by_deal {
            let all_for_deal = otc_store::queue::list_for_deal(self.store.pool(), deal_id).await?;
            let chains: Vec<ChainId> = {
                let mut seen = Vec::new();
                for item in &pending_for_deal {
                    if !seen.contains(&item.chain) {
                        seen.push(item.chain.clone());
                    }
                }
                seen
            };

            for chain in chains {
                let group: Vec<&QueueItem> = all_for_deal.iter().filter(|i| i.chain == chain).collect();
                let Some(lowest_pending) = group
                    .iter()
                    .filter(|i| i.status == QueueItemStatus::Pending)
                    .min_by_key(|i| i.seq)
                else {
                    continue;
                };
                // A lower-seq predecessor still PENDING or SUBMITTED blocks
                // this item; CONFIRMED and FAILED both unblock it (spec §4.3
                // "until it succeeds or reaches FAILED").
                let blocked = group.iter().any(|i| {
                    i.seq < lowest_pending.seq
                        && matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Submitted)
                });
                if !blocked {
                    candidates.push((*lowest_pending).clone());
                }
            }
        }

        candidates.sort_by_key(|i| i.created_at);
        candidates.truncate(self.fanout_limit);
        Ok(candidates)
    }

    /// Submit a freshly-eligible item (spec §4.3 steps 1-2).
    async fn submit_item(&self, mut item: QueueItem) -> BrokerResult<()> {
        let plugin = self.registry.get(&item.chain.0)?;
        let gas_price_hint = match item.last_gas_price {
            Some(price) => Some(price),
            None => Some(plugin.current_gas_price().await?),
        };

        let request = submit_request(&item, gas_price_hint);
        let started = tokio::time::Instant::now();
        let outcome = match plugin.submit(&request).await {
            Ok(outcome) => outcome,
            Err(BrokerError::AlreadyExecuted(reason)) => {
                warn!(item_id = %item.id, deal_id = %item.deal_id, %reason, "submission already executed on-chain; promoting to confirmed");
                item.status = QueueItemStatus::Confirmed;
                otc_store::queue::update(self.store.pool(), &item).await?;
                return Ok(());
            }
            Err(BrokerError::UnauthorizedOperator(reason)) => {
                error!(item_id = %item.id, deal_id = %item.deal_id, %reason, "unauthorized operator; marking queue item failed");
                item.status = QueueItemStatus::Failed;
                item.recovery_error = Some(reason);
                otc_store::queue::update(self.store.pool(), &item).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.metrics.record_plugin_call(started.elapsed().as_millis() as u64);

        item.submitted_tx = Some(outcome.tx_id);
        item.status = QueueItemStatus::Submitted;
        item.last_submit_at = Some(Utc::now());
        item.last_gas_price = Some(outcome.gas_price);
        item.original_nonce.get_or_insert(outcome.nonce);
        otc_store::queue::update(self.store.pool(), &item).await?;
        info!(item_id = %item.id, deal_id = %item.deal_id, "queue item submitted");
        Ok(())
    }

    /// Poll a SUBMITTED item: promote, reset, or gas-bump (spec §4.3 steps 3-5).
    async fn poll_item(&self, mut item: QueueItem) -> BrokerResult<()> {
        let plugin = self.registry.get(&item.chain.0)?;
        let Some(tx_id) = item.submitted_tx.clone() else {
            return Ok(());
        };
        let started = tokio::time::Instant::now();
        let confirmations = plugin.get_tx_confirmations(&tx_id).await?;
        self.metrics.record_plugin_call(started.elapsed().as_millis() as u64);

        if confirmations < 0 {
            item.status = QueueItemStatus::Pending;
            item.submitted_tx = None;
            item.recovery_error = Some(format!("tx {tx_id} failed or reorged away"));
            otc_store::queue::update(self.store.pool(), &item).await?;
            warn!(item_id = %item.id, %tx_id, "settlement tx failed or reorged; reset to pending");
            return Ok(());
        }

        if confirmations > 0 && confirmations as u64 >= plugin.get_confirmation_threshold() {
            item.status = QueueItemStatus::Confirmed;
            item.gas_used = plugin.get_tx_gas_used(&tx_id).await?;
            otc_store::queue::update(self.store.pool(), &item).await?;
            info!(item_id = %item.id, %tx_id, "queue item confirmed");
            return Ok(());
        }

        let stalled = item
            .last_submit_at
            .map(|t| Utc::now().signed_duration_since(t).to_std().unwrap_or_default() > self.stall_window)
            .unwrap_or(false);
        if stalled {
            let bumped_price =
                ((item.last_gas_price.unwrap_or(0) as f64) * self.gas_bump_factor).ceil() as u128;
            let request = submit_request(&item, Some(bumped_price));
            match plugin.submit(&request).await {
                Ok(outcome) => {
                    item.submitted_tx = Some(outcome.tx_id);
                    item.last_gas_price = Some(outcome.gas_price);
                    item.last_submit_at = Some(Utc::now());
                    item.gas_bump_attempts += 1;
                    otc_store::queue::update(self.store.pool(), &item).await?;
                    info!(item_id = %item.id, attempts = item.gas_bump_attempts, "queue item gas-bumped and resubmitted");
                }
                Err(BrokerError::AlreadyExecuted(reason)) => {
                    warn!(item_id = %item.id, %reason, "gas-bump resubmission already executed on-chain; promoting to confirmed");
                    item.status = QueueItemStatus::Confirmed;
                    otc_store::queue::update(self.store.pool(), &item).await?;
                }
                Err(BrokerError::UnauthorizedOperator(reason)) => {
                    error!(item_id = %item.id, %reason, "unauthorized operator on gas-bump resubmission; marking queue item failed");
                    item.status = QueueItemStatus::Failed;
                    item.recovery_error = Some(reason);
                    otc_store::queue::update(self.store.pool(), &item).await?;
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "gas-bump resubmission failed");
                }
            }
        }
        Ok(())
    }
}

/// Build a plugin [`SubmitRequest`] from a queue item, reusing its original
/// nonce and overriding the gas price hint for a first submission or a bump.
fn submit_request(item: &QueueItem, gas_price_hint: Option<u128>) -> SubmitRequest {
    SubmitRequest {
        deal_id: item.deal_id,
        side: None,
        from_addr: item.from_addr.clone(),
        to_addr: item.to_addr.clone(),
        asset: item.asset.clone(),
        amount: item.amount,
        original_nonce: item.original_nonce,
        gas_price_hint,
        purpose: purpose_discriminator(item.purpose),
        payback: item.payback.clone(),
        recipient: item.recipient.clone(),
        fee_recipient: item.fee_recipient.clone(),
        fees: item.fees,
    }
}

/// Maps a [`otc_common::types::QueueItemPurpose`] to the discriminator a
/// plugin's `submit` expects (spec §4.1's `SubmitRequest.purpose`).
fn purpose_discriminator(purpose: otc_common::types::QueueItemPurpose) -> String {
    use otc_common::types::QueueItemPurpose::*;
    match purpose {
        ApproveBroker => "APPROVE_BROKER",
        BrokerSwap => "BROKER_SWAP",
        BrokerRevert => "BROKER_REVERT",
        BrokerRefund => "BROKER_REFUND",
        Phase1Swap => "PHASE_1_SWAP",
        SurplusRefund => "SURPLUS_REFUND",
        GasFunding => "GAS_FUNDING",
        GasRefundToTank => "GAS_REFUND_TO_TANK",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use otc_common::types::QueueItemPurpose;
    use uuid::Uuid;

    fn item(seq: i64, status: QueueItemStatus, created_offset_secs: i64) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            deal_id: DealId::new(),
            chain: ChainId::new("ETH"),
            from_addr: "0xfrom".to_string(),
            to_addr: "0xto".to_string(),
            asset: "ETH".to_string(),
            amount: rust_decimal::Decimal::ONE,
            purpose: QueueItemPurpose::Phase1Swap,
            seq,
            status,
            submitted_tx: None,
            created_at: Utc::now() + ChronoDuration::seconds(created_offset_secs),
            phase: "settlement".to_string(),
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

    #[test]
    fn lower_seq_pending_blocks_higher_seq() {
        let low = item(0, QueueItemStatus::Pending, 0);
        let high = item(1, QueueItemStatus::Pending, 1);
        let group = [&low, &high];
        let lowest = group.iter().filter(|i| i.status == QueueItemStatus::Pending).min_by_key(|i| i.seq).unwrap();
        assert_eq!(lowest.seq, 0);
        let blocked = group
            .iter()
            .any(|i| i.seq < high.seq && matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Submitted));
        assert!(blocked);
    }

    #[test]
    fn confirmed_predecessor_unblocks() {
        let low = item(0, QueueItemStatus::Confirmed, 0);
        let high = item(1, QueueItemStatus::Pending, 1);
        let group = [&low, &high];
        let blocked = group
            .iter()
            .any(|i| i.seq < high.seq && matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Submitted));
        assert!(!blocked);
    }

    #[test]
    fn failed_predecessor_unblocks() {
        let low = item(0, QueueItemStatus::Failed, 0);
        let high = item(1, QueueItemStatus::Pending, 1);
        let group = [&low, &high];
        let blocked = group
            .iter()
            .any(|i| i.seq < high.seq && matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Submitted));
        assert!(!blocked);
    }

    #[test]
    fn purpose_discriminator_round_trips_known_strings() {
        assert_eq!(purpose_discriminator(QueueItemPurpose::ApproveBroker), "APPROVE_BROKER");
        assert_eq!(purpose_discriminator(QueueItemPurpose::GasRefundToTank), "GAS_REFUND_TO_TANK");
    }
}
