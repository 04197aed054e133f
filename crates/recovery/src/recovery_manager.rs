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

//! [`RecoveryManager`]: the single-threaded, lease-coordinated reconciliation
//! cycle described in spec §4.4, plus the gas-funding path of §4.5.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use otc_chain_plugin::registry::ChainRegistry;
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{
    ChainId, DealId, EscrowAccountRef, GasRefund, GasRefundStatus, QueueItem, QueueItemPurpose,
    QueueItemStatus, RecoveryLogEntry, Side,
};
use otc_store::Store;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The one lease every recovery cycle across every process must hold before
/// touching anything (spec §4.4 "Scheduling").
const LEASE_TYPE: &str = "RECOVERY_GLOBAL";

/// Fallback floor for a gas-funding transfer when a chain has none configured.
const DEFAULT_GAS_FUNDING_FLOOR: &str = "0.005";

/// An asset looks like an ERC-20 contract if it is a `0x`-prefixed 40-hex-digit
/// address; anything else (a bare symbol like `"ETH"` or `"BTC"`) is native.
/// Mirrors `otc_engine::deal_engine`'s private helper of the same name.
fn is_erc20(asset: &str) -> bool {
    asset.len() == 42 && asset.starts_with("0x") && asset[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Closes the gap between persisted state and what chains actually show
/// (spec §4.4), running as a single fixed-interval cycle gated by the global
/// recovery lease so redundant process instances never race each other.
#[derive(Debug)]
pub struct RecoveryManager {
    store: Store,
    registry: ChainRegistry,
    holder_id: String,
    cycle_interval: Duration,
    stuck_threshold: Duration,
    failed_tx_threshold: Duration,
    max_recovery_attempts: u32,
    approval_lock_window: Duration,
    approval_recheck_interval: Duration,
    min_refund_threshold: HashMap<String, Decimal>,
    gas_funding_floor: HashMap<String, Decimal>,
    last_allowance_check: Mutex<HashMap<(String, String), chrono::DateTime<Utc>>>,
    metrics: otc_common::metrics::Metrics,
}

impl RecoveryManager {
    /// Build a manager over `store`/`registry`. `holder_id` identifies this
    /// process for lease acquisition (e.g. a hostname or process uuid).
    /// `min_refund_threshold`/`gas_funding_floor` are keyed by upper-cased
    /// chain id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        registry: ChainRegistry,
        holder_id: String,
        cycle_interval: Duration,
        stuck_threshold: Duration,
        failed_tx_threshold: Duration,
        max_recovery_attempts: u32,
        approval_lock_window: Duration,
        approval_recheck_interval: Duration,
        min_refund_threshold: HashMap<String, Decimal>,
        gas_funding_floor: HashMap<String, Decimal>,
    ) -> Self {
        Self {
            store,
            registry,
            holder_id,
            cycle_interval,
            stuck_threshold,
            failed_tx_threshold,
            max_recovery_attempts,
            approval_lock_window,
            approval_recheck_interval,
            min_refund_threshold,
            gas_funding_floor,
            last_allowance_check: Mutex::new(HashMap::new()),
            metrics: otc_common::metrics::Metrics::new(),
        }
    }

    /// This manager's call-latency and phase-outcome counters, for the outer
    /// collaborator to scrape.
    pub fn metrics(&self) -> &otc_common::metrics::Metrics {
        &self.metrics
    }

    /// Run the cycle loop until asked to shut down.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.cycle_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "recovery cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("recovery manager shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One lease-gated cycle through all four phases, in order (spec §4.4).
    pub async fn cycle(&self) -> BrokerResult<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.cycle_interval).unwrap_or(chrono::Duration::seconds(60))
            + chrono::Duration::seconds(30);
        let acquired =
            otc_store::leases::try_acquire(self.store.pool(), LEASE_TYPE, &self.holder_id, expires_at)
                .await?;
        if !acquired {
            return Ok(());
        }

        if let Err(e) = self.phase_stuck_items().await {
            self.metrics.record_recovery_phase(false);
            warn!(error = %e, "recovery phase 1 (stuck items) failed");
        } else {
            self.metrics.record_recovery_phase(true);
        }
        if let Err(e) = self.phase_suspect_submitted().await {
            self.metrics.record_recovery_phase(false);
            warn!(error = %e, "recovery phase 2 (suspect submitted) failed");
        } else {
            self.metrics.record_recovery_phase(true);
        }
        if let Err(e) = self.phase_missing_allowances().await {
            self.metrics.record_recovery_phase(false);
            warn!(error = %e, "recovery phase 3 (missing allowances) failed");
        } else {
            self.metrics.record_recovery_phase(true);
        }
        if let Err(e) = self.phase_gas_refund_to_tank().await {
            self.metrics.record_recovery_phase(false);
            warn!(error = %e, "recovery phase 4 (gas refund to tank) failed");
        } else {
            self.metrics.record_recovery_phase(true);
        }
        Ok(())
    }

    async fn log(
        &self,
        entry_type: &str,
        chain: Option<ChainId>,
        action: String,
        success: bool,
        error: Option<String>,
        metadata: serde_json::Value,
    ) -> BrokerResult<()> {
        let entry = RecoveryLogEntry {
            id: Uuid::new_v4(),
            entry_type: entry_type.to_string(),
            chain,
            action,
            success,
            error,
            metadata,
            created_at: Utc::now(),
        };
        otc_store::recovery_log::insert(self.store.pool(), &entry).await
    }

    /// Phase 1: PENDING items stuck with no `submittedTx` (spec §4.4 phase 1).
    async fn phase_stuck_items(&self) -> BrokerResult<()> {
        let older_than = Utc::now()
            - chrono::Duration::from_std(self.stuck_threshold).unwrap_or(chrono::Duration::seconds(300));
        let items =
            otc_store::queue::list_stuck(self.store.pool(), older_than, self.max_recovery_attempts).await?;

        for mut item in items {
            let is_broker_op = matches!(
                item.purpose,
                QueueItemPurpose::BrokerSwap | QueueItemPurpose::BrokerRevert | QueueItemPurpose::BrokerRefund
            );
            let prep_result = if is_broker_op && is_erc20(&item.asset) {
                self.ensure_gas_funded(&item.chain, &item.from_addr).await
            } else {
                Ok(())
            };

            item.recovery_attempts += 1;
            item.last_recovery_at = Some(Utc::now());

            match &prep_result {
                Ok(()) => item.recovery_error = None,
                Err(e) => item.recovery_error = Some(e.to_string()),
            }

            if item.recovery_attempts >= self.max_recovery_attempts && prep_result.is_err() {
                item.status = QueueItemStatus::Failed;
                error!(item_id = %item.id, deal_id = %item.deal_id, "queue item permanently failed: max recovery attempts exhausted");
            }

            otc_store::queue::update(self.store.pool(), &item).await?;
            self.log(
                "stuck_item",
                Some(item.chain.clone()),
                format!("retry prep for queue item {}", item.id),
                prep_result.is_ok(),
                prep_result.err().map(|e| e.to_string()),
                serde_json::json!({ "queue_item_id": item.id, "deal_id": item.deal_id, "status": format!("{:?}", item.status) }),
            )
            .await?;
        }
        Ok(())
    }

    /// Phase 2: SUBMITTED items with no confirmation for too long (spec §4.4 phase 2).
    async fn phase_suspect_submitted(&self) -> BrokerResult<()> {
        let older_than = Utc::now()
            - chrono::Duration::from_std(self.failed_tx_threshold).unwrap_or(chrono::Duration::seconds(180));
        let items = otc_store::queue::list_suspect_submitted(self.store.pool(), older_than).await?;

        for mut item in items {
            let Some(tx_id) = item.submitted_tx.clone() else {
                continue;
            };
            let plugin = self.registry.get(&item.chain.0)?;
            let outcome = plugin.get_tx_confirmations(&tx_id).await;

            let (outcome_label, success) = match outcome {
                Ok(confirmations) if confirmations < 0 => {
                    item.status = QueueItemStatus::Pending;
                    item.submitted_tx = None;
                    item.recovery_error = Some(format!("tx {tx_id} failed or reorged away"));
                    ("reset_to_pending", true)
                }
                Ok(confirmations)
                    if confirmations > 0 && confirmations as u64 >= plugin.get_confirmation_threshold() =>
                {
                    item.status = QueueItemStatus::Confirmed;
                    item.gas_used = plugin.get_tx_gas_used(&tx_id).await.ok().flatten();
                    ("promoted_to_confirmed", true)
                }
                Ok(_) => ("still_pending", true),
                Err(e) => {
                    item.recovery_error = Some(e.to_string());
                    ("confirmation_check_failed", false)
                }
            };

            item.last_recovery_at = Some(Utc::now());
            otc_store::queue::update(self.store.pool(), &item).await?;
            self.log(
                "suspect_submitted",
                Some(item.chain.clone()),
                format!("{outcome_label} for queue item {}", item.id),
                success,
                item.recovery_error.clone(),
                serde_json::json!({ "queue_item_id": item.id, "tx_id": tx_id }),
            )
            .await?;
        }
        Ok(())
    }

    /// Phase 3: ERC-20 escrows lacking broker approval (spec §4.4 phase 3).
    async fn phase_missing_allowances(&self) -> BrokerResult<()> {
        let deals = otc_store::deals::list_non_terminal(self.store.pool()).await?;
        for deal in deals {
            for side in [Side::A, Side::B] {
                let party = deal.party(side);
                if !is_erc20(&party.asset) {
                    continue;
                }
                let Some(escrow) = &party.escrow else {
                    continue;
                };
                let key = (party.chain.0.clone(), escrow.address.clone());
                if let Some(last) = self.last_allowance_check.lock().get(&key).copied() {
                    if Utc::now().signed_duration_since(last).to_std().unwrap_or_default()
                        < self.approval_recheck_interval
                    {
                        continue;
                    }
                }
                self.last_allowance_check.lock().insert(key, Utc::now());

                let plugin = self.registry.get(&party.chain.0)?;
                let already_approved = plugin.check_broker_approval(&escrow.address, &party.asset).await?;
                if already_approved {
                    continue;
                }

                let result = self.ensure_allowance(&party.chain, escrow, &party.asset).await;
                self.log(
                    "missing_allowance",
                    Some(party.chain.clone()),
                    format!("approve broker for escrow {}", escrow.address),
                    result.is_ok(),
                    result.as_ref().err().map(|e| e.to_string()),
                    serde_json::json!({ "deal_id": deal.id, "escrow": escrow.address, "asset": party.asset }),
                )
                .await?;
                if let Err(e) = result {
                    warn!(deal_id = %deal.id, error = %e, "broker approval attempt failed; will retry next cycle");
                }
            }
        }
        Ok(())
    }

    /// Ensure `escrow` is gas-funded, then submit the broker approval (spec
    /// §4.4 phase 3 + §4.5).
    async fn ensure_allowance(
        &self,
        chain: &ChainId,
        escrow: &EscrowAccountRef,
        asset: &str,
    ) -> BrokerResult<()> {
        self.ensure_gas_funded(chain, &escrow.address).await?;
        let plugin = self.registry.get(&chain.0)?;
        plugin.approve_broker_for_erc20(escrow, asset).await?;
        Ok(())
    }

    /// The gas-funding path (spec §4.5): top up `escrow_addr` from the tank
    /// wallet if it cannot already cover an approval's gas cost.
    async fn ensure_gas_funded(&self, chain: &ChainId, escrow_addr: &str) -> BrokerResult<()> {
        let plugin = self.registry.get(&chain.0)?;
        let estimate = plugin.estimate_approval_gas_cost().await?;
        if estimate == Decimal::ZERO {
            return Ok(());
        }

        let balance = plugin.native_balance(escrow_addr).await?;
        if balance >= estimate {
            return Ok(());
        }

        let Some(tank_addr) = plugin.get_tank_address() else {
            return Err(BrokerError::Plugin(format!("no gas tank configured for chain {chain}")));
        };

        let floor = self
            .gas_funding_floor
            .get(&chain.0)
            .copied()
            .unwrap_or_else(|| DEFAULT_GAS_FUNDING_FLOOR.parse().unwrap_or(Decimal::ZERO));
        let funding_amount = floor.max(estimate * Decimal::TWO);

        let tank_balance = plugin.native_balance(&tank_addr).await?;
        if tank_balance < funding_amount + estimate {
            error!(chain = %chain, tank_addr, "LOW_TANK_BALANCE: gas tank cannot fund escrow {escrow_addr}");
            self.log(
                "low_tank_balance",
                Some(chain.clone()),
                format!("fund escrow {escrow_addr} from tank"),
                false,
                Some("tank balance insufficient".to_string()),
                serde_json::json!({ "escrow": escrow_addr, "tank": tank_addr, "requested": funding_amount.to_string() }),
            )
            .await?;
            return Err(BrokerError::Plugin(format!("tank balance too low to fund {escrow_addr}")));
        }

        let request = otc_chain_plugin::trait_::SubmitRequest {
            deal_id: DealId::new(),
            side: None,
            from_addr: tank_addr.clone(),
            to_addr: escrow_addr.to_string(),
            asset: String::new(),
            amount: funding_amount,
            original_nonce: None,
            gas_price_hint: None,
            purpose: "GAS_FUNDING".to_string(),
            payback: None,
            recipient: None,
            fee_recipient: None,
            fees: None,
        };
        let outcome = plugin.submit(&request).await?;
        self.log(
            "gas_funding",
            Some(chain.clone()),
            format!("funded escrow {escrow_addr} from tank"),
            true,
            None,
            serde_json::json!({ "escrow": escrow_addr, "tank": tank_addr, "tx_id": outcome.tx_id, "amount": funding_amount.to_string() }),
        )
        .await?;
        Ok(())
    }

    /// Phase 4: refund the tank once an approval has settled and no broker
    /// ops remain outstanding for its escrow (spec §4.4 phase 4).
    async fn phase_gas_refund_to_tank(&self) -> BrokerResult<()> {
        let deals = otc_store::deals::list_non_terminal(self.store.pool()).await?;
        for deal in deals {
            for side in [Side::A, Side::B] {
                let party = deal.party(side);
                if !is_erc20(&party.asset) {
                    continue;
                }
                let Some(escrow) = &party.escrow else {
                    continue;
                };

                let items = otc_store::queue::list_for_deal(self.store.pool(), deal.id).await?;
                let Some(approval) = items.iter().find(|i| {
                    i.purpose == QueueItemPurpose::ApproveBroker
                        && i.chain == party.chain
                        && i.from_addr == escrow.address
                }) else {
                    continue;
                };
                if approval.status != QueueItemStatus::Confirmed {
                    continue;
                }
                let Some(confirmed_at) = approval.last_submit_at else {
                    continue;
                };
                if Utc::now().signed_duration_since(confirmed_at).to_std().unwrap_or_default()
                    < self.approval_lock_window
                {
                    continue;
                }

                let pending_broker_ops = items.iter().any(|i| {
                    i.id != approval.id
                        && i.chain == party.chain
                        && i.from_addr == escrow.address
                        && matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Submitted)
                });
                if pending_broker_ops {
                    continue;
                }

                let Some(approval_tx) = approval.submitted_tx.clone() else {
                    continue;
                };
                let already_refunded = otc_store::gas_refunds::list_for_deal(self.store.pool(), deal.id)
                    .await?
                    .into_iter()
                    .any(|r| r.approval_tx_hash == approval_tx);
                if already_refunded {
                    continue;
                }

                if let Err(e) = self
                    .queue_gas_refund(&deal.id, &party.chain, escrow, &approval_tx)
                    .await
                {
                    warn!(deal_id = %deal.id, error = %e, "gas refund computation failed");
                }
            }
        }
        Ok(())
    }

    async fn queue_gas_refund(
        &self,
        deal_id: &DealId,
        chain: &ChainId,
        escrow: &EscrowAccountRef,
        approval_tx: &str,
    ) -> BrokerResult<()> {
        let plugin = self.registry.get(&chain.0)?;
        let Some(tank_address) = plugin.get_tank_address() else {
            return Err(BrokerError::Plugin(format!("no gas tank configured for chain {chain}")));
        };
        let balance = plugin.native_balance(&escrow.address).await?;
        let estimated_refund_cost = plugin.estimate_native_transfer_gas_cost().await?;
        let refundable = balance - estimated_refund_cost;

        let threshold = self.min_refund_threshold.get(&chain.0).copied().unwrap_or(Decimal::ZERO);

        let mut tx = self.store.begin().await?;
        let refund_id = Uuid::new_v4();
        if refundable <= threshold {
            let refund = GasRefund {
                id: refund_id,
                deal_id: *deal_id,
                chain: chain.clone(),
                escrow_address: escrow.address.clone(),
                approval_tx_hash: approval_tx.to_string(),
                refund_amount: refundable.max(Decimal::ZERO),
                status: GasRefundStatus::Skipped,
                linked_queue_item_id: None,
                metadata: serde_json::json!({ "reason": "below min_refund_threshold" }),
                created_at: Utc::now(),
            };
            otc_store::gas_refunds::insert(&mut *tx, &refund).await?;
            tx.commit().await.map_err(BrokerError::Store)?;
            return Ok(());
        }

        let queue_item_id = Uuid::new_v4();
        let items = otc_store::queue::list_for_deal(&mut *tx, *deal_id).await?;
        let seq = items.iter().filter(|i| &i.chain == chain).map(|i| i.seq).max().map(|m| m + 1).unwrap_or(0);

        let queue_item = QueueItem {
            id: queue_item_id,
            deal_id: *deal_id,
            chain: chain.clone(),
            from_addr: escrow.address.clone(),
            to_addr: tank_address,
            asset: String::new(),
            amount: refundable,
            purpose: QueueItemPurpose::GasRefundToTank,
            seq,
            status: QueueItemStatus::Pending,
            submitted_tx: None,
            created_at: Utc::now(),
            phase: "gas_refund".to_string(),
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
        };
        otc_store::queue::insert(&mut *tx, &queue_item).await?;

        let refund = GasRefund {
            id: refund_id,
            deal_id: *deal_id,
            chain: chain.clone(),
            escrow_address: escrow.address.clone(),
            approval_tx_hash: approval_tx.to_string(),
            refund_amount: refundable,
            status: GasRefundStatus::Queued,
            linked_queue_item_id: Some(queue_item_id),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        otc_store::gas_refunds::insert(&mut *tx, &refund).await?;
        tx.commit().await.map_err(BrokerError::Store)?;

        info!(deal_id = %deal_id, amount = %refundable, "gas refund queued");
        self.log(
            "gas_refund",
            Some(chain.clone()),
            format!("queued refund for escrow {}", escrow.address),
            true,
            None,
            serde_json::json!({ "deal_id": deal_id, "amount": refundable.to_string(), "queue_item_id": queue_item_id }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::is_erc20;

    #[test]
    fn recognises_erc20_contract_addresses() {
        assert!(is_erc20("0x1234567890123456789012345678901234567890"));
        assert!(!is_erc20("ETH"));
        assert!(!is_erc20("BTC"));
        assert!(!is_erc20("0xshort"));
    }
}
