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

//! Synthetic deposit resolution (spec §4.7): replaces a balance-probe
//! identifier such as `"erc20-balance-0x..."` with the real transaction hash
//! behind it, once the chain's event log can be searched.

use std::time::Duration;

use otc_chain_plugin::registry::ChainRegistry;
use otc_chain_plugin::trait_::TransferEvent;
use otc_common::error::BrokerResult;
use otc_common::types::{DepositRecord, ResolutionStatus, TxidResolution};
use otc_store::Store;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

/// Known synthetic-id prefixes a plugin may emit in place of a real tx hash
/// (spec §3 "recognised by a known prefix").
const SYNTHETIC_PREFIXES: &[&str] = &["erc20-balance-", "native-balance-"];

/// Default "near match" tolerance for amount comparison during resolution
/// (spec §9 Open Question: "0.01% is a reasonable default").
const DEFAULT_AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

fn is_synthetic_id(tx_id: &str) -> bool {
    SYNTHETIC_PREFIXES.iter().any(|p| tx_id.starts_with(p))
}

/// Sweeps every synthetic deposit still pending resolution on a fixed
/// interval, mirroring the other long-running loops in this workspace.
#[derive(Debug)]
pub struct TxidResolver {
    store: Store,
    registry: ChainRegistry,
    tick_interval: Duration,
    /// Blocks searched on either side of the deposit's recorded block height.
    search_span: u64,
    /// Maximum resolution attempts before a deposit is marked failed.
    max_attempts: u32,
    /// Amount-match tolerance, as a fraction of the expected amount.
    amount_tolerance: Decimal,
}

impl TxidResolver {
    /// Build a resolver over `store`/`registry`.
    pub fn new(store: Store, registry: ChainRegistry, tick_interval: Duration, search_span: u64, max_attempts: u32) -> Self {
        Self { store, registry, tick_interval, search_span, max_attempts, amount_tolerance: DEFAULT_AMOUNT_TOLERANCE }
    }

    /// Run the sweep loop until asked to shut down.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "txid resolver tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("txid resolver shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every synthetic deposit still pending resolution.
    pub async fn tick(&self) -> BrokerResult<()> {
        let pending = otc_store::deposits::list_pending_resolution(self.store.pool()).await?;
        for deposit in pending {
            if let Err(e) = self.resolve_one(&deposit).await {
                warn!(deposit_id = %deposit.id, error = %e, "synthetic deposit resolution attempt failed");
            }
        }
        Ok(())
    }

    /// Attempt to resolve one deposit, recording the attempt either way.
    async fn resolve_one(&self, deposit: &DepositRecord) -> BrokerResult<()> {
        if !deposit.synthetic || !is_synthetic_id(&deposit.tx_id) {
            // Already resolved to a real hash, or never was synthetic;
            // nothing to do (spec §8 round-trip law: re-running is a no-op).
            return Ok(());
        }

        let resolutions = otc_store::txid_resolutions::list_for_deposit(self.store.pool(), deposit.id).await?;
        if resolutions.len() as u32 >= self.max_attempts {
            otc_store::deposits::mark_resolution_failed(self.store.pool(), deposit.id).await?;
            warn!(deposit_id = %deposit.id, attempts = resolutions.len(), "synthetic deposit resolution exhausted");
            return Ok(());
        }

        let plugin = self.registry.get(&deposit.chain.0)?;
        let from_block = deposit.block_height.saturating_sub(self.search_span);
        let to_block = deposit.block_height + self.search_span;

        let candidates =
            plugin.resolve_transfer_events(&deposit.asset, &deposit.escrow_address, from_block, to_block).await?;

        let best = best_match(deposit, &candidates, self.amount_tolerance);

        let (confidence, chosen) = match &best {
            Some((event, confidence)) => (*confidence, Some(event.tx_hash.clone())),
            None => (0.0, None),
        };

        let resolution = TxidResolution {
            id: Uuid::new_v4(),
            deposit_id: deposit.id,
            window_from_block: from_block,
            window_to_block: to_block,
            candidates_considered: candidates.len() as u32,
            confidence,
            chosen_tx_hash: chosen.clone(),
            created_at: chrono::Utc::now(),
        };
        otc_store::txid_resolutions::insert(self.store.pool(), &resolution).await?;

        match chosen {
            Some(real_tx_id) => {
                otc_store::deposits::resolve_synthetic(
                    self.store.pool(),
                    deposit.id,
                    &real_tx_id,
                    ResolutionStatus::Resolved,
                )
                .await?;
                info!(deposit_id = %deposit.id, %real_tx_id, "synthetic deposit resolved");
            }
            None if resolutions.len() as u32 + 1 >= self.max_attempts => {
                otc_store::deposits::mark_resolution_failed(self.store.pool(), deposit.id).await?;
                warn!(deposit_id = %deposit.id, "no candidate match found; attempts exhausted");
            }
            None => {
                info!(deposit_id = %deposit.id, "no candidate match found this attempt; will retry");
            }
        }
        Ok(())
    }

}

/// Pick the best candidate: highest confidence, earliest block, lowest log
/// index (spec §4.7 "Best match"). Confidence is 1.0 for an exact amount
/// match, decaying linearly to 0.0 at the tolerance boundary.
fn best_match(deposit: &DepositRecord, candidates: &[TransferEvent], amount_tolerance: Decimal) -> Option<(TransferEvent, f64)> {
    let tolerance_abs = deposit.amount * amount_tolerance;
    let mut best: Option<(TransferEvent, f64)> = None;
    for event in candidates {
        let diff = (event.amount - deposit.amount).abs();
        if diff > tolerance_abs {
            continue;
        }
        let confidence = if tolerance_abs.is_zero() {
            if diff.is_zero() { 1.0 } else { 0.0 }
        } else {
            1.0 - (diff / tolerance_abs).to_string().parse::<f64>().unwrap_or(1.0).min(1.0)
        };
        let better = match &best {
            None => true,
            Some((current, current_confidence)) => {
                confidence > *current_confidence
                    || (confidence == *current_confidence && event.block_number < current.block_number)
                    || (confidence == *current_confidence
                        && event.block_number == current.block_number
                        && event.log_index < current.log_index)
            }
        };
        if better {
            best = Some((event.clone(), confidence));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use otc_common::types::{ChainId, DealId};

    fn deposit(amount: Decimal, block_height: u64) -> DepositRecord {
        DepositRecord {
            id: Uuid::new_v4(),
            deal_id: DealId::new(),
            chain: ChainId::new("ETH"),
            escrow_address: "0xescrow".to_string(),
            asset: "0x0000000000000000000000000000000000000a".to_string(),
            tx_id: "erc20-balance-0xescrow".to_string(),
            original_tx_id: None,
            amount,
            block_height,
            confirmations_last_seen: 10,
            synthetic: true,
            resolution_status: ResolutionStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }

    fn event(tx_hash: &str, amount: Decimal, block_number: u64, log_index: u64) -> TransferEvent {
        TransferEvent { tx_hash: tx_hash.to_string(), log_index, block_number, to: "0xescrow".to_string(), amount }
    }

    #[test]
    fn synthetic_prefix_recognition() {
        assert!(is_synthetic_id("erc20-balance-0xabc"));
        assert!(is_synthetic_id("native-balance-0xabc"));
        assert!(!is_synthetic_id("0xdeadbeef"));
    }

    #[test]
    fn exact_match_wins_over_tolerance_match() {
        let deposit = deposit(Decimal::new(1000, 2), 100);
        let candidates = vec![
            event("0xa", Decimal::new(1001, 2), 100, 1),
            event("0xb", Decimal::new(1000, 2), 100, 2),
        ];
        let (best, confidence) = best_match(&deposit, &candidates, DEFAULT_AMOUNT_TOLERANCE).unwrap();
        assert_eq!(best.tx_hash, "0xb");
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn earliest_block_breaks_confidence_ties() {
        let deposit = deposit(Decimal::new(1000, 2), 100);
        let candidates = vec![event("0xlater", Decimal::new(1000, 2), 105, 0), event("0xearlier", Decimal::new(1000, 2), 101, 0)];
        let (best, _) = best_match(&deposit, &candidates, DEFAULT_AMOUNT_TOLERANCE).unwrap();
        assert_eq!(best.tx_hash, "0xearlier");
    }

    #[test]
    fn amount_outside_tolerance_is_rejected() {
        let deposit = deposit(Decimal::new(100000, 2), 100);
        let candidates = vec![event("0xfar", Decimal::new(1, 2), 100, 0)];
        assert!(best_match(&deposit, &candidates, DEFAULT_AMOUNT_TOLERANCE).is_none());
    }
}
