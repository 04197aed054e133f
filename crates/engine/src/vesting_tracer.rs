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

//! Vesting classification (spec §4.7): walks a UTXO-chain transaction back to
//! its coinbase ancestor to decide whether it is vested or unvested, for
//! chains with a coinbase-vesting rule.

use std::sync::Arc;

use chrono::Utc;
use otc_common::error::BrokerResult;
use otc_common::types::{VestingCacheEntry, VestingStatus};
use otc_store::Store;
use tracing::warn;

use otc_chain_plugin::VestingSource;

/// Walk no more than this many ancestors before treating the trace as a
/// permanent failure (spec §4.7 "capped depth").
const MAX_TRACE_DEPTH: u32 = 64;

/// Classifies UTXOs on demand and persists the result, consulting the
/// persisted cache first so a previously-traced txid is never re-walked.
#[derive(Debug)]
pub struct VestingTracer {
    store: Store,
}

impl VestingTracer {
    /// Build a tracer over `store`.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Classify `txid` as vested/unvested, consulting and updating the
    /// persisted cache. Returns the resolved status, or `Unknown` on a
    /// transient failure (not persisted, so the next call retries).
    pub async fn classify(&self, source: &Arc<dyn VestingSource>, txid: &str) -> BrokerResult<VestingStatus> {
        if let Some(cached) = otc_store::vesting::get(self.store.pool(), txid).await? {
            if matches!(cached.vesting_status, VestingStatus::Vested | VestingStatus::Unvested | VestingStatus::TracingFailed) {
                return Ok(cached.vesting_status);
            }
        }

        match trace(source, txid).await {
            Ok(entry) => {
                let status = entry.vesting_status;
                otc_store::vesting::upsert(self.store.pool(), &entry).await?;
                Ok(status)
            }
            Err(TraceOutcome::Transient(reason)) => {
                warn!(txid, reason, "vesting trace failed transiently; will retry");
                Ok(VestingStatus::Unknown)
            }
            Err(TraceOutcome::Permanent(reason)) => {
                let entry = VestingCacheEntry {
                    txid: txid.to_string(),
                    is_coinbase: false,
                    coinbase_block_height: None,
                    parent_txid: None,
                    vesting_status: VestingStatus::TracingFailed,
                    traced_at: Utc::now(),
                    error_message: Some(reason.clone()),
                };
                otc_store::vesting::upsert(self.store.pool(), &entry).await?;
                warn!(txid, reason, "vesting trace failed permanently; cached to avoid retry storm");
                Ok(VestingStatus::TracingFailed)
            }
        }
    }

}

enum TraceOutcome {
    Transient(String),
    Permanent(String),
}

/// Iteratively (not recursively) walk `txid`'s ancestry to a coinbase origin,
/// bounded by [`MAX_TRACE_DEPTH`]. Free of any persistence dependency so it
/// can run ahead of (and be tested without) a [`Store`].
async fn trace(source: &Arc<dyn VestingSource>, txid: &str) -> Result<VestingCacheEntry, TraceOutcome> {
    let mut current = txid.to_string();
    let mut immediate_parent: Option<String> = None;

    for depth in 0..MAX_TRACE_DEPTH {
        let is_coinbase = source
            .is_coinbase(&current)
            .await
            .map_err(|e| TraceOutcome::Transient(format!("is_coinbase({current}): {e}")))?;

        if is_coinbase {
            let height = source
                .confirmed_height(&current)
                .await
                .map_err(|e| TraceOutcome::Transient(format!("confirmed_height({current}): {e}")))?
                .ok_or_else(|| TraceOutcome::Transient(format!("coinbase {current} not yet confirmed")))?;

            let status =
                if height <= source.vesting_threshold_height() { VestingStatus::Vested } else { VestingStatus::Unvested };

            return Ok(VestingCacheEntry {
                txid: txid.to_string(),
                is_coinbase: depth == 0,
                coinbase_block_height: Some(height),
                parent_txid: immediate_parent,
                vesting_status: status,
                traced_at: Utc::now(),
                error_message: None,
            });
        }

        let parent = source
            .parent_txid(&current)
            .await
            .map_err(|e| TraceOutcome::Transient(format!("parent_txid({current}): {e}")))?;

        match parent {
            Some(parent_txid) => {
                if depth == 0 {
                    immediate_parent = Some(parent_txid.clone());
                }
                current = parent_txid;
            }
            None => {
                return Err(TraceOutcome::Permanent(format!(
                    "no resolvable parent for {current} and it is not a coinbase"
                )));
            }
        }
    }

    Err(TraceOutcome::Permanent(format!("max trace depth ({MAX_TRACE_DEPTH}) exceeded from {txid}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use otc_common::error::BrokerResult as Result_;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeSource {
        parents: HashMap<String, String>,
        coinbase: String,
        coinbase_height: u64,
        threshold: u64,
        fail_parent_lookup: Mutex<bool>,
    }

    #[async_trait]
    impl VestingSource for FakeSource {
        async fn is_coinbase(&self, txid: &str) -> Result_<bool> {
            Ok(txid == self.coinbase)
        }
        async fn parent_txid(&self, txid: &str) -> Result_<Option<String>> {
            if *self.fail_parent_lookup.lock().unwrap() {
                return Err(otc_common::error::BrokerError::Plugin("rpc down".to_string()));
            }
            Ok(self.parents.get(txid).cloned())
        }
        async fn confirmed_height(&self, txid: &str) -> Result_<Option<u64>> {
            if txid == self.coinbase {
                Ok(Some(self.coinbase_height))
            } else {
                Ok(Some(0))
            }
        }
        fn vesting_threshold_height(&self) -> u64 {
            self.threshold
        }
    }

    fn chain(coinbase_height: u64, threshold: u64) -> FakeSource {
        let mut parents = HashMap::new();
        parents.insert("tx3".to_string(), "tx2".to_string());
        parents.insert("tx2".to_string(), "tx1".to_string());
        parents.insert("tx1".to_string(), "coinbase".to_string());
        FakeSource { parents, coinbase: "coinbase".to_string(), coinbase_height, threshold, fail_parent_lookup: Mutex::new(false) }
    }

    #[tokio::test]
    async fn vested_when_coinbase_at_or_before_threshold() {
        let source: Arc<dyn VestingSource> = Arc::new(chain(100, 200));
        let result = trace(&source, "tx3").await.unwrap();
        assert_eq!(result.vesting_status, VestingStatus::Vested);
        assert_eq!(result.coinbase_block_height, Some(100));
    }

    #[tokio::test]
    async fn unvested_when_coinbase_after_threshold() {
        let source: Arc<dyn VestingSource> = Arc::new(chain(500, 200));
        let result = trace(&source, "tx3").await.unwrap();
        assert_eq!(result.vesting_status, VestingStatus::Unvested);
    }

    #[tokio::test]
    async fn no_parent_and_not_coinbase_is_permanent_failure() {
        let source: Arc<dyn VestingSource> = Arc::new(FakeSource {
            parents: HashMap::new(),
            coinbase: "coinbase".to_string(),
            coinbase_height: 1,
            threshold: 1,
            fail_parent_lookup: Mutex::new(false),
        });
        let err = trace(&source, "orphan").await.unwrap_err();
        assert!(matches!(err, TraceOutcome::Permanent(_)));
    }

    #[tokio::test]
    async fn rpc_failure_is_transient() {
        let mut fake = chain(100, 200);
        fake.fail_parent_lookup = Mutex::new(true);
        let source: Arc<dyn VestingSource> = Arc::new(fake);
        let err = trace(&source, "tx3").await.unwrap_err();
        assert!(matches!(err, TraceOutcome::Transient(_)));
    }
}
