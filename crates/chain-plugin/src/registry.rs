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

//! Chain id -> plugin registry (spec §9: "add a chain by implementing the
//! capability set"). Every other component resolves a plugin through this
//! registry rather than depending on a concrete implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::trait_::ChainPlugin;
use otc_common::error::{BrokerError, BrokerResult};

/// Maps chain identifiers to their registered [`ChainPlugin`].
#[derive(Debug, Default, Clone)]
pub struct ChainRegistry {
    plugins: HashMap<String, Arc<dyn ChainPlugin>>,
}

impl ChainRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { plugins: HashMap::new() }
    }

    /// Register `plugin` under its own `chain_id()`.
    pub fn register(&mut self, plugin: Arc<dyn ChainPlugin>) {
        self.plugins.insert(plugin.chain_id().to_uppercase(), plugin);
    }

    /// Look up the plugin for `chain_id`, upper-cased for consistency with
    /// [`otc_common::types::ChainId`]'s normalisation.
    pub fn get(&self, chain_id: &str) -> BrokerResult<Arc<dyn ChainPlugin>> {
        self.plugins
            .get(&chain_id.to_uppercase())
            .cloned()
            .ok_or_else(|| BrokerError::Plugin(format!("no chain plugin registered for {chain_id}")))
    }

    /// Every registered chain id.
    pub fn chain_ids(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::{ConfirmedDeposits, PriceQuote, SubmitOutcome, SubmitRequest, TransferEvent};
    use async_trait::async_trait;
    use otc_common::types::{DealId, EscrowAccountRef, Side};
    use rust_decimal::Decimal;

    #[derive(Debug)]
    struct StubPlugin(String);

    #[async_trait]
    impl ChainPlugin for StubPlugin {
        fn chain_id(&self) -> &str {
            &self.0
        }
        async fn derive_escrow(&self, _: DealId, _: Side) -> BrokerResult<EscrowAccountRef> {
            unimplemented!()
        }
        async fn list_confirmed_deposits(
            &self,
            _: &str,
            _: &str,
            _: u64,
        ) -> BrokerResult<ConfirmedDeposits> {
            Ok(ConfirmedDeposits { deposits: vec![], total_confirmed: Decimal::ZERO })
        }
        async fn resolve_transfer_events(
            &self,
            _: &str,
            _: &str,
            _: u64,
            _: u64,
        ) -> BrokerResult<Vec<TransferEvent>> {
            Ok(vec![])
        }
        async fn get_tx_confirmations(&self, _: &str) -> BrokerResult<i64> {
            Ok(0)
        }
        fn get_confirmation_threshold(&self) -> u64 {
            1
        }
        async fn submit(&self, _: &SubmitRequest) -> BrokerResult<SubmitOutcome> {
            unimplemented!()
        }
        async fn approve_broker_for_erc20(
            &self,
            _: &EscrowAccountRef,
            _: &str,
        ) -> BrokerResult<SubmitOutcome> {
            unimplemented!()
        }
        async fn quote_native_for_usd(&self) -> BrokerResult<PriceQuote> {
            unimplemented!()
        }
        fn get_operator_address(&self) -> Option<String> {
            None
        }
        async fn current_gas_price(&self) -> BrokerResult<u128> {
            Ok(0)
        }
        async fn native_balance(&self, _: &str) -> BrokerResult<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    #[test]
    fn register_and_get_is_case_insensitive() {
        let mut registry = ChainRegistry::new();
        registry.register(Arc::new(StubPlugin("eth".to_string())));
        assert!(registry.get("ETH").is_ok());
        assert!(registry.get("eth").is_ok());
        assert!(registry.get("polygon").is_err());
    }
}
