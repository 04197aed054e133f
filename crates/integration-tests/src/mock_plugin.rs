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

//! A fully in-memory [`ChainPlugin`] stand-in for exercising the Deal
//! Engine, Queue Dispatcher and Recovery Manager without a live chain,
//! mirroring the `StubPlugin` pattern in `otc_chain_plugin::registry`'s own
//! unit tests but configurable enough to drive whole deal lifecycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use otc_chain_plugin::trait_::{
    ChainPlugin, ConfirmedDeposits, ObservedDeposit, PriceQuote, SubmitOutcome, SubmitRequest,
    TransferEvent,
};
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{DealId, EscrowAccountRef, Side};
use parking_lot::Mutex;
use rust_decimal::Decimal;

/// Per-address deposit state a test can pre-seed.
#[derive(Debug, Default, Clone)]
pub struct MockDeposits {
    /// Deposits observed at each escrow address.
    pub by_address: HashMap<String, Vec<ObservedDeposit>>,
}

/// A configurable [`ChainPlugin`] for deterministic integration tests.
#[derive(Debug)]
pub struct MockChainPlugin {
    chain_id: String,
    confirmation_threshold: u64,
    deposits: Mutex<MockDeposits>,
    /// tx id -> confirmations (negative means reorged/failed).
    tx_confirmations: Mutex<HashMap<String, i64>>,
    /// tx id -> gas used, once "confirmed".
    tx_gas_used: Mutex<HashMap<String, u64>>,
    submitted: Mutex<Vec<SubmitRequest>>,
    approvals: Mutex<HashMap<String, bool>>,
    native_usd_rate: Mutex<Option<Decimal>>,
    gas_price_wei: Mutex<u128>,
    native_balances: Mutex<HashMap<String, Decimal>>,
    next_tx_seq: AtomicU64,
    transfer_events: Mutex<Vec<TransferEvent>>,
    /// Gas used automatically recorded against every tx this plugin submits,
    /// so a test need not learn a dynamically generated tx id to exercise
    /// gas reimbursement end to end.
    default_gas_used: Mutex<Option<u64>>,
}

impl MockChainPlugin {
    /// A plugin for `chain_id` requiring `confirmation_threshold` confirmations.
    pub fn new(chain_id: impl Into<String>, confirmation_threshold: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            confirmation_threshold,
            deposits: Mutex::new(MockDeposits::default()),
            tx_confirmations: Mutex::new(HashMap::new()),
            tx_gas_used: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            approvals: Mutex::new(HashMap::new()),
            native_usd_rate: Mutex::new(Some(Decimal::from(3000))),
            gas_price_wei: Mutex::new(50_000_000_000),
            native_balances: Mutex::new(HashMap::new()),
            next_tx_seq: AtomicU64::new(0),
            transfer_events: Mutex::new(Vec::new()),
            default_gas_used: Mutex::new(None),
        }
    }

    /// Record `gas_used` against every transaction this plugin submits from
    /// now on, so a settlement confirmed later reports it without the test
    /// needing the dynamically generated tx id.
    pub fn set_default_gas_used(&self, gas_used: u64) {
        *self.default_gas_used.lock() = Some(gas_used);
    }

    /// Seed a deposit at `address`, immediately confirmed at
    /// `self.confirmation_threshold`.
    pub fn seed_confirmed_deposit(&self, address: &str, amount: Decimal) {
        let tx_id = format!("mock-tx-{}", self.next_tx_seq.fetch_add(1, Ordering::SeqCst));
        self.deposits.lock().by_address.entry(address.to_string()).or_default().push(ObservedDeposit {
            tx_id,
            amount,
            block_height: 100,
            confirmations: self.confirmation_threshold,
            synthetic: false,
        });
    }

    /// Seed a synthetic (balance-probe) deposit awaiting txid resolution.
    pub fn seed_synthetic_deposit(&self, address: &str, amount: Decimal, synthetic_tx_id: &str) {
        self.deposits.lock().by_address.entry(address.to_string()).or_default().push(ObservedDeposit {
            tx_id: synthetic_tx_id.to_string(),
            amount,
            block_height: 100,
            confirmations: self.confirmation_threshold,
            synthetic: true,
        });
    }

    /// Register a candidate transfer event the txid resolver should find.
    pub fn seed_transfer_event(&self, event: TransferEvent) {
        self.transfer_events.lock().push(event);
    }

    /// Force the confirmations reported for `tx_id` (use a negative value to
    /// simulate a reorg/failure, per spec §4.1 `getTxConfirmations`).
    pub fn set_confirmations(&self, tx_id: &str, confirmations: i64) {
        self.tx_confirmations.lock().insert(tx_id.to_string(), confirmations);
    }

    /// Record the gas used by a transaction, read back by
    /// [`ChainPlugin::get_tx_gas_used`] once confirmed.
    pub fn set_gas_used(&self, tx_id: &str, gas_used: u64) {
        self.tx_gas_used.lock().insert(tx_id.to_string(), gas_used);
    }

    /// Mark `escrow_addr` as already holding a broker allowance for `token_addr`.
    pub fn set_approved(&self, escrow_addr: &str, token_addr: &str, approved: bool) {
        self.approvals.lock().insert(format!("{escrow_addr}:{token_addr}"), approved);
    }

    /// Force the next `quote_native_for_usd` call to fail (simulating an
    /// unreachable oracle, spec §4.6 `NoPriceOracle`).
    pub fn fail_oracle(&self) {
        *self.native_usd_rate.lock() = None;
    }

    /// Every [`SubmitRequest`] this plugin has received, in submission order.
    pub fn submitted_requests(&self) -> Vec<SubmitRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ChainPlugin for MockChainPlugin {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn derive_escrow(&self, deal_id: DealId, side: Side) -> BrokerResult<EscrowAccountRef> {
        Ok(EscrowAccountRef {
            address: format!("mock-escrow-{}-{deal_id}-{side}", self.chain_id),
            derivation_index: 0,
        })
    }

    async fn list_confirmed_deposits(
        &self,
        _asset: &str,
        address: &str,
        min_confirmations: u64,
    ) -> BrokerResult<ConfirmedDeposits> {
        let deposits = self.deposits.lock();
        let observed = deposits.by_address.get(address).cloned().unwrap_or_default();
        let total_confirmed = observed
            .iter()
            .filter(|d| d.confirmations >= min_confirmations)
            .fold(Decimal::ZERO, |acc, d| acc + d.amount);
        Ok(ConfirmedDeposits { deposits: observed, total_confirmed })
    }

    async fn resolve_transfer_events(
        &self,
        _asset: &str,
        to: &str,
        from_block: u64,
        to_block: u64,
    ) -> BrokerResult<Vec<TransferEvent>> {
        Ok(self
            .transfer_events
            .lock()
            .iter()
            .filter(|e| e.to == to && e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn get_tx_confirmations(&self, tx_id: &str) -> BrokerResult<i64> {
        Ok(self
            .tx_confirmations
            .lock()
            .get(tx_id)
            .copied()
            .unwrap_or(self.confirmation_threshold as i64))
    }

    async fn get_tx_gas_used(&self, tx_id: &str) -> BrokerResult<Option<u64>> {
        Ok(self.tx_gas_used.lock().get(tx_id).copied())
    }

    fn get_confirmation_threshold(&self) -> u64 {
        self.confirmation_threshold
    }

    async fn submit(&self, request: &SubmitRequest) -> BrokerResult<SubmitOutcome> {
        let tx_id = format!("mock-tx-{}", self.next_tx_seq.fetch_add(1, Ordering::SeqCst));
        self.tx_confirmations.lock().insert(tx_id.clone(), self.confirmation_threshold as i64);
        if let Some(gas_used) = *self.default_gas_used.lock() {
            self.tx_gas_used.lock().insert(tx_id.clone(), gas_used);
        }
        self.submitted.lock().push(request.clone());
        Ok(SubmitOutcome { tx_id, nonce: 0, gas_price: *self.gas_price_wei.lock() })
    }

    async fn check_broker_approval(&self, escrow_addr: &str, token_addr: &str) -> BrokerResult<bool> {
        Ok(self.approvals.lock().get(&format!("{escrow_addr}:{token_addr}")).copied().unwrap_or(false))
    }

    async fn approve_broker_for_erc20(
        &self,
        escrow: &EscrowAccountRef,
        token_addr: &str,
    ) -> BrokerResult<SubmitOutcome> {
        self.approvals.lock().insert(format!("{}:{token_addr}", escrow.address), true);
        let tx_id = format!("mock-tx-{}", self.next_tx_seq.fetch_add(1, Ordering::SeqCst));
        self.tx_confirmations.lock().insert(tx_id.clone(), self.confirmation_threshold as i64);
        Ok(SubmitOutcome { tx_id, nonce: 0, gas_price: *self.gas_price_wei.lock() })
    }

    async fn quote_native_for_usd(&self) -> BrokerResult<PriceQuote> {
        match *self.native_usd_rate.lock() {
            Some(price) => Ok(PriceQuote { price, source: "mock".to_string() }),
            None => Err(BrokerError::NoPriceOracle("mock oracle disabled for this test".to_string())),
        }
    }

    fn get_operator_address(&self) -> Option<String> {
        Some(format!("mock-operator-{}", self.chain_id))
    }

    async fn current_gas_price(&self) -> BrokerResult<u128> {
        Ok(*self.gas_price_wei.lock())
    }

    async fn native_balance(&self, address: &str) -> BrokerResult<Decimal> {
        Ok(self.native_balances.lock().get(address).copied().unwrap_or(Decimal::ZERO))
    }
}
