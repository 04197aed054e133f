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

//! End-to-end deal lifecycle scenarios (spec §8), driven tick by tick
//! against a real Postgres-backed store and two [`MockChainPlugin`]s.

use std::sync::Arc;
use std::time::Duration;

use otc_chain_plugin::registry::ChainRegistry;
use otc_common::types::{QueueItemStatus, Side, Stage};
use otc_dispatcher::QueueDispatcher;
use otc_engine::DealEngine;
use otc_integration_tests::fixtures::party_spec;
use otc_integration_tests::MockChainPlugin;
use otc_store::Store;
use rust_decimal::Decimal;
use sqlx::PgPool;

fn engine_over(store: Store, registry: ChainRegistry) -> DealEngine {
    DealEngine::new(store, registry, Duration::from_secs(1), Duration::from_secs(3600))
}

fn dispatcher_over(store: Store, registry: ChainRegistry) -> QueueDispatcher {
    QueueDispatcher::new(store, registry, Duration::from_secs(1), 10, Duration::from_secs(60), 1.2)
}

/// Drive the dispatcher until every queue item for `deal_id` is terminal
/// (CONFIRMED or FAILED), or `max_rounds` ticks have elapsed.
async fn drain_queue(dispatcher: &QueueDispatcher, pool: &PgPool, deal_id: otc_common::types::DealId, max_rounds: usize) {
    for _ in 0..max_rounds {
        dispatcher.tick().await.expect("dispatcher tick");
        let items = otc_store::queue::list_for_deal(pool, deal_id).await.unwrap();
        if !items.is_empty() && items.iter().all(|i| matches!(i.status, QueueItemStatus::Confirmed | QueueItemStatus::Failed)) {
            return;
        }
    }
}

/// Native-for-native happy path (spec §8 scenario 1): both sides deposit in
/// full, both settlement items confirm immediately (the mock plugin
/// confirms at submission time), surplus is zero, and the deal closes.
#[sqlx::test(migrations = "../store/migrations")]
async fn happy_path_native_for_native(pool: PgPool) {
    let eth = Arc::new(MockChainPlugin::new("ETH", 3));
    let btc = Arc::new(MockChainPlugin::new("BTC", 2));
    let mut registry = ChainRegistry::new();
    registry.register(eth.clone());
    registry.register(btc.clone());

    let store = Store::from_pool(pool.clone());
    let engine = engine_over(store.clone(), registry.clone());
    let dispatcher = dispatcher_over(store.clone(), registry.clone());

    let party_a = party_spec(Side::A, "ETH", "ETH", Decimal::new(1, 0));
    let party_b = party_spec(Side::B, "BTC", "BTC", Decimal::new(5, 2));
    let deal = engine.create_deal(party_a, party_b, None).await.expect("create deal");
    assert_eq!(deal.stage, Stage::Draft);

    engine.tick().await.expect("draft -> collection");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Collection);
    let escrow_a = deal.party_a.escrow.as_ref().unwrap().address.clone();
    let escrow_b = deal.party_b.escrow.as_ref().unwrap().address.clone();

    eth.seed_confirmed_deposit(&escrow_a, Decimal::new(1, 0));
    btc.seed_confirmed_deposit(&escrow_b, Decimal::new(5, 2));

    engine.tick().await.expect("collection -> ready");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Ready);
    assert!(deal.party_a.funded && deal.party_b.funded);

    engine.tick().await.expect("ready -> swap");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Swap);

    drain_queue(&dispatcher, &pool, deal.id, 5).await;

    engine.tick().await.expect("swap -> payout");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Payout);

    engine.tick().await.expect("payout -> closed");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Closed);

    let items = otc_store::queue::list_for_deal(&pool, deal.id).await.unwrap();
    assert!(items.iter().all(|i| i.status == QueueItemStatus::Confirmed));
}

/// Cancellation before any deposit (spec §8 scenario 2): a DRAFT deal
/// cancels immediately with no on-chain action required.
#[sqlx::test(migrations = "../store/migrations")]
async fn cancel_before_funding_is_immediate(pool: PgPool) {
    let eth = Arc::new(MockChainPlugin::new("ETH", 3));
    let mut registry = ChainRegistry::new();
    registry.register(eth);
    let store = Store::from_pool(pool.clone());
    let engine = engine_over(store, registry);

    let party_a = party_spec(Side::A, "ETH", "ETH", Decimal::new(1, 0));
    let party_b = party_spec(Side::B, "ETH", "ETH", Decimal::new(1, 0));
    let deal = engine.create_deal(party_a, party_b, None).await.unwrap();

    engine.cancel_deal(deal.id).await.expect("cancel in draft");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Reverted);

    let items = otc_store::queue::list_for_deal(&pool, deal.id).await.unwrap();
    assert!(items.is_empty(), "no on-chain action is needed when nothing was ever deposited");
}

/// Partial funding past the deadline (spec §8 scenario 3): side A deposits,
/// side B never does, and once the deadline elapses the deal reverts with a
/// refund queued only for the side that actually sent funds.
#[sqlx::test(migrations = "../store/migrations")]
async fn partial_funding_times_out_and_reverts(pool: PgPool) {
    let eth = Arc::new(MockChainPlugin::new("ETH", 3));
    let btc = Arc::new(MockChainPlugin::new("BTC", 2));
    let mut registry = ChainRegistry::new();
    registry.register(eth.clone());
    registry.register(btc.clone());
    let store = Store::from_pool(pool.clone());

    let deal_deadline = Duration::from_millis(50);
    let engine = DealEngine::new(store, registry, Duration::from_secs(1), deal_deadline);

    let party_a = party_spec(Side::A, "ETH", "ETH", Decimal::new(1, 0));
    let party_b = party_spec(Side::B, "BTC", "BTC", Decimal::new(5, 2));
    let deal = engine.create_deal(party_a, party_b, None).await.unwrap();

    engine.tick().await.expect("draft -> collection");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    let escrow_a = deal.party_a.escrow.as_ref().unwrap().address.clone();
    eth.seed_confirmed_deposit(&escrow_a, Decimal::new(1, 0));

    tokio::time::sleep(Duration::from_millis(80)).await;

    engine.tick().await.expect("collection -> reverted on deadline");
    let deal = engine.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.stage, Stage::Reverted);

    let items = otc_store::queue::list_for_deal(&pool, deal.id).await.unwrap();
    assert_eq!(items.len(), 1, "only the funded side needs a refund");
    assert_eq!(items[0].to_addr, deal.party_a.refund_address);
    let _ = btc;
}

/// A reorg on a settlement tx (spec §8 scenario 4): the dispatcher resets
/// the affected item back to PENDING instead of confirming a transaction
/// that the chain later dropped.
#[sqlx::test(migrations = "../store/migrations")]
async fn reorged_settlement_tx_resets_to_pending(pool: PgPool) {
    let eth = Arc::new(MockChainPlugin::new("ETH", 3));
    let mut registry = ChainRegistry::new();
    registry.register(eth.clone());
    let store = Store::from_pool(pool.clone());
    let dispatcher = dispatcher_over(store, registry);

    let deal_id = otc_common::types::DealId::new();
    let item = otc_common::types::QueueItem {
        id: uuid::Uuid::new_v4(),
        deal_id,
        chain: otc_common::types::ChainId::new("ETH"),
        from_addr: "escrow-a".to_string(),
        to_addr: "recipient-a".to_string(),
        asset: "ETH".to_string(),
        amount: Decimal::new(1, 0),
        purpose: otc_common::types::QueueItemPurpose::Phase1Swap,
        seq: 0,
        status: QueueItemStatus::Pending,
        submitted_tx: None,
        created_at: chrono::Utc::now(),
        phase: "settlement".to_string(),
        gas_bump_attempts: 0,
        last_gas_price: None,
        original_nonce: None,
        last_submit_at: None,
        recovery_attempts: 0,
        last_recovery_at: None,
        recovery_error: None,
        payback: None,
        recipient: Some("recipient-a".to_string()),
        fee_recipient: None,
        fees: None,
        gas_used: None,
    };
    otc_store::queue::insert(&pool, &item).await.unwrap();

    dispatcher.tick().await.expect("submit");
    let submitted = otc_store::queue::list_for_deal(&pool, deal_id).await.unwrap().remove(0);
    assert_eq!(submitted.status, QueueItemStatus::Submitted);
    let tx_id = submitted.submitted_tx.clone().unwrap();

    eth.set_confirmations(&tx_id, -1);
    dispatcher.tick().await.expect("poll detects reorg");
    let reset = otc_store::queue::list_for_deal(&pool, deal_id).await.unwrap().remove(0);
    assert_eq!(reset.status, QueueItemStatus::Pending);
    assert!(reset.submitted_tx.is_none());
}

/// Admin spend-from-escrow is rejected while a deal is in SWAP, since a
/// settlement call may already be in flight against that escrow's balance.
#[sqlx::test(migrations = "../store/migrations")]
async fn admin_spend_rejected_during_swap(pool: PgPool) {
    let eth = Arc::new(MockChainPlugin::new("ETH", 3));
    let mut registry = ChainRegistry::new();
    registry.register(eth);
    let store = Store::from_pool(pool.clone());
    let engine = engine_over(store, registry);

    let party_a = party_spec(Side::A, "ETH", "ETH", Decimal::new(1, 0));
    let party_b = party_spec(Side::B, "ETH", "ETH", Decimal::new(1, 0));
    let mut deal = engine.create_deal(party_a, party_b, None).await.unwrap();
    deal.stage = Stage::Swap;
    deal.party_a.escrow = Some(otc_common::types::EscrowAccountRef { address: "escrow-a".to_string(), derivation_index: 0 });
    otc_store::deals::update(&pool, &deal).await.unwrap();

    let result = engine.admin_spend_from_escrow(deal.id, Side::A, "destination", Decimal::new(1, 1)).await;
    assert!(result.is_err(), "admin spend must be rejected while settlement may be in flight");
}
