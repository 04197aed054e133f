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

//! Subcommand handlers: `run` starts the daemon's three long-running loops
//! plus ordered shutdown (spec §6); `deal`/`admin` are thin local wrappers
//! around [`otc_engine::DealEngine`] for operators and test harnesses, in
//! front of the RPC surface that is this crate's outer collaborator.

use eyre::{Result, WrapErr};
use otc_common::config::Config;
use otc_dispatcher::QueueDispatcher;
use otc_engine::{DealEngine, TxidResolver};
use otc_recovery::RecoveryManager;
use otc_store::Store;
use tracing::info;

use crate::{parse_deal_id, parse_side, parse_stage, party_spec, wiring, AdminCommands, DealCommands};

/// `broker run`: starts every long-running loop and blocks until
/// SIGINT/SIGTERM, then performs the ordered shutdown from spec §6 (stop
/// Recovery Manager, stop Deal Engine, stop chain observers, close store).
pub async fn run_daemon(config: Config) -> Result<()> {
    let store = Store::connect(&config.database_url).await.wrap_err("connecting to store")?;
    store.migrate().await.wrap_err("running migrations")?;
    let registry = wiring::build_registry(&config).await.wrap_err("building chain registry")?;

    let deal_engine =
        DealEngine::new(store.clone(), registry.clone(), config.engine_tick_interval, config.default_deal_deadline);
    let dispatcher = QueueDispatcher::new(
        store.clone(),
        registry.clone(),
        config.engine_tick_interval,
        config.dispatcher_fanout_limit,
        config.dispatcher_stall_window,
        config.dispatcher_gas_bump_factor,
    );
    let min_refund_threshold = config
        .chains
        .values()
        .map(|c| (c.chain_id.to_uppercase(), c.min_refund_threshold.parse().unwrap_or_default()))
        .collect();
    let gas_funding_floor = config
        .chains
        .values()
        .map(|c| (c.chain_id.to_uppercase(), c.gas_funding_floor.parse().unwrap_or_default()))
        .collect();
    let recovery_manager = RecoveryManager::new(
        store.clone(),
        registry.clone(),
        format!("broker-{}", uuid::Uuid::new_v4()),
        config.recovery_interval,
        config.stuck_threshold,
        config.failed_tx_threshold,
        config.max_recovery_attempts,
        config.approval_lock_window,
        config.approval_recheck_interval,
        min_refund_threshold,
        gas_funding_floor,
    );
    let txid_resolver = TxidResolver::new(
        store.clone(),
        registry.clone(),
        config.txid_resolver_interval,
        config.txid_resolver_search_span,
        config.txid_resolver_max_attempts,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let engine_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { deal_engine.run(rx).await }
    });
    let dispatcher_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { dispatcher.run(rx).await }
    });
    let recovery_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { recovery_manager.run(rx).await }
    });
    let txid_resolver_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { txid_resolver.run(rx).await }
    });

    info!("broker engine running; press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.wrap_err("waiting for shutdown signal")?;
    info!("shutdown signal received; stopping recovery manager");
    let _ = shutdown_tx.send(true);

    // Ordered shutdown per spec §6: recovery manager, deal engine, chain
    // observers (here: the dispatcher and the txid resolver, which own
    // every plugin call), then the store. All loops share one shutdown
    // signal; join order below reflects the spec's stated sequence rather
    // than strict dependency.
    let _ = recovery_task.await;
    info!("recovery manager stopped; stopping deal engine");
    let _ = engine_task.await;
    info!("deal engine stopped; stopping chain observers");
    let _ = dispatcher_task.await;
    let _ = txid_resolver_task.await;
    info!("chain observers stopped; closing store");
    drop(store);

    info!("shutdown complete");
    Ok(())
}

/// `broker deal ...`
pub async fn deal_command(config: Config, cmd: DealCommands) -> Result<()> {
    let store = Store::connect(&config.database_url).await.wrap_err("connecting to store")?;
    let registry = wiring::build_registry(&config).await.wrap_err("building chain registry")?;
    let engine =
        DealEngine::new(store, registry, config.engine_tick_interval, config.default_deal_deadline);

    match cmd {
        DealCommands::Create {
            a_chain,
            a_asset,
            a_refund,
            a_recipient,
            a_amount,
            a_fee,
            a_fee_recipient,
            b_chain,
            b_asset,
            b_refund,
            b_recipient,
            b_amount,
            b_fee,
            b_fee_recipient,
        } => {
            let party_a = party_spec(
                otc_common::types::Side::A,
                &a_chain,
                &a_asset,
                &a_refund,
                &a_recipient,
                a_amount,
                a_fee,
                &a_fee_recipient,
            );
            let party_b = party_spec(
                otc_common::types::Side::B,
                &b_chain,
                &b_asset,
                &b_refund,
                &b_recipient,
                b_amount,
                b_fee,
                &b_fee_recipient,
            );
            let deal = engine.create_deal(party_a, party_b, None).await?;
            println!("{}", serde_json::to_string_pretty(&deal)?);
            Ok(())
        }
        DealCommands::Get { id } => {
            let id = parse_deal_id(&id)?;
            match engine.get_deal(id).await? {
                Some(deal) => {
                    println!("{}", serde_json::to_string_pretty(&deal)?);
                    Ok(())
                }
                None => Err(eyre::eyre!("deal {id} not found")),
            }
        }
        DealCommands::List { stage } => {
            let stage = stage.map(|s| parse_stage(&s)).transpose()?;
            let deals = engine.list_deals(stage).await?;
            println!("{}", serde_json::to_string_pretty(&deals)?);
            Ok(())
        }
        DealCommands::Cancel { id } => {
            let id = parse_deal_id(&id)?;
            engine.cancel_deal(id).await?;
            println!("deal {id} cancelled");
            Ok(())
        }
    }
}

/// `broker admin ...`
pub async fn admin_command(config: Config, cmd: AdminCommands) -> Result<()> {
    let store = Store::connect(&config.database_url).await.wrap_err("connecting to store")?;
    let registry = wiring::build_registry(&config).await.wrap_err("building chain registry")?;
    let engine =
        DealEngine::new(store, registry, config.engine_tick_interval, config.default_deal_deadline);

    match cmd {
        AdminCommands::SpendFromEscrow { deal_id, side, to, amount } => {
            let id = parse_deal_id(&deal_id)?;
            let side = parse_side(&side)?;
            let tx_id = engine.admin_spend_from_escrow(id, side, &to, amount).await?;
            println!("submitted: {tx_id}");
            Ok(())
        }
    }
}
