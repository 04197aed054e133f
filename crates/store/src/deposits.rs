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

//! The `escrow_deposits` table (spec §3 DepositRecord).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{ChainId, DepositRecord, ResolutionStatus};
use rust_decimal::Decimal;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

#[derive(FromRow)]
struct DepositRow {
    id: Uuid,
    deal_id: Uuid,
    chain: String,
    escrow_address: String,
    asset: String,
    tx_id: String,
    original_tx_id: Option<String>,
    amount: String,
    block_height: i64,
    confirmations_last_seen: i64,
    synthetic: bool,
    resolution_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DepositRow> for DepositRecord {
    type Error = BrokerError;

    fn try_from(row: DepositRow) -> Result<Self, Self::Error> {
        Ok(DepositRecord {
            id: row.id,
            deal_id: otc_common::types::DealId(row.deal_id),
            chain: ChainId::new(row.chain),
            escrow_address: row.escrow_address,
            asset: row.asset,
            tx_id: row.tx_id,
            original_tx_id: row.original_tx_id,
            amount: Decimal::from_str(&row.amount)
                .map_err(|e| BrokerError::Plugin(format!("parse deposit amount: {e}")))?,
            block_height: row.block_height as u64,
            confirmations_last_seen: row.confirmations_last_seen as u64,
            synthetic: row.synthetic,
            resolution_status: parse_resolution_status(&row.resolution_status),
            created_at: row.created_at,
        })
    }
}

fn resolution_status_str(status: ResolutionStatus) -> &'static str {
    match status {
        ResolutionStatus::NotApplicable => "not_applicable",
        ResolutionStatus::Pending => "pending",
        ResolutionStatus::Resolved => "resolved",
        ResolutionStatus::Failed => "failed",
    }
}

fn parse_resolution_status(s: &str) -> ResolutionStatus {
    match s {
        "pending" => ResolutionStatus::Pending,
        "resolved" => ResolutionStatus::Resolved,
        "failed" => ResolutionStatus::Failed,
        _ => ResolutionStatus::NotApplicable,
    }
}

/// Insert a freshly-observed deposit. `tx_id`+`chain` is unique; a second
/// observation of the same transfer is a caller bug, not a recoverable race,
/// since plugins only ever append new deposits (spec §3 "never deleted").
pub async fn insert<'e, E>(executor: E, deposit: &DepositRecord) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO escrow_deposits
         (id, deal_id, chain, escrow_address, asset, tx_id, original_tx_id, amount,
          block_height, confirmations_last_seen, synthetic, resolution_status, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (chain, tx_id) DO NOTHING",
    )
    .bind(deposit.id)
    .bind(deposit.deal_id.0)
    .bind(deposit.chain.0.clone())
    .bind(&deposit.escrow_address)
    .bind(&deposit.asset)
    .bind(&deposit.tx_id)
    .bind(&deposit.original_tx_id)
    .bind(deposit.amount.to_string())
    .bind(deposit.block_height as i64)
    .bind(deposit.confirmations_last_seen as i64)
    .bind(deposit.synthetic)
    .bind(resolution_status_str(deposit.resolution_status))
    .bind(deposit.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Update a deposit's observed confirmations (monotonic until the fork
/// horizon, per spec §3's invariant).
pub async fn update_confirmations<'e, E>(
    executor: E,
    id: Uuid,
    confirmations: u64,
) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE escrow_deposits SET confirmations_last_seen = $2 WHERE id = $1")
        .bind(id)
        .bind(confirmations as i64)
        .execute(executor)
        .await?;
    Ok(())
}

/// Resolve a synthetic deposit to a real transaction hash, preserving the
/// original synthetic id (spec §8 round-trip law).
pub async fn resolve_synthetic<'e, E>(
    executor: E,
    id: Uuid,
    real_tx_id: &str,
    status: ResolutionStatus,
) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE escrow_deposits
         SET original_tx_id = COALESCE(original_tx_id, tx_id), tx_id = $2, resolution_status = $3
         WHERE id = $1",
    )
    .bind(id)
    .bind(real_tx_id)
    .bind(resolution_status_str(status))
    .execute(executor)
    .await?;
    Ok(())
}

/// Mark a synthetic deposit's resolution as exhausted/failed without
/// changing its txid (spec §3 "after the limit, they are marked failed").
pub async fn mark_resolution_failed<'e, E>(executor: E, id: Uuid) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE escrow_deposits SET resolution_status = 'failed' WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// All deposits recorded for `deal_id`, across both sides and every chain.
pub async fn list_for_deal<'e, E>(
    executor: E,
    deal_id: otc_common::types::DealId,
) -> BrokerResult<Vec<DepositRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<DepositRow> =
        sqlx::query_as("SELECT * FROM escrow_deposits WHERE deal_id = $1 ORDER BY created_at ASC")
            .bind(deal_id.0)
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(DepositRecord::try_from).collect()
}

/// Every synthetic deposit still pending resolution, for the txid resolver's sweep.
pub async fn list_pending_resolution<'e, E>(executor: E) -> BrokerResult<Vec<DepositRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<DepositRow> = sqlx::query_as(
        "SELECT * FROM escrow_deposits WHERE synthetic = TRUE AND resolution_status = 'pending'
         ORDER BY created_at ASC",
    )
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(DepositRecord::try_from).collect()
}
