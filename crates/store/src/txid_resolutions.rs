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

//! The `txid_resolutions` table (spec §3 TxidResolution): one audit row per
//! synthetic-deposit resolution attempt, successful or not, so an operator
//! can see why a deposit is still unresolved.

use chrono::{DateTime, Utc};
use otc_common::error::BrokerResult;
use otc_common::types::TxidResolution;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

#[derive(FromRow)]
struct TxidResolutionRow {
    id: Uuid,
    deposit_id: Uuid,
    window_from_block: i64,
    window_to_block: i64,
    candidates_considered: i32,
    confidence: f64,
    chosen_tx_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TxidResolutionRow> for TxidResolution {
    fn from(row: TxidResolutionRow) -> Self {
        TxidResolution {
            id: row.id,
            deposit_id: row.deposit_id,
            window_from_block: row.window_from_block as u64,
            window_to_block: row.window_to_block as u64,
            candidates_considered: row.candidates_considered as u32,
            confidence: row.confidence,
            chosen_tx_hash: row.chosen_tx_hash,
            created_at: row.created_at,
        }
    }
}

/// Append one resolution attempt row.
pub async fn insert<'e, E>(executor: E, resolution: &TxidResolution) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO txid_resolutions
         (id, deposit_id, window_from_block, window_to_block, candidates_considered,
          confidence, chosen_tx_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(resolution.id)
    .bind(resolution.deposit_id)
    .bind(resolution.window_from_block as i64)
    .bind(resolution.window_to_block as i64)
    .bind(resolution.candidates_considered as i32)
    .bind(resolution.confidence)
    .bind(&resolution.chosen_tx_hash)
    .bind(resolution.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Every resolution attempt made for a given deposit, oldest first, for
/// operator diagnostics on a still-unresolved synthetic deposit.
pub async fn list_for_deposit<'e, E>(
    executor: E,
    deposit_id: Uuid,
) -> BrokerResult<Vec<TxidResolution>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<TxidResolutionRow> = sqlx::query_as(
        "SELECT * FROM txid_resolutions WHERE deposit_id = $1 ORDER BY created_at ASC",
    )
    .bind(deposit_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(TxidResolution::from).collect())
}
