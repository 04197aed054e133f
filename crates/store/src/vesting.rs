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

//! The `vesting_cache` table (spec §3 VestingCacheEntry, spec §4.7 "Vesting
//! Tracer"). Coinbase ancestry is expensive to re-walk, so every traced
//! txid is cached keyed by its own id, regardless of which deposit asked
//! for it.

use chrono::{DateTime, Utc};
use otc_common::error::BrokerResult;
use otc_common::types::{VestingCacheEntry, VestingStatus};
use sqlx::{Executor, FromRow, Postgres};

#[derive(FromRow)]
struct VestingRow {
    txid: String,
    is_coinbase: bool,
    coinbase_block_height: Option<i64>,
    parent_txid: Option<String>,
    vesting_status: String,
    traced_at: DateTime<Utc>,
    error_message: Option<String>,
}

fn status_str(status: VestingStatus) -> &'static str {
    match status {
        VestingStatus::Vested => "vested",
        VestingStatus::Unvested => "unvested",
        VestingStatus::Pending => "pending",
        VestingStatus::Unknown => "unknown",
        VestingStatus::TracingFailed => "tracing_failed",
    }
}

fn parse_status(s: &str) -> VestingStatus {
    match s {
        "vested" => VestingStatus::Vested,
        "unvested" => VestingStatus::Unvested,
        "pending" => VestingStatus::Pending,
        "tracing_failed" => VestingStatus::TracingFailed,
        _ => VestingStatus::Unknown,
    }
}

impl From<VestingRow> for VestingCacheEntry {
    fn from(row: VestingRow) -> Self {
        VestingCacheEntry {
            txid: row.txid,
            is_coinbase: row.is_coinbase,
            coinbase_block_height: row.coinbase_block_height.map(|h| h as u64),
            parent_txid: row.parent_txid,
            vesting_status: parse_status(&row.vesting_status),
            traced_at: row.traced_at,
            error_message: row.error_message,
        }
    }
}

/// Insert or overwrite a cache entry for `entry.txid` (re-tracing replaces
/// the previous classification outright).
pub async fn upsert<'e, E>(executor: E, entry: &VestingCacheEntry) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO vesting_cache
         (txid, is_coinbase, coinbase_block_height, parent_txid, vesting_status, traced_at, error_message)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (txid) DO UPDATE SET
            is_coinbase = EXCLUDED.is_coinbase,
            coinbase_block_height = EXCLUDED.coinbase_block_height,
            parent_txid = EXCLUDED.parent_txid,
            vesting_status = EXCLUDED.vesting_status,
            traced_at = EXCLUDED.traced_at,
            error_message = EXCLUDED.error_message",
    )
    .bind(&entry.txid)
    .bind(entry.is_coinbase)
    .bind(entry.coinbase_block_height.map(|h| h as i64))
    .bind(&entry.parent_txid)
    .bind(status_str(entry.vesting_status))
    .bind(entry.traced_at)
    .bind(&entry.error_message)
    .execute(executor)
    .await?;
    Ok(())
}

/// Look up a previously-traced txid.
pub async fn get<'e, E>(executor: E, txid: &str) -> BrokerResult<Option<VestingCacheEntry>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<VestingRow> = sqlx::query_as("SELECT * FROM vesting_cache WHERE txid = $1")
        .bind(txid)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(VestingCacheEntry::from))
}
