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

//! The `recovery_log` table (spec §3 RecoveryLogEntry): an append-only audit
//! trail of every action the Recovery Manager takes. Rows are never updated
//! or deleted.

use chrono::{DateTime, Utc};
use otc_common::error::BrokerResult;
use otc_common::types::{ChainId, RecoveryLogEntry};
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

#[derive(FromRow)]
struct RecoveryLogRow {
    id: Uuid,
    entry_type: String,
    chain: Option<String>,
    action: String,
    success: bool,
    error: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<RecoveryLogRow> for RecoveryLogEntry {
    fn from(row: RecoveryLogRow) -> Self {
        RecoveryLogEntry {
            id: row.id,
            entry_type: row.entry_type,
            chain: row.chain.map(ChainId::new),
            action: row.action,
            success: row.success,
            error: row.error,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

/// Append one entry to the log.
pub async fn insert<'e, E>(executor: E, entry: &RecoveryLogEntry) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO recovery_log (id, entry_type, chain, action, success, error, metadata, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id)
    .bind(&entry.entry_type)
    .bind(entry.chain.as_ref().map(|c| c.0.clone()))
    .bind(&entry.action)
    .bind(entry.success)
    .bind(&entry.error)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// The most recent `limit` entries, newest first, for the `broker admin`
/// surface and operator diagnostics.
pub async fn list_recent<'e, E>(executor: E, limit: i64) -> BrokerResult<Vec<RecoveryLogEntry>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<RecoveryLogRow> =
        sqlx::query_as("SELECT * FROM recovery_log ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(executor)
            .await?;
    Ok(rows.into_iter().map(RecoveryLogEntry::from).collect())
}
