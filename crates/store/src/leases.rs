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

//! The `leases` table (spec §3 Lease, spec §4.4 "the Recovery Manager only
//! runs while holding the `RECOVERY_GLOBAL` lease"). One row per lease type;
//! acquisition is a single conditional upsert so two processes racing to
//! acquire the same lease never both succeed.

use chrono::{DateTime, Utc};
use otc_common::error::BrokerResult;
use otc_common::types::Lease;
use sqlx::{Executor, FromRow, Postgres};

#[derive(FromRow)]
struct LeaseRow {
    lease_type: String,
    holder_id: String,
    expires_at: DateTime<Utc>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Lease {
            lease_type: row.lease_type,
            holder_id: row.holder_id,
            expires_at: row.expires_at,
        }
    }
}

/// Attempt to acquire `lease_type` for `holder_id` until `expires_at`.
/// Succeeds if the row doesn't exist yet, or exists but has already expired;
/// returns `true` iff this call is now the holder.
pub async fn try_acquire<'e, E>(
    executor: E,
    lease_type: &str,
    holder_id: &str,
    expires_at: DateTime<Utc>,
) -> BrokerResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "INSERT INTO leases (lease_type, holder_id, expires_at) VALUES ($1, $2, $3)
         ON CONFLICT (lease_type) DO UPDATE
            SET holder_id = EXCLUDED.holder_id, expires_at = EXCLUDED.expires_at
         WHERE leases.expires_at < now() OR leases.holder_id = EXCLUDED.holder_id",
    )
    .bind(lease_type)
    .bind(holder_id)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Extend a lease this holder already owns. No-op (returns `false`) if the
/// holder no longer matches, e.g. it expired and was stolen.
pub async fn renew<'e, E>(
    executor: E,
    lease_type: &str,
    holder_id: &str,
    expires_at: DateTime<Utc>,
) -> BrokerResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "UPDATE leases SET expires_at = $3 WHERE lease_type = $1 AND holder_id = $2",
    )
    .bind(lease_type)
    .bind(holder_id)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Release a lease this holder owns, allowing immediate re-acquisition by
/// anyone rather than waiting for `expires_at`.
pub async fn release<'e, E>(executor: E, lease_type: &str, holder_id: &str) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM leases WHERE lease_type = $1 AND holder_id = $2")
        .bind(lease_type)
        .bind(holder_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Fetch the current holder of `lease_type`, if any.
pub async fn get<'e, E>(executor: E, lease_type: &str) -> BrokerResult<Option<Lease>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<LeaseRow> = sqlx::query_as("SELECT * FROM leases WHERE lease_type = $1")
        .bind(lease_type)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(Lease::from))
}
