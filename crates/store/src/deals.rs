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

//! The `deals` table: a JSON document (the full [`Deal`]) plus indexed
//! `stage`/`created_at` columns for the Deal Engine's tick query (spec §6).

use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{Deal, DealId, Stage};
use sqlx::{Executor, Postgres};

/// Insert a brand-new deal. Fails if `deal.id` already exists.
pub async fn insert<'e, E>(executor: E, deal: &Deal) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let body = serde_json::to_value(deal)
        .map_err(|e| BrokerError::Plugin(format!("serialize deal: {e}")))?;
    sqlx::query(
        "INSERT INTO deals (id, stage, body, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(deal.id.0)
    .bind(deal.stage.to_string())
    .bind(body)
    .bind(deal.created_at)
    .bind(deal.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Overwrite a deal's full document and stage index. Callers are expected to
/// have bumped `deal.updated_at` first.
pub async fn update<'e, E>(executor: E, deal: &Deal) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let body = serde_json::to_value(deal)
        .map_err(|e| BrokerError::Plugin(format!("serialize deal: {e}")))?;
    sqlx::query("UPDATE deals SET stage = $2, body = $3, updated_at = $4 WHERE id = $1")
        .bind(deal.id.0)
        .bind(deal.stage.to_string())
        .bind(body)
        .bind(deal.updated_at)
        .execute(executor)
        .await?;
    Ok(())
}

/// Fetch one deal by id.
pub async fn get<'e, E>(executor: E, id: DealId) -> BrokerResult<Option<Deal>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT body FROM deals WHERE id = $1")
            .bind(id.0)
            .fetch_optional(executor)
            .await?;
    row.map(|(body,)| {
        serde_json::from_value(body).map_err(|e| BrokerError::Plugin(format!("deserialize deal: {e}")))
    })
    .transpose()
}

/// List every deal, optionally filtered to a single stage.
pub async fn list<'e, E>(executor: E, stage: Option<Stage>) -> BrokerResult<Vec<Deal>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(serde_json::Value,)> = match stage {
        Some(stage) => {
            sqlx::query_as("SELECT body FROM deals WHERE stage = $1 ORDER BY created_at ASC")
                .bind(stage.to_string())
                .fetch_all(executor)
                .await?
        }
        None => {
            sqlx::query_as("SELECT body FROM deals ORDER BY created_at ASC")
                .fetch_all(executor)
                .await?
        }
    };
    rows.into_iter()
        .map(|(body,)| {
            serde_json::from_value(body)
                .map_err(|e| BrokerError::Plugin(format!("deserialize deal: {e}")))
        })
        .collect()
}

/// List every deal not yet in a terminal stage (CLOSED/REVERTED), the set
/// the Deal Engine's tick iterates (spec §4.2).
pub async fn list_non_terminal<'e, E>(executor: E) -> BrokerResult<Vec<Deal>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
        "SELECT body FROM deals WHERE stage NOT IN ('CLOSED', 'REVERTED') ORDER BY created_at ASC",
    )
    .fetch_all(executor)
    .await?;
    rows.into_iter()
        .map(|(body,)| {
            serde_json::from_value(body)
                .map_err(|e| BrokerError::Plugin(format!("deserialize deal: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // Exercised against a real Postgres instance in `tests/deals.rs` via
    // `sqlx::test`; this module intentionally carries no mock-based unit
    // tests since every operation here is a thin, one-statement query.
}
