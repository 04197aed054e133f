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

//! The `gas_refunds` table (spec §3 GasRefund, spec §4.5 "Gas-funding
//! path"). A [`GasRefund`] row and its linked [`otc_common::types::QueueItem`]
//! (when not SKIPPED) are always created together inside one transaction via
//! [`crate::Store::begin`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{ChainId, DealId, GasRefund, GasRefundStatus};
use rust_decimal::Decimal;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

#[derive(FromRow)]
struct GasRefundRow {
    id: Uuid,
    deal_id: Uuid,
    chain: String,
    escrow_address: String,
    approval_tx_hash: String,
    refund_amount: String,
    status: String,
    linked_queue_item_id: Option<Uuid>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

fn status_str(status: GasRefundStatus) -> &'static str {
    match status {
        GasRefundStatus::Queued => "queued",
        GasRefundStatus::Submitted => "submitted",
        GasRefundStatus::Confirmed => "confirmed",
        GasRefundStatus::Skipped => "skipped",
    }
}

fn parse_status(s: &str) -> BrokerResult<GasRefundStatus> {
    Ok(match s {
        "queued" => GasRefundStatus::Queued,
        "submitted" => GasRefundStatus::Submitted,
        "confirmed" => GasRefundStatus::Confirmed,
        "skipped" => GasRefundStatus::Skipped,
        other => return Err(BrokerError::Plugin(format!("unknown gas refund status {other}"))),
    })
}

impl TryFrom<GasRefundRow> for GasRefund {
    type Error = BrokerError;

    fn try_from(row: GasRefundRow) -> Result<Self, Self::Error> {
        Ok(GasRefund {
            id: row.id,
            deal_id: DealId(row.deal_id),
            chain: ChainId::new(row.chain),
            escrow_address: row.escrow_address,
            approval_tx_hash: row.approval_tx_hash,
            refund_amount: Decimal::from_str(&row.refund_amount)
                .map_err(|e| BrokerError::Plugin(format!("parse refund amount: {e}")))?,
            status: parse_status(&row.status)?,
            linked_queue_item_id: row.linked_queue_item_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Insert a new gas refund row. `(chain, approval_tx_hash)` is unique so the
/// recovery manager's funding pass never double-books a refund for the same
/// approval transaction.
pub async fn insert<'e, E>(executor: E, refund: &GasRefund) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO gas_refunds
         (id, deal_id, chain, escrow_address, approval_tx_hash, refund_amount, status,
          linked_queue_item_id, metadata, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (chain, approval_tx_hash) DO NOTHING",
    )
    .bind(refund.id)
    .bind(refund.deal_id.0)
    .bind(refund.chain.0.clone())
    .bind(&refund.escrow_address)
    .bind(&refund.approval_tx_hash)
    .bind(refund.refund_amount.to_string())
    .bind(status_str(refund.status))
    .bind(refund.linked_queue_item_id)
    .bind(&refund.metadata)
    .bind(refund.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Advance a refund's status as its linked queue item is submitted/confirmed.
pub async fn update_status<'e, E>(
    executor: E,
    id: Uuid,
    status: GasRefundStatus,
) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE gas_refunds SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status_str(status))
        .execute(executor)
        .await?;
    Ok(())
}

/// The gas refund linked to a given queue item, if any (used by the
/// dispatcher to advance `status` alongside the queue item's own status).
pub async fn get_by_linked_queue_item<'e, E>(
    executor: E,
    queue_item_id: Uuid,
) -> BrokerResult<Option<GasRefund>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<GasRefundRow> =
        sqlx::query_as("SELECT * FROM gas_refunds WHERE linked_queue_item_id = $1")
            .bind(queue_item_id)
            .fetch_optional(executor)
            .await?;
    row.map(GasRefund::try_from).transpose()
}

/// All gas refunds recorded for a deal, newest first.
pub async fn list_for_deal<'e, E>(executor: E, deal_id: DealId) -> BrokerResult<Vec<GasRefund>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<GasRefundRow> = sqlx::query_as(
        "SELECT * FROM gas_refunds WHERE deal_id = $1 ORDER BY created_at DESC",
    )
    .bind(deal_id.0)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(GasRefund::try_from).collect()
}
