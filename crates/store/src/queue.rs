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

//! The `queue_items` table (spec §3 QueueItem), owned by the Queue
//! Dispatcher but created by the Deal Engine and read by the Recovery
//! Manager.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{ChainId, DealId, QueueItem, QueueItemPurpose, QueueItemStatus};
use rust_decimal::Decimal;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

#[derive(FromRow)]
struct QueueRow {
    id: Uuid,
    deal_id: Uuid,
    chain: String,
    from_addr: String,
    to_addr: String,
    asset: String,
    amount: String,
    purpose: String,
    seq: i64,
    status: String,
    submitted_tx: Option<String>,
    created_at: DateTime<Utc>,
    phase: String,
    gas_bump_attempts: i32,
    last_gas_price: Option<String>,
    original_nonce: Option<i64>,
    last_submit_at: Option<DateTime<Utc>>,
    recovery_attempts: i32,
    last_recovery_at: Option<DateTime<Utc>>,
    recovery_error: Option<String>,
    payback: Option<String>,
    recipient: Option<String>,
    fee_recipient: Option<String>,
    fees: Option<String>,
    gas_used: Option<i64>,
}

fn purpose_str(p: QueueItemPurpose) -> &'static str {
    match p {
        QueueItemPurpose::ApproveBroker => "APPROVE_BROKER",
        QueueItemPurpose::BrokerSwap => "BROKER_SWAP",
        QueueItemPurpose::BrokerRevert => "BROKER_REVERT",
        QueueItemPurpose::BrokerRefund => "BROKER_REFUND",
        QueueItemPurpose::Phase1Swap => "PHASE_1_SWAP",
        QueueItemPurpose::SurplusRefund => "SURPLUS_REFUND",
        QueueItemPurpose::GasFunding => "GAS_FUNDING",
        QueueItemPurpose::GasRefundToTank => "GAS_REFUND_TO_TANK",
    }
}

fn parse_purpose(s: &str) -> BrokerResult<QueueItemPurpose> {
    Ok(match s {
        "APPROVE_BROKER" => QueueItemPurpose::ApproveBroker,
        "BROKER_SWAP" => QueueItemPurpose::BrokerSwap,
        "BROKER_REVERT" => QueueItemPurpose::BrokerRevert,
        "BROKER_REFUND" => QueueItemPurpose::BrokerRefund,
        "PHASE_1_SWAP" => QueueItemPurpose::Phase1Swap,
        "SURPLUS_REFUND" => QueueItemPurpose::SurplusRefund,
        "GAS_FUNDING" => QueueItemPurpose::GasFunding,
        "GAS_REFUND_TO_TANK" => QueueItemPurpose::GasRefundToTank,
        other => return Err(BrokerError::Plugin(format!("unknown queue item purpose {other}"))),
    })
}

fn status_str(s: QueueItemStatus) -> &'static str {
    match s {
        QueueItemStatus::Pending => "PENDING",
        QueueItemStatus::Submitted => "SUBMITTED",
        QueueItemStatus::Confirmed => "CONFIRMED",
        QueueItemStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> BrokerResult<QueueItemStatus> {
    Ok(match s {
        "PENDING" => QueueItemStatus::Pending,
        "SUBMITTED" => QueueItemStatus::Submitted,
        "CONFIRMED" => QueueItemStatus::Confirmed,
        "FAILED" => QueueItemStatus::Failed,
        other => return Err(BrokerError::Plugin(format!("unknown queue item status {other}"))),
    })
}

fn parse_decimal(s: &str, what: &str) -> BrokerResult<Decimal> {
    Decimal::from_str(s).map_err(|e| BrokerError::Plugin(format!("parse {what}: {e}")))
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = BrokerError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            id: row.id,
            deal_id: DealId(row.deal_id),
            chain: ChainId::new(row.chain),
            from_addr: row.from_addr,
            to_addr: row.to_addr,
            asset: row.asset,
            amount: parse_decimal(&row.amount, "queue item amount")?,
            purpose: parse_purpose(&row.purpose)?,
            seq: row.seq,
            status: parse_status(&row.status)?,
            submitted_tx: row.submitted_tx,
            created_at: row.created_at,
            phase: row.phase,
            gas_bump_attempts: row.gas_bump_attempts as u32,
            last_gas_price: row.last_gas_price.map(|s| s.parse()).transpose()
                .map_err(|e: std::num::ParseIntError| BrokerError::Plugin(e.to_string()))?,
            original_nonce: row.original_nonce.map(|n| n as u64),
            last_submit_at: row.last_submit_at,
            recovery_attempts: row.recovery_attempts as u32,
            last_recovery_at: row.last_recovery_at,
            recovery_error: row.recovery_error,
            payback: row.payback,
            recipient: row.recipient,
            fee_recipient: row.fee_recipient,
            fees: row.fees.map(|s| parse_decimal(&s, "queue item fees")).transpose()?,
            gas_used: row.gas_used.map(|n| n as u64),
        })
    }
}

/// Insert a new queue item, created by the Deal Engine within the same
/// transaction as the stage write that required it.
pub async fn insert<'e, E>(executor: E, item: &QueueItem) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO queue_items
         (id, deal_id, chain, from_addr, to_addr, asset, amount, purpose, seq, status,
          submitted_tx, created_at, phase, gas_bump_attempts, last_gas_price, original_nonce,
          last_submit_at, recovery_attempts, last_recovery_at, recovery_error, payback,
          recipient, fee_recipient, fees, gas_used)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25)",
    )
    .bind(item.id)
    .bind(item.deal_id.0)
    .bind(item.chain.0.clone())
    .bind(&item.from_addr)
    .bind(&item.to_addr)
    .bind(&item.asset)
    .bind(item.amount.to_string())
    .bind(purpose_str(item.purpose))
    .bind(item.seq)
    .bind(status_str(item.status))
    .bind(&item.submitted_tx)
    .bind(item.created_at)
    .bind(&item.phase)
    .bind(item.gas_bump_attempts as i32)
    .bind(item.last_gas_price.map(|p| p.to_string()))
    .bind(item.original_nonce.map(|n| n as i64))
    .bind(item.last_submit_at)
    .bind(item.recovery_attempts as i32)
    .bind(item.last_recovery_at)
    .bind(&item.recovery_error)
    .bind(&item.payback)
    .bind(&item.recipient)
    .bind(&item.fee_recipient)
    .bind(item.fees.map(|f| f.to_string()))
    .bind(item.gas_used.map(|g| g as i64))
    .execute(executor)
    .await?;
    Ok(())
}

/// Overwrite every mutable field of an existing queue item (status, submission
/// bookkeeping, recovery bookkeeping). `id`/`deal_id`/`seq`/`purpose` never change.
pub async fn update<'e, E>(executor: E, item: &QueueItem) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE queue_items SET
            status = $2, submitted_tx = $3, gas_bump_attempts = $4, last_gas_price = $5,
            original_nonce = $6, last_submit_at = $7, recovery_attempts = $8,
            last_recovery_at = $9, recovery_error = $10, gas_used = $11
         WHERE id = $1",
    )
    .bind(item.id)
    .bind(status_str(item.status))
    .bind(&item.submitted_tx)
    .bind(item.gas_bump_attempts as i32)
    .bind(item.last_gas_price.map(|p| p.to_string()))
    .bind(item.original_nonce.map(|n| n as i64))
    .bind(item.last_submit_at)
    .bind(item.recovery_attempts as i32)
    .bind(item.last_recovery_at)
    .bind(&item.recovery_error)
    .bind(item.gas_used.map(|g| g as i64))
    .execute(executor)
    .await?;
    Ok(())
}

/// Delete a still-PENDING queue item (spec §4.3 cancellation: "PENDING items
/// whose purpose would only apply to a successful settlement are removed").
pub async fn delete_pending<'e, E>(executor: E, id: Uuid) -> BrokerResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM queue_items WHERE id = $1 AND status = 'PENDING'")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Every queue item for `deal_id`, ordered by chain then `seq` (the
/// dispatcher's and engine's natural iteration order).
pub async fn list_for_deal<'e, E>(executor: E, deal_id: DealId) -> BrokerResult<Vec<QueueItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<QueueRow> = sqlx::query_as(
        "SELECT * FROM queue_items WHERE deal_id = $1 ORDER BY chain ASC, seq ASC",
    )
    .bind(deal_id.0)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// Every PENDING item across all deals, for the dispatcher's selection pass
/// (spec §4.3: "Group PENDING items by (deal id, chain)").
pub async fn list_pending<'e, E>(executor: E) -> BrokerResult<Vec<QueueItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<QueueRow> = sqlx::query_as(
        "SELECT * FROM queue_items WHERE status = 'PENDING' ORDER BY deal_id, chain, seq ASC",
    )
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// Every SUBMITTED item, for the dispatcher's confirmation poll and the
/// recovery manager's suspect-submitted-item phase.
pub async fn list_submitted<'e, E>(executor: E) -> BrokerResult<Vec<QueueItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<QueueRow> =
        sqlx::query_as("SELECT * FROM queue_items WHERE status = 'SUBMITTED'")
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// PENDING items older than `older_than`, with no `submitted_tx` yet and
/// recovery attempts below `max_attempts` (spec §4.4 phase 1).
pub async fn list_stuck<'e, E>(
    executor: E,
    older_than: DateTime<Utc>,
    max_attempts: u32,
) -> BrokerResult<Vec<QueueItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<QueueRow> = sqlx::query_as(
        "SELECT * FROM queue_items
         WHERE status = 'PENDING' AND submitted_tx IS NULL
           AND created_at < $1 AND recovery_attempts < $2",
    )
    .bind(older_than)
    .bind(max_attempts as i32)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// SUBMITTED items older than `older_than` with no confirmation yet, for
/// the recovery manager's suspect-submitted-item phase (spec §4.4 phase 2).
pub async fn list_suspect_submitted<'e, E>(
    executor: E,
    older_than: DateTime<Utc>,
) -> BrokerResult<Vec<QueueItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<QueueRow> = sqlx::query_as(
        "SELECT * FROM queue_items WHERE status = 'SUBMITTED' AND last_submit_at < $1",
    )
    .bind(older_than)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(QueueItem::try_from).collect()
}
