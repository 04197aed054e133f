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

//! Postgres persistence for the OTC broker engine (spec §6 "Persistence
//! layout"). This is the single source of truth every other crate reads
//! from and writes to; no component keeps its own in-memory copy of deal,
//! queue or recovery state across ticks.
//!
//! Every entity in [`otc_common::types`] maps to one table here. Multi-row
//! writes that must be atomic (a deal's stage change plus the queue items
//! it spawns; a [`otc_common::types::GasRefund`] plus its linked queue item)
//! go through a single [`sqlx::Transaction`], exposed as [`Store::begin`].

pub mod deals;
pub mod deposits;
pub mod gas_refunds;
pub mod leases;
pub mod queue;
pub mod recovery_log;
pub mod txid_resolutions;
pub mod vesting;

use otc_common::error::{BrokerError, BrokerResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

/// A handle to the Postgres connection pool backing every repository module.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

/// A transaction borrowed from the [`Store`]'s pool, for atomic multi-row writes.
pub type StoreTx<'a> = Transaction<'a, Postgres>;

impl Store {
    /// Connect to `database_url` and verify connectivity with a single ping.
    pub async fn connect(database_url: &str) -> BrokerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations (spec §6's table set, `migrations/0001_init.sql`).
    pub async fn migrate(&self) -> BrokerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BrokerError::Plugin(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Wrap an already-connected, already-migrated pool, e.g. one handed to
    /// an integration test by `sqlx::test`. Production code should prefer
    /// [`Store::connect`], which also runs migrations.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool, for repository modules and tests.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction for an atomic multi-row write.
    pub async fn begin(&self) -> BrokerResult<StoreTx<'_>> {
        Ok(self.pool.begin().await?)
    }
}
