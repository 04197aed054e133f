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

//! `broker` - the OTC cross-chain swap broker engine daemon.
//!
//! Drives the Deal Engine, Queue Dispatcher and Recovery Manager loops
//! against a Postgres store and a registry of chain plugins. The RPC/HTTP
//! surface in front of this process is an outer collaborator (spec §1); this
//! binary only exposes `deal`/`admin` subcommands as thin local wrappers for
//! operators and test harnesses.

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use otc_common::config::Config;
use otc_common::types::{ChainId, DealId, PartySpec, Side, Stage};
use rust_decimal::Decimal;
use std::str::FromStr;

mod cmd;
mod wiring;

/// Command-line interface for the OTC broker engine.
#[derive(Debug, Parser)]
#[command(name = "broker")]
#[command(about = "OTC cross-chain swap broker engine")]
#[command(version)]
pub struct Cli {
    /// Chain ids to load configuration for (comma-separated), e.g. `eth,polygon,btc`.
    #[arg(long, env = "BROKER_CHAINS", value_delimiter = ',')]
    pub chains: Vec<String>,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the engine, dispatcher, recovery loop and chain observers until
    /// SIGINT/SIGTERM (spec §6).
    Run,
    /// Deal lifecycle operations (spec §6 RPC surface, exposed locally).
    #[command(subcommand)]
    Deal(DealCommands),
    /// Administrative operations.
    #[command(subcommand)]
    Admin(AdminCommands),
}

/// `broker deal ...`
#[derive(Debug, Subcommand)]
pub enum DealCommands {
    /// Create a new deal in DRAFT.
    Create {
        /// Side A chain id.
        #[arg(long)]
        a_chain: String,
        /// Side A asset symbol/contract address.
        #[arg(long)]
        a_asset: String,
        /// Side A refund (payback) address.
        #[arg(long)]
        a_refund: String,
        /// Side A settlement recipient address.
        #[arg(long)]
        a_recipient: String,
        /// Side A expected deposit amount.
        #[arg(long)]
        a_amount: Decimal,
        /// Side A protocol fee amount.
        #[arg(long, default_value = "0")]
        a_fee: Decimal,
        /// Side A protocol fee recipient address.
        #[arg(long)]
        a_fee_recipient: String,
        /// Side B chain id.
        #[arg(long)]
        b_chain: String,
        /// Side B asset symbol/contract address.
        #[arg(long)]
        b_asset: String,
        /// Side B refund (payback) address.
        #[arg(long)]
        b_refund: String,
        /// Side B settlement recipient address.
        #[arg(long)]
        b_recipient: String,
        /// Side B expected deposit amount.
        #[arg(long)]
        b_amount: Decimal,
        /// Side B protocol fee amount.
        #[arg(long, default_value = "0")]
        b_fee: Decimal,
        /// Side B protocol fee recipient address.
        #[arg(long)]
        b_fee_recipient: String,
    },
    /// Fetch a deal by id.
    Get {
        /// Deal id (UUID).
        id: String,
    },
    /// List deals, optionally filtered to one stage.
    List {
        /// Stage filter, e.g. `COLLECTION`.
        #[arg(long)]
        stage: Option<String>,
    },
    /// Cancel a deal (spec §6 "cancel-deal").
    Cancel {
        /// Deal id (UUID).
        id: String,
    },
}

/// `broker admin ...`
#[derive(Debug, Subcommand)]
pub enum AdminCommands {
    /// Spend from a deal's escrow to an arbitrary address. Rejected during
    /// SWAP (spec §6).
    SpendFromEscrow {
        /// Deal id (UUID).
        #[arg(long)]
        deal_id: String,
        /// Which side's escrow to spend from (`a` or `b`).
        #[arg(long)]
        side: String,
        /// Destination address.
        #[arg(long)]
        to: String,
        /// Amount to spend.
        #[arg(long)]
        amount: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    otc_common::logging::init_logging("broker")?;

    let cli = Cli::parse();

    let result = run(cli).await;
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let chain_ids: Vec<&str> = cli.chains.iter().map(String::as_str).collect();
    let config = Config::from_env(&chain_ids).wrap_err("loading configuration")?;

    match cli.command {
        Commands::Run => cmd::run_daemon(config).await,
        Commands::Deal(deal_cmd) => cmd::deal_command(config, deal_cmd).await,
        Commands::Admin(admin_cmd) => cmd::admin_command(config, admin_cmd).await,
    }
}

/// Parse a `"a"`/`"b"` CLI argument into a [`Side`].
pub(crate) fn parse_side(s: &str) -> Result<Side> {
    match s.to_ascii_lowercase().as_str() {
        "a" => Ok(Side::A),
        "b" => Ok(Side::B),
        other => Err(eyre::eyre!("invalid side {other:?}, expected \"a\" or \"b\"")),
    }
}

/// Build a [`PartySpec`] in DRAFT (unfunded, unapproved) from CLI fields.
#[allow(clippy::too_many_arguments)]
pub(crate) fn party_spec(
    side: Side,
    chain: &str,
    asset: &str,
    refund: &str,
    recipient: &str,
    amount: Decimal,
    fee: Decimal,
    fee_recipient: &str,
) -> PartySpec {
    PartySpec {
        side,
        chain: ChainId::new(chain),
        asset: asset.to_string(),
        refund_address: refund.to_string(),
        recipient_address: recipient.to_string(),
        expected_amount: amount,
        fee_amount: fee,
        fee_recipient: fee_recipient.to_string(),
        escrow: None,
        funded: false,
    }
}

pub(crate) fn parse_deal_id(s: &str) -> Result<DealId> {
    Ok(DealId(uuid::Uuid::from_str(s).wrap_err("invalid deal id")?))
}

pub(crate) fn parse_stage(s: &str) -> Result<Stage> {
    match s.to_ascii_uppercase().as_str() {
        "DRAFT" => Ok(Stage::Draft),
        "COLLECTION" => Ok(Stage::Collection),
        "READY" => Ok(Stage::Ready),
        "SWAP" => Ok(Stage::Swap),
        "PAYOUT" => Ok(Stage::Payout),
        "CLOSED" => Ok(Stage::Closed),
        "REVERTED" => Ok(Stage::Reverted),
        other => Err(eyre::eyre!("unknown stage {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_side_accepts_either_case() {
        assert!(matches!(parse_side("A").unwrap(), Side::A));
        assert!(matches!(parse_side("b").unwrap(), Side::B));
        assert!(parse_side("c").is_err());
    }

    #[test]
    fn parse_stage_round_trips_display() {
        for stage in [
            Stage::Draft,
            Stage::Collection,
            Stage::Ready,
            Stage::Swap,
            Stage::Payout,
            Stage::Closed,
            Stage::Reverted,
        ] {
            assert_eq!(parse_stage(&stage.to_string()).unwrap(), stage);
        }
    }
}
