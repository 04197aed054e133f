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

//! The [`ChainPlugin`] capability interface (spec §4.1) and its
//! implementations.
//!
//! Every chain the engine supports is accessed exclusively through this
//! trait; the Deal Engine, Queue Dispatcher and Recovery Manager never know
//! whether they are talking to an EVM chain via `alloy` or a UTXO chain via
//! balance probes. Add a chain by implementing [`ChainPlugin`] and
//! registering it in a [`registry::ChainRegistry`].

pub mod abi;
pub mod evm;
pub mod pool;
pub mod registry;
pub mod trait_;
pub mod utxo;

pub use otc_common::BrokerResult;
pub use registry::ChainRegistry;
pub use trait_::{ChainPlugin, ConfirmedDeposits, SubmitOutcome, TransferEvent};
pub use utxo::VestingSource;
