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

//! The Deal Engine (spec §4.2), the Gas Reimbursement Calculator (§4.6) and
//! the Txid Resolver / Vesting Tracer (§4.7). These three components all act
//! on persisted state between Queue Dispatcher ticks, so they share one
//! crate rather than three: each reads [`otc_store::Store`] and the
//! [`otc_chain_plugin::ChainRegistry`] and writes back queue items or deal
//! stage changes.

pub mod deal_engine;
pub mod gas_reimbursement;
pub mod txid_resolver;
pub mod vesting_tracer;

pub use deal_engine::DealEngine;
pub use txid_resolver::TxidResolver;
pub use vesting_tracer::VestingTracer;
