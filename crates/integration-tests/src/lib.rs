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

//! Test-only harness shared by this crate's `tests/` binaries: a mock
//! [`otc_chain_plugin::trait_::ChainPlugin`] and deal/party builder helpers.
//! Nothing here is exercised by production code.

pub mod fixtures;
pub mod mock_plugin;

pub use mock_plugin::MockChainPlugin;
