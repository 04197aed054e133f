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

//! The Queue Dispatcher (spec §4.3): drains per-(deal, chain) `seq`-ordered
//! queue items through their plugin, respecting submission order and
//! bumping gas on a stall.

pub mod dispatcher;

pub use dispatcher::QueueDispatcher;
