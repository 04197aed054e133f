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

//! Builder helpers for constructing [`PartySpec`] values in tests, cutting
//! down the boilerplate of spelling out every field for a two-sided deal.

use otc_common::types::{ChainId, PartySpec, Side};
use rust_decimal::Decimal;

/// A `PartySpec` for `side` on `chain`, trading `amount` of `asset`, with the
/// refund and recipient addresses defaulted from `side`/`chain` so callers
/// only need to override what the scenario actually cares about.
pub fn party_spec(side: Side, chain: &str, asset: &str, amount: Decimal) -> PartySpec {
    PartySpec {
        side,
        chain: ChainId::new(chain),
        asset: asset.to_string(),
        refund_address: format!("{chain}-refund-{side}"),
        recipient_address: format!("{chain}-recipient-{side}"),
        expected_amount: amount,
        fee_amount: Decimal::ZERO,
        fee_recipient: format!("{chain}-fee-recipient"),
        escrow: None,
        funded: false,
    }
}

/// Same as [`party_spec`] but with a non-zero protocol fee, for gas
/// reimbursement and fee-accounting scenarios.
pub fn party_spec_with_fee(
    side: Side,
    chain: &str,
    asset: &str,
    amount: Decimal,
    fee_amount: Decimal,
) -> PartySpec {
    let mut spec = party_spec(side, chain, asset, amount);
    spec.fee_amount = fee_amount;
    spec
}
