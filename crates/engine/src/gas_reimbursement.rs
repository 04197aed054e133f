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

//! Gas Reimbursement Calculator (spec §4.6): how much of a deal's stablecoin
//! side must flow to the gas tank to cover its settlement gas spend.

use std::time::Duration;

use otc_chain_plugin::ChainPlugin;
use otc_common::types::{Deal, GasReimbursementResult, PartySpec, Side};
use rust_decimal::Decimal;
use tracing::warn;

/// Stablecoin symbols recognised for reimbursement, matched case-insensitively
/// against a party's asset field (symbol or, for a contract address, any of
/// the well-known mainnet addresses an outer collaborator's config supplies
/// under the same symbol name).
const STABLECOIN_SYMBOLS: &[&str] = &["USDT", "USDC", "DAI", "BUSD", "TUSD", "USDP"];

fn is_stablecoin(asset: &str) -> bool {
    STABLECOIN_SYMBOLS.iter().any(|s| s.eq_ignore_ascii_case(asset))
}

/// Which side, if any, pays the reimbursement: the stablecoin side, or the
/// other side if *it* is the stablecoin. Neither stable -> not supported.
fn select_paying_side(deal: &Deal) -> Option<Side> {
    if is_stablecoin(&deal.party_a.asset) {
        Some(Side::A)
    } else if is_stablecoin(&deal.party_b.asset) {
        Some(Side::B)
    } else {
        None
    }
}

fn party(deal: &Deal, side: Side) -> &PartySpec {
    deal.party(side)
}

/// Oracle retry policy: 3 attempts, exponential backoff starting at 200ms,
/// modeled on the provider health-probe backoff shape in the registry's
/// connection-retry logic.
async fn fetch_native_usd_rate(plugin: &dyn ChainPlugin) -> Option<Decimal> {
    let mut delay = Duration::from_millis(200);
    for attempt in 1..=3 {
        match plugin.quote_native_for_usd().await {
            Ok(quote) => return Some(quote.price),
            Err(e) => {
                warn!(attempt, error = %e, "native/usd oracle call failed");
                if attempt < 3 {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    None
}

/// Compute the gas reimbursement for a settled deal, or `None` if no side's
/// asset is a supported stablecoin, or the oracle is unreachable after
/// retries (spec §4.6: "reimbursement is skipped, logged, deal still
/// settles" in the oracle-failure case).
pub async fn compute(
    plugin: &dyn ChainPlugin,
    deal: &Deal,
    actual_gas_used: u64,
    gas_price_wei: u128,
) -> Option<GasReimbursementResult> {
    let paying_side = match select_paying_side(deal) {
        Some(side) => side,
        None => {
            warn!(deal_id = %deal.id, "no stablecoin side; gas reimbursement not supported for this deal");
            return None;
        }
    };

    let native_usd_rate = match fetch_native_usd_rate(plugin).await {
        Some(rate) => rate,
        None => {
            warn!(deal_id = %deal.id, "price oracle exhausted after 3 retries; skipping reimbursement");
            return None;
        }
    };

    // Stablecoins are assumed pegged to USD; no dedicated token oracle exists
    // in the plugin capability set (spec §4.1 only exposes native/USD).
    let token_usd_rate = Decimal::ONE;
    let token = party(deal, paying_side).asset.clone();

    let gas_price = match Decimal::try_from(gas_price_wei) {
        Ok(price) => price,
        Err(_) => {
            warn!(deal_id = %deal.id, gas_price_wei, "gas price too large to represent; skipping reimbursement");
            return None;
        }
    };
    let estimated_total_gas = Decimal::from(actual_gas_used) * Decimal::from(4) * Decimal::new(11, 1);
    let native_cost_wei = estimated_total_gas * gas_price;
    let wei_per_native = Decimal::from(1_000_000_000_000_000_000u64);
    let native_usd_value = (native_cost_wei / wei_per_native) * native_usd_rate;
    let raw_token_amount = (native_usd_value / token_usd_rate) * Decimal::new(105, 2);
    let token_amount = raw_token_amount.ceil();

    Some(GasReimbursementResult {
        token_amount,
        token,
        native_usd_rate,
        token_usd_rate,
        actual_gas_used,
        gas_price_wei,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stablecoin_matching_is_case_insensitive() {
        assert!(is_stablecoin("usdt"));
        assert!(is_stablecoin("USDC"));
        assert!(!is_stablecoin("ETH"));
    }

    #[test]
    fn worked_example_matches_spec_scenario_5() {
        // 180_000 gas at 50 gwei, ETH/USD = 3000, USDT/USD = 1 -> $125 ceiling.
        let actual_gas_used = 180_000u64;
        let gas_price_wei = 50_000_000_000u128; // 50 gwei
        let native_usd_rate = Decimal::from(3000);
        let token_usd_rate = Decimal::ONE;

        let estimated_total_gas =
            Decimal::from(actual_gas_used) * Decimal::from(4) * Decimal::new(11, 1);
        let native_cost_wei = estimated_total_gas * Decimal::try_from(gas_price_wei).unwrap();
        let wei_per_native = Decimal::from(1_000_000_000_000_000_000u64);
        let native_usd_value = (native_cost_wei / wei_per_native) * native_usd_rate;
        let token_amount = ((native_usd_value / token_usd_rate) * Decimal::new(105, 2)).ceil();

        assert_eq!(token_amount, Decimal::from(125));
    }
}
