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

//! Minimal Solidity interfaces for the on-chain contracts this crate calls
//! but does not implement (spec §6). Only the functions/events the broker
//! core actually invokes are declared.

use alloy_sol_types::sol;

sol! {
    /// Standard ERC-20 surface used for allowance checks and approvals.
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// The shared broker contract (spec §6). `swapNative`/`revertNative` take
    /// an operator ECDSA signature over the EIP-191-prefixed call tuple;
    /// `swapERC20`/`revertERC20` pull funds via `transferFrom` from an
    /// approved escrow.
    #[sol(rpc)]
    interface IBroker {
        function swapNative(
            bytes32 dealId,
            address payback,
            address recipient,
            address feeRecipient,
            uint256 amount,
            uint256 fees,
            bytes calldata operatorSig
        ) external payable;

        function revertNative(
            bytes32 dealId,
            address payback,
            address recipient,
            address feeRecipient,
            uint256 amount,
            uint256 fees,
            bytes calldata operatorSig
        ) external payable;

        function swapERC20(
            bytes32 dealId,
            address token,
            address escrow,
            address payback,
            address recipient,
            address feeRecipient,
            uint256 amount,
            uint256 fees
        ) external;

        function revertERC20(
            bytes32 dealId,
            address token,
            address escrow,
            address payback,
            uint256 amount
        ) external;

        function processedDeals(bytes32 dealId) external view returns (bool);
    }

    /// The per-deal escrow contract (spec §6).
    #[sol(rpc)]
    interface IEscrow {
        function initialize(
            address payback,
            address recipient,
            address currency,
            uint256 swapValue,
            uint256 feeValue
        ) external;
        function swap() external;
        function revertEscrow() external;
        function refund() external;
        function sweep(address other) external;
    }
}
