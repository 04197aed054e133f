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

//! The error taxonomy from the specification's error-handling design (§7).
//!
//! Each variant carries the policy implied by its origin: some are fatal to
//! a single queue item, some are transient and simply retried, some require
//! a state promotion rather than a retry. Callers match on the variant to
//! decide what to do; this type itself stays a plain data carrier.

use thiserror::Error;

/// Errors surfaced by chain plugins, the deal engine, the dispatcher and the
/// recovery manager.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The chain rejected our transaction because the operator signature or
    /// sender was not authorized. Fatal to the queue item: mark FAILED, alert.
    #[error("unauthorized operator: {0}")]
    UnauthorizedOperator(String),

    /// The contract's state machine says this call was already made
    /// (`InvalidState` / `AlreadyExecuted`). Treat as success: promote the
    /// queue item to CONFIRMED rather than retry.
    #[error("operation already executed on-chain: {0}")]
    AlreadyExecuted(String),

    /// The contract reports insufficient balance, i.e. the deposit is not
    /// yet visible on-chain. Retry at the next recovery cycle.
    #[error("insufficient balance at contract: {0}")]
    InsufficientBalance(String),

    /// The payee rejected the transfer. Retry with a gas bump; after the
    /// configured attempt limit, FAILED.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The chain's gas price exceeds the configured circuit-breaker
    /// ceiling. Pause submission for that chain until price falls.
    #[error("circuit breaker tripped on {chain}: gas price {gwei} gwei exceeds ceiling")]
    CircuitBreakerTripped {
        /// Chain identifier the breaker tripped on.
        chain: String,
        /// Observed gas price in gwei.
        gwei: f64,
    },

    /// A plugin call exceeded its hard timeout. Transient; retry.
    #[error("deadline exceeded calling {0}")]
    DeadlineExceeded(String),

    /// `getTxConfirmations` returned a negative value: the transaction
    /// failed or was reorged away. Reset SUBMITTED -> PENDING.
    #[error("reorg or failure detected for tx {0}")]
    ReorgDetected(String),

    /// Vesting trace hit a structural limit (max depth, no parent inputs).
    /// Persist the failure so the UTXO is not retried every cycle.
    #[error("permanent vesting trace failure for {txid}: {reason}")]
    PermanentTraceFailure {
        /// The UTXO transaction id being traced.
        txid: String,
        /// Why the trace could not proceed.
        reason: String,
    },

    /// The price oracle could not be reached after retries. Gas
    /// reimbursement is skipped for this settlement; the deal still closes.
    #[error("no price oracle available: {0}")]
    NoPriceOracle(String),

    /// A deal invariant would be violated by the on-chain state observed
    /// (e.g. a CONFIRMED swap whose on-chain state is reverted). The deal
    /// is flagged for operator review and further transitions are paused.
    #[error("deal invariant violated, operator review required: {0}")]
    InvariantViolation(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Catch-all for plugin-internal errors that do not fit a more specific
    /// variant (malformed RPC responses, unexpected chain shapes, etc.).
    #[error("chain plugin error: {0}")]
    Plugin(String),
}

impl BrokerError {
    /// Whether this error should be retried by the caller rather than
    /// treated as a permanent failure of the queue item / deposit / trace.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance(_)
                | Self::DeadlineExceeded(_)
                | Self::CircuitBreakerTripped { .. }
        )
    }
}

/// Convenience result alias used throughout the broker crates.
pub type BrokerResult<T> = Result<T, BrokerError>;
