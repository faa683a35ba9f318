// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
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

//! Error types for ledger and settlement operations.

use crate::base::{AccountId, Tokens};
use thiserror::Error;

/// Ledger and settlement errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative where a positive amount is required
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit would take the balance below zero
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Tokens,
        available: Tokens,
    },

    /// No account exists for the given id
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer source and destination are the same account
    #[error("cannot transfer to the same account")]
    SelfTransfer,

    /// A completed ledger entry already carries this external event id
    #[error("duplicate external event")]
    DuplicateEvent,

    /// An internal consistency check failed; the operation wrote nothing
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Referenced queue entry does not exist or is no longer active
    #[error("queue entry not found")]
    QueueEntryNotFound,

    /// Fan already holds an active entry in this creator's queue
    #[error("already waiting in this queue")]
    AlreadyQueued,

    /// Referenced reconciliation record does not exist
    #[error("reconciliation record not found")]
    RecordNotFound,

    /// Reconciliation record already carries a resolution note
    #[error("reconciliation record already resolved")]
    AlreadyResolved,

    /// Referenced payout batch does not exist
    #[error("payout batch not found")]
    BatchNotFound,

    /// Payout batch is not in the state the transition requires
    #[error("payout batch is not in a valid state for this transition")]
    InvalidBatchState,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
