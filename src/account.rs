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

//! Account state and the per-account lock.
//!
//! An [`Account`] wraps its mutable state in a [`parking_lot::Mutex`]; the
//! lock is the unit of serialization for all balance mutation. Mutation
//! methods are `pub(crate)` so only the transaction engine can reach them —
//! the invariant checks cannot be bypassed from outside the crate.

use crate::base::{AccountId, Tokens};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

/// Mutable account state, accessed only under the account lock.
#[derive(Debug)]
pub(crate) struct AccountData {
    pub(crate) account_id: AccountId,
    pub(crate) balance: Tokens,
    pub(crate) lifetime_purchased: Tokens,
    pub(crate) lifetime_spent: Tokens,
    pub(crate) lifetime_earned: Tokens,
    pub(crate) updated_at: DateTime<Utc>,
}

impl AccountData {
    fn new(account_id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: 0,
            lifetime_purchased: 0,
            lifetime_spent: 0,
            lifetime_earned: 0,
            updated_at: now,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= 0,
            "balance went negative on account {}: {}",
            self.account_id,
            self.balance
        );
    }

    /// Increases the balance. Credits always succeed.
    pub(crate) fn credit(&mut self, amount: Tokens, now: DateTime<Utc>) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance += amount;
        self.updated_at = now;
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance, enforcing the non-negativity floor.
    pub(crate) fn debit(&mut self, amount: Tokens, now: DateTime<Utc>) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        self.updated_at = now;
        self.assert_invariants();
        Ok(())
    }
}

/// One user's token balance; the unit of locking.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(account_id, Utc::now())),
        }
    }

    /// Acquires the account lock for a read-modify-write critical section.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }

    pub fn account_id(&self) -> AccountId {
        self.inner.lock().account_id
    }

    pub fn balance(&self) -> Tokens {
        self.inner.lock().balance
    }

    /// Consistent point-in-time copy of the account state.
    pub fn snapshot(&self) -> AccountSnapshot {
        let data = self.inner.lock();
        AccountSnapshot {
            account_id: data.account_id,
            balance: data.balance,
            lifetime_purchased: data.lifetime_purchased,
            lifetime_spent: data.lifetime_spent,
            lifetime_earned: data.lifetime_earned,
            updated_at: data.updated_at,
        }
    }
}

/// Serializable view of an account at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub balance: Tokens,
    pub lifetime_purchased: Tokens,
    pub lifetime_spent: Tokens,
    pub lifetime_earned: Tokens,
    pub updated_at: DateTime<Utc>,
}
