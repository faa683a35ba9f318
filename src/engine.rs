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

//! Transaction engine: the only writer of balances and ledger entries.
//!
//! Every mutation acquires the per-account lock, verifies the invariants,
//! applies the balance change, and appends the ledger entry before the lock
//! is released. [`transfer`](TransactionEngine::transfer) holds both account
//! locks for the whole critical section, so a half-applied transfer is never
//! observable through a balance read.
//!
//! # Lock ordering
//!
//! Accounts are always locked in ascending [`AccountId`] order, and the
//! ledger's internal lock is only taken while account locks are held (never
//! the reverse). This rules out lock cycles between concurrent transfers.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`], so operations on different accounts
//! proceed fully in parallel; operations on the same account serialize on
//! its mutex in arrival order at the lock, with no fairness guarantee
//! beyond mutual exclusion.

use crate::account::{Account, AccountSnapshot};
use crate::base::{AccountId, ExternalEventId, SessionId, Tokens};
use crate::entry::{EntryDraft, EntryKind, EntryStatus, LedgerEntry};
use crate::error::{LedgerError, Result};
use crate::event::{PaymentEvent, PaymentEventKind};
use crate::idempotency::{IdempotencyGuard, ProcessOutcome};
use crate::ledger::Ledger;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A correctness problem the engine detected and refused to apply.
///
/// These are not returned to callers; they are queued for the reconciliation
/// auditor's next run.
#[derive(Debug, Clone)]
pub struct IntegrityEvent {
    pub account_id: AccountId,
    pub external_event_id: Option<ExternalEventId>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Both legs of one completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub ref_id: Uuid,
    pub debit: Arc<LedgerEntry>,
    pub credit: Arc<LedgerEntry>,
}

/// Session-end signal from the call subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnd {
    pub session_id: SessionId,
    pub fan_id: AccountId,
    pub creator_id: AccountId,
    pub duration_minutes: f64,
    pub rate_per_minute: Tokens,
}

/// Billing result for one settled session.
#[derive(Debug, Clone)]
pub struct SessionReceipt {
    pub session_id: SessionId,
    pub billed_minutes: u32,
    pub total_cost: Tokens,
    pub transfer: TransferReceipt,
}

/// Central processor for every balance-affecting operation.
pub struct TransactionEngine {
    /// Accounts indexed by id; created lazily on first credit.
    accounts: DashMap<AccountId, Arc<Account>>,
    ledger: Arc<Ledger>,
    guard: IdempotencyGuard,
    /// Violations awaiting the auditor, drained lock-free.
    integrity_events: SegQueue<IntegrityEvent>,
}

impl TransactionEngine {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            ledger: Arc::new(Ledger::new()),
            guard: IdempotencyGuard::new(),
            integrity_events: SegQueue::new(),
        }
    }

    /// Shared handle to the append-only ledger.
    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }

    fn account(&self, account_id: AccountId) -> Result<Arc<Account>> {
        self.accounts
            .get(&account_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    fn get_or_create(&self, account_id: AccountId) -> Arc<Account> {
        self.accounts
            .entry(account_id)
            .or_insert_with(|| Arc::new(Account::new(account_id)))
            .clone()
    }

    /// Current balance for one account.
    pub fn balance(&self, account_id: AccountId) -> Result<Tokens> {
        Ok(self.account(account_id)?.balance())
    }

    /// Point-in-time snapshot of one account.
    pub fn snapshot(&self, account_id: AccountId) -> Result<AccountSnapshot> {
        Ok(self.account(account_id)?.snapshot())
    }

    /// Snapshots of every account, ordered by account id.
    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        let mut all: Vec<_> = self.accounts.iter().map(|r| r.value().snapshot()).collect();
        all.sort_by_key(|s| s.account_id);
        all
    }

    /// Most recent ledger entries for one account, newest first.
    pub fn history(&self, account_id: AccountId, limit: usize) -> Vec<Arc<LedgerEntry>> {
        self.ledger.history(account_id, limit)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of all live account balances.
    pub fn balances_total(&self) -> Tokens {
        self.accounts.iter().map(|r| r.value().balance()).sum()
    }

    /// Problems queued since the last drain, oldest first.
    pub fn drain_integrity_events(&self) -> Vec<IntegrityEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.integrity_events.pop() {
            events.push(event);
        }
        events
    }

    /// Debits `amount` tokens, failing atomically if the balance is short.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] for a non-positive amount.
    /// - [`LedgerError::AccountNotFound`] if the account does not exist.
    /// - [`LedgerError::InsufficientBalance`] if the floor would be crossed;
    ///   the balance is left unchanged.
    pub fn debit(
        &self,
        account_id: AccountId,
        amount: Tokens,
        reason: &str,
    ) -> Result<Arc<LedgerEntry>> {
        let account = self.account(account_id)?;
        let now = Utc::now();

        let mut data = account.lock();
        let before = data.balance;
        data.debit(amount, now)?;
        data.lifetime_spent += amount;

        let entry = self.ledger.append(EntryDraft {
            account_id,
            kind: EntryKind::Spend,
            amount: -amount,
            balance_before: before,
            balance_after: data.balance,
            ref_id: None,
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })?;
        drop(data);

        info!(account = %account_id, amount, reason, "debit applied");
        Ok(entry)
    }

    /// Credits `amount` tokens, creating the account if needed.
    pub fn credit(
        &self,
        account_id: AccountId,
        amount: Tokens,
        reason: &str,
    ) -> Result<Arc<LedgerEntry>> {
        let account = self.get_or_create(account_id);
        let now = Utc::now();

        let mut data = account.lock();
        let before = data.balance;
        data.credit(amount, now)?;
        data.lifetime_earned += amount;

        let entry = self.ledger.append(EntryDraft {
            account_id,
            kind: EntryKind::Earn,
            amount,
            balance_before: before,
            balance_after: data.balance,
            ref_id: None,
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })?;
        drop(data);

        info!(account = %account_id, amount, reason, "credit applied");
        Ok(entry)
    }

    /// Moves `amount` tokens from one account to another as one atomic unit.
    ///
    /// Both legs share a fresh `ref_id` and sum to zero. Both account locks
    /// are held until both legs are applied and recorded, so no reader can
    /// observe the debit without the credit.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Tokens,
        reason: &str,
    ) -> Result<TransferReceipt> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }

        let from_account = self.account(from)?;
        let to_account = self.get_or_create(to);
        let ref_id = Uuid::new_v4();
        let now = Utc::now();

        // Lock in ascending id order regardless of transfer direction.
        let (mut from_data, mut to_data) = if from < to {
            let f = from_account.lock();
            let t = to_account.lock();
            (f, t)
        } else {
            let t = to_account.lock();
            let f = from_account.lock();
            (f, t)
        };

        let from_before = from_data.balance;
        from_data.debit(amount, now)?;
        from_data.lifetime_spent += amount;

        let to_before = to_data.balance;
        to_data.credit(amount, now)?;
        to_data.lifetime_earned += amount;

        let debit = self.ledger.append(EntryDraft {
            account_id: from,
            kind: EntryKind::Spend,
            amount: -amount,
            balance_before: from_before,
            balance_after: from_data.balance,
            ref_id: Some(ref_id),
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })?;
        let credit = self.ledger.append(EntryDraft {
            account_id: to,
            kind: EntryKind::Earn,
            amount,
            balance_before: to_before,
            balance_after: to_data.balance,
            ref_id: Some(ref_id),
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })?;
        drop(from_data);
        drop(to_data);

        info!(%from, %to, amount, reason, %ref_id, "transfer completed");
        Ok(TransferReceipt {
            ref_id,
            debit,
            credit,
        })
    }

    /// Bills a finished session and settles it fan → creator.
    ///
    /// Billing rounds the duration up to whole minutes with a one-minute
    /// floor: a 2.3-minute session at 10/min bills 3 × 10 = 30 tokens.
    pub fn settle_session(&self, session: SessionEnd) -> Result<SessionReceipt> {
        if !session.duration_minutes.is_finite() || session.duration_minutes < 0.0 {
            return Err(LedgerError::InvalidAmount);
        }
        if session.rate_per_minute <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let billed_minutes = (session.duration_minutes.ceil() as u32).max(1);
        let total_cost = Tokens::from(billed_minutes) * session.rate_per_minute;

        let transfer = self.transfer(session.fan_id, session.creator_id, total_cost, "session")?;
        info!(
            session = %session.session_id,
            billed_minutes,
            total_cost,
            "session settled"
        );
        Ok(SessionReceipt {
            session_id: session.session_id,
            billed_minutes,
            total_cost,
            transfer,
        })
    }

    /// Applies an externally-sourced payment event exactly once.
    ///
    /// Redeliveries return the originally recorded outcome. A refund or
    /// chargeback that cannot be applied without crossing the balance floor
    /// records a zero-amount failed entry (pinning the event id) and queues
    /// an [`IntegrityEvent`] for the auditor instead of erroring.
    pub fn process_payment_event(&self, event: PaymentEvent) -> Result<ProcessOutcome> {
        if event.amount_tokens <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let event_id = event.event_id.clone();
        self.guard
            .process_once(&self.ledger, &event_id, || self.apply_event(&event))
    }

    fn apply_event(&self, event: &PaymentEvent) -> Result<Arc<LedgerEntry>> {
        // The guard serializes deliveries of one event id, but its cache may
        // be cold (fresh process over an existing ledger). Check the ledger
        // before touching the balance so a replay cannot double-apply.
        if self.ledger.find_by_external_id(&event.event_id).is_some() {
            return Err(LedgerError::DuplicateEvent);
        }

        let account = self.get_or_create(event.account_id);
        let now = Utc::now();
        let amount = event.amount_tokens;

        let mut data = account.lock();
        let before = data.balance;

        match event.kind {
            PaymentEventKind::Purchase => {
                data.credit(amount, now)?;
                data.lifetime_purchased += amount;
                let entry = self.ledger.append(EntryDraft {
                    account_id: event.account_id,
                    kind: EntryKind::Purchase,
                    amount,
                    balance_before: before,
                    balance_after: data.balance,
                    ref_id: None,
                    external_event_id: Some(event.event_id.clone()),
                    reason: "token purchase".to_string(),
                    status: EntryStatus::Completed,
                })?;
                Ok(entry)
            }
            PaymentEventKind::Refund | PaymentEventKind::Chargeback => {
                let kind = match event.kind {
                    PaymentEventKind::Refund => EntryKind::Refund,
                    _ => EntryKind::Chargeback,
                };
                let reason = match event.kind {
                    PaymentEventKind::Refund => "purchase refunded",
                    _ => "purchase charged back",
                };

                if data.balance < amount {
                    // The tokens were already spent; record the event as
                    // failed so it stays deduplicated, and surface the gap
                    // to the auditor.
                    let entry = self.ledger.append(EntryDraft {
                        account_id: event.account_id,
                        kind,
                        amount: 0,
                        balance_before: before,
                        balance_after: before,
                        ref_id: None,
                        external_event_id: Some(event.event_id.clone()),
                        reason: reason.to_string(),
                        status: EntryStatus::Failed,
                    })?;
                    self.integrity_events.push(IntegrityEvent {
                        account_id: event.account_id,
                        external_event_id: Some(event.event_id.clone()),
                        detail: format!(
                            "{reason} for {amount} tokens exceeds balance {before}"
                        ),
                        at: now,
                    });
                    warn!(
                        account = %event.account_id,
                        event = %event.event_id,
                        amount,
                        balance = before,
                        "payment reversal exceeds balance; recorded as failed"
                    );
                    return Ok(entry);
                }

                data.debit(amount, now)?;
                let entry = self.ledger.append(EntryDraft {
                    account_id: event.account_id,
                    kind,
                    amount: -amount,
                    balance_before: before,
                    balance_after: data.balance,
                    ref_id: None,
                    external_event_id: Some(event.event_id.clone()),
                    reason: reason.to_string(),
                    status: EntryStatus::Completed,
                })?;
                Ok(entry)
            }
        }
    }

    /// Reserves a creator's earnings out of their balance for a payout
    /// batch. Floor-checked like any debit.
    pub(crate) fn payout_debit(
        &self,
        account_id: AccountId,
        amount: Tokens,
        ref_id: Uuid,
        reason: &str,
    ) -> Result<Arc<LedgerEntry>> {
        let account = self.account(account_id)?;
        let now = Utc::now();

        let mut data = account.lock();
        let before = data.balance;
        data.debit(amount, now)?;

        self.ledger.append(EntryDraft {
            account_id,
            kind: EntryKind::Payout,
            amount: -amount,
            balance_before: before,
            balance_after: data.balance,
            ref_id: Some(ref_id),
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })
    }

    /// Returns reserved tokens after a failed payout transfer, paired with
    /// the original reservation via the shared `ref_id`.
    pub(crate) fn payout_return(
        &self,
        account_id: AccountId,
        amount: Tokens,
        ref_id: Uuid,
        reason: &str,
    ) -> Result<Arc<LedgerEntry>> {
        let account = self.account(account_id)?;
        let now = Utc::now();

        let mut data = account.lock();
        let before = data.balance;
        data.credit(amount, now)?;

        self.ledger.append(EntryDraft {
            account_id,
            kind: EntryKind::Payout,
            amount,
            balance_before: before,
            balance_after: data.balance,
            ref_id: Some(ref_id),
            external_event_id: None,
            reason: reason.to_string(),
            status: EntryStatus::Completed,
        })
    }

    /// Manual compensating adjustment, signed either way.
    ///
    /// The only sanctioned correction path: a mistake in history is offset
    /// by a new entry, never by editing the old one. Negative adjustments
    /// respect the balance floor like any debit.
    pub fn admin_adjust(
        &self,
        account_id: AccountId,
        amount: Tokens,
        note: &str,
    ) -> Result<Arc<LedgerEntry>> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let account = self.get_or_create(account_id);
        let now = Utc::now();

        let mut data = account.lock();
        let before = data.balance;
        if amount > 0 {
            data.credit(amount, now)?;
        } else {
            data.debit(-amount, now)?;
        }

        let entry = self.ledger.append(EntryDraft {
            account_id,
            kind: EntryKind::AdminAdjust,
            amount,
            balance_before: before,
            balance_after: data.balance,
            ref_id: None,
            external_event_id: None,
            reason: note.to_string(),
            status: EntryStatus::Completed,
        })?;
        drop(data);

        warn!(account = %account_id, amount, note, "admin adjustment applied");
        Ok(entry)
    }
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self::new()
    }
}
