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

//! Append-only ledger with a unique index on external event ids.
//!
//! The API has no update or delete: once appended, an entry is permanent.
//! Compensation happens through new [`EntryKind::AdminAdjust`] entries.
//!
//! Read methods return owned snapshots so no ledger guard is ever held while
//! a caller goes on to take account locks (the engine always locks accounts
//! first, then appends; readers must not invert that order).

use crate::base::{AccountId, EntryId, ExternalEventId, Tokens};
use crate::entry::{EntryDraft, EntryKind, EntryStatus, LedgerEntry};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only log of every balance-affecting event.
#[derive(Debug)]
pub struct Ledger {
    entries: RwLock<Vec<Arc<LedgerEntry>>>,

    /// Unique index enforcing at-most-once recording per external event.
    by_external_id: DashMap<ExternalEventId, EntryId>,

    next_id: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            by_external_id: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends one entry, enforcing the per-entry invariants.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::IntegrityViolation`] if the balance delta does not
    ///   match the amount, or a failed entry carries a nonzero amount.
    /// - [`LedgerError::DuplicateEvent`] if the external event id is already
    ///   recorded. Nothing is written in either case.
    pub fn append(&self, draft: EntryDraft) -> Result<Arc<LedgerEntry>> {
        if draft.balance_before + draft.amount != draft.balance_after {
            return Err(LedgerError::IntegrityViolation(format!(
                "balance delta mismatch: {} + {} != {}",
                draft.balance_before, draft.amount, draft.balance_after
            )));
        }
        if draft.status == EntryStatus::Failed && draft.amount != 0 {
            return Err(LedgerError::IntegrityViolation(
                "failed entry must carry a zero amount".to_string(),
            ));
        }

        let id = EntryId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = Arc::new(LedgerEntry {
            id,
            account_id: draft.account_id,
            kind: draft.kind,
            amount: draft.amount,
            balance_before: draft.balance_before,
            balance_after: draft.balance_after,
            ref_id: draft.ref_id,
            external_event_id: draft.external_event_id.clone(),
            reason: draft.reason,
            status: draft.status,
            created_at: Utc::now(),
        });

        // Hold the write lock across the uniqueness check and the push so a
        // racing append of the same event id cannot slip between them.
        let mut entries = self.entries.write();
        if let Some(event_id) = draft.external_event_id {
            match self.by_external_id.entry(event_id) {
                Entry::Occupied(_) => return Err(LedgerError::DuplicateEvent),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        entries.push(Arc::clone(&entry));

        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point-in-time copy of the full log, oldest first.
    pub fn entries(&self) -> Vec<Arc<LedgerEntry>> {
        self.entries.read().clone()
    }

    /// Most recent entries for one account, newest first.
    pub fn history(&self, account_id: AccountId, limit: usize) -> Vec<Arc<LedgerEntry>> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Looks up the entry recorded for an external event, if any.
    pub fn find_by_external_id(&self, event_id: &ExternalEventId) -> Option<Arc<LedgerEntry>> {
        let entry_id = *self.by_external_id.get(event_id)?;
        self.entries
            .read()
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
    }

    /// All external event ids recorded in the ledger.
    pub fn external_event_ids(&self) -> Vec<ExternalEventId> {
        self.by_external_id
            .iter()
            .map(|kv| kv.key().clone())
            .collect()
    }

    /// Net sum of all completed entry amounts.
    ///
    /// Transfers contribute zero (their legs cancel), so this equals the
    /// tokens injected into or removed from the system.
    pub fn net_total(&self) -> Tokens {
        self.entries
            .read()
            .iter()
            .filter(|e| e.status == EntryStatus::Completed)
            .map(|e| e.amount)
            .sum()
    }

    /// Completed `Earn` entries for one account, oldest first.
    pub fn earns_for(&self, account_id: AccountId) -> Vec<Arc<LedgerEntry>> {
        self.entries
            .read()
            .iter()
            .filter(|e| {
                e.account_id == account_id
                    && e.kind == EntryKind::Earn
                    && e.status == EntryStatus::Completed
            })
            .cloned()
            .collect()
    }

    /// Accounts that hold at least one completed `Earn` entry.
    pub fn earning_accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.kind == EntryKind::Earn && e.status == EntryStatus::Completed)
            .map(|e| e.account_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(account: u64, amount: i64, before: i64) -> EntryDraft {
        EntryDraft {
            account_id: AccountId(account),
            kind: EntryKind::Purchase,
            amount,
            balance_before: before,
            balance_after: before + amount,
            ref_id: None,
            external_event_id: None,
            reason: "test".to_string(),
            status: EntryStatus::Completed,
        }
    }

    #[test]
    fn append_assigns_sequential_ids() {
        let ledger = Ledger::new();
        let first = ledger.append(draft(1, 100, 0)).unwrap();
        let second = ledger.append(draft(1, 50, 100)).unwrap();
        assert!(second.id > first.id);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn delta_mismatch_is_rejected() {
        let ledger = Ledger::new();
        let mut bad = draft(1, 100, 0);
        bad.balance_after = 150;
        let result = ledger.append(bad);
        assert!(matches!(result, Err(LedgerError::IntegrityViolation(_))));
        assert!(ledger.is_empty());
    }

    #[test]
    fn failed_entry_with_nonzero_amount_is_rejected() {
        let ledger = Ledger::new();
        let mut bad = draft(1, 100, 0);
        bad.status = EntryStatus::Failed;
        let result = ledger.append(bad);
        assert!(matches!(result, Err(LedgerError::IntegrityViolation(_))));
    }

    #[test]
    fn duplicate_external_event_is_rejected() {
        let ledger = Ledger::new();
        let mut first = draft(1, 100, 0);
        first.external_event_id = Some(ExternalEventId::new("evt_1"));
        ledger.append(first).unwrap();

        let mut second = draft(1, 100, 100);
        second.external_event_id = Some(ExternalEventId::new("evt_1"));
        let result = ledger.append(second);
        assert_eq!(result.unwrap_err(), LedgerError::DuplicateEvent);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn find_by_external_id_returns_recorded_entry() {
        let ledger = Ledger::new();
        let mut d = draft(1, 500, 0);
        d.external_event_id = Some(ExternalEventId::new("evt_9"));
        let appended = ledger.append(d).unwrap();

        let found = ledger
            .find_by_external_id(&ExternalEventId::new("evt_9"))
            .unwrap();
        assert_eq!(found.id, appended.id);
        assert!(
            ledger
                .find_by_external_id(&ExternalEventId::new("evt_missing"))
                .is_none()
        );
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let ledger = Ledger::new();
        ledger.append(draft(1, 10, 0)).unwrap();
        ledger.append(draft(2, 99, 0)).unwrap();
        ledger.append(draft(1, 20, 10)).unwrap();
        ledger.append(draft(1, 30, 30)).unwrap();

        let history = ledger.history(AccountId(1), 2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, 30);
        assert_eq!(history[1].amount, 20);
    }

    #[test]
    fn net_total_ignores_failed_entries() {
        let ledger = Ledger::new();
        ledger.append(draft(1, 100, 0)).unwrap();
        let mut failed = draft(1, 0, 100);
        failed.status = EntryStatus::Failed;
        ledger.append(failed).unwrap();
        assert_eq!(ledger.net_total(), 100);
    }
}
