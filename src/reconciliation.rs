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

//! Periodic read-only reconciliation.
//!
//! Three checks, run out of the request path:
//!
//! 1. **Balance**: the ledger's net total equals the sum of live balances.
//! 2. **External sync**: recorded external event ids match the processor's
//!    event list for the period.
//! 3. **Double entry**: every multi-entry `ref_id` group sums to zero, and
//!    no integrity events are waiting in the engine's inbox.
//!
//! A discrepancy is recorded and reported, never auto-corrected: rewriting
//! the ledger to make a check pass could mask fraud or a processor-side
//! error. Records are append-only; the one permitted mutation is attaching
//! a manual resolution note.
//!
//! Runs are idempotent by construction — each run recomputes from current
//! state, so an interrupted run is simply superseded by the next one.

use crate::base::ExternalEventId;
use crate::engine::TransactionEngine;
use crate::entry::EntryStatus;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Balance,
    ExternalSync,
    DoubleEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
}

/// Operator sign-off attached to a reviewed record.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionNote {
    pub resolved_by: String,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// One check outcome in the append-only audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub check_type: CheckType,
    pub expected: i64,
    pub actual: i64,
    pub discrepancy: i64,
    pub status: CheckStatus,
    pub details: String,
    pub resolution: Option<ResolutionNote>,
}

/// Scheduled read-only auditor over the engine's ledger and accounts.
pub struct ReconciliationAuditor {
    engine: Arc<TransactionEngine>,
    records: RwLock<Vec<ReconciliationRecord>>,
    next_id: AtomicU64,
}

impl ReconciliationAuditor {
    pub fn new(engine: Arc<TransactionEngine>) -> Self {
        Self {
            engine,
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs all three checks and returns the new records.
    pub fn run_all(&self, processor_events: &[ExternalEventId]) -> Vec<ReconciliationRecord> {
        vec![
            self.run_balance_check(),
            self.run_external_sync_check(processor_events),
            self.run_double_entry_check(),
        ]
    }

    /// Checks that the ledger's net total matches the sum of live balances.
    pub fn run_balance_check(&self) -> ReconciliationRecord {
        // Snapshot the ledger before touching account locks; the engine
        // locks accounts first, ledger second, and this must not invert it.
        let expected = self.engine.ledger().net_total();
        let actual = self.engine.balances_total();
        let discrepancy = actual - expected;

        let status = if discrepancy == 0 {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        let details = if discrepancy == 0 {
            String::new()
        } else {
            format!("ledger net {expected} vs account total {actual}")
        };
        self.record(CheckType::Balance, expected, actual, status, details)
    }

    /// Compares recorded external event ids against the processor's list.
    ///
    /// Events the processor reports but the ledger never recorded fail the
    /// check; events recorded locally but absent from the processor's list
    /// only warn (the list may cover a narrower period).
    pub fn run_external_sync_check(
        &self,
        processor_events: &[ExternalEventId],
    ) -> ReconciliationRecord {
        let recorded: HashSet<ExternalEventId> =
            self.engine.ledger().external_event_ids().into_iter().collect();
        let reported: HashSet<ExternalEventId> = processor_events.iter().cloned().collect();

        let mut missing: Vec<_> = reported.difference(&recorded).cloned().collect();
        let mut extra: Vec<_> = recorded.difference(&reported).cloned().collect();
        missing.sort_by(|a, b| a.0.cmp(&b.0));
        extra.sort_by(|a, b| a.0.cmp(&b.0));

        let status = if !missing.is_empty() {
            CheckStatus::Failed
        } else if !extra.is_empty() {
            CheckStatus::Warning
        } else {
            CheckStatus::Passed
        };

        let mut details = Vec::new();
        if !missing.is_empty() {
            details.push(format!(
                "missing from ledger: {}",
                join_ids(&missing)
            ));
        }
        if !extra.is_empty() {
            details.push(format!("not reported by processor: {}", join_ids(&extra)));
        }

        self.record(
            CheckType::ExternalSync,
            reported.len() as i64,
            (reported.len() - missing.len()) as i64,
            status,
            details.join("; "),
        )
    }

    /// Verifies that every multi-entry `ref_id` group sums to zero, and
    /// reports any integrity events the engine queued since the last run.
    pub fn run_double_entry_check(&self) -> ReconciliationRecord {
        let entries = self.engine.ledger().entries();

        let mut groups: HashMap<Uuid, (i64, usize)> = HashMap::new();
        for entry in entries.iter().filter(|e| e.status == EntryStatus::Completed) {
            if let Some(ref_id) = entry.ref_id {
                let group = groups.entry(ref_id).or_insert((0, 0));
                group.0 += entry.amount;
                group.1 += 1;
            }
        }

        let mut violations: Vec<String> = groups
            .iter()
            .filter(|(_, group)| group.1 > 1 && group.0 != 0)
            .map(|(ref_id, group)| format!("ref {ref_id} sums to {}", group.0))
            .collect();
        violations.sort();
        let unbalanced: i64 = groups
            .values()
            .filter(|group| group.1 > 1 && group.0 != 0)
            .map(|group| group.0)
            .sum();

        let integrity_events = self.engine.drain_integrity_events();
        let mut details: Vec<String> = violations;
        for event in &integrity_events {
            details.push(format!(
                "engine-reported violation on account {}: {}",
                event.account_id, event.detail
            ));
        }

        let status = if details.is_empty() {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        self.record(CheckType::DoubleEntry, 0, unbalanced, status, details.join("; "))
    }

    fn record(
        &self,
        check_type: CheckType,
        expected: i64,
        actual: i64,
        status: CheckStatus,
        details: String,
    ) -> ReconciliationRecord {
        let record = ReconciliationRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            check_type,
            expected,
            actual,
            discrepancy: actual - expected,
            status,
            details,
            resolution: None,
        };

        match status {
            CheckStatus::Passed => {
                info!(check = ?check_type, "reconciliation check passed");
            }
            CheckStatus::Warning => {
                warn!(check = ?check_type, details = %record.details, "reconciliation warning");
            }
            CheckStatus::Failed => {
                error!(
                    check = ?check_type,
                    discrepancy = record.discrepancy,
                    details = %record.details,
                    "reconciliation check FAILED"
                );
            }
        }

        self.records.write().push(record.clone());
        record
    }

    /// Full audit trail, oldest first.
    pub fn records(&self) -> Vec<ReconciliationRecord> {
        self.records.read().clone()
    }

    /// Most recent outcome per check type, if any run has happened.
    pub fn latest(&self) -> Vec<ReconciliationRecord> {
        let records = self.records.read();
        [CheckType::Balance, CheckType::ExternalSync, CheckType::DoubleEntry]
            .iter()
            .filter_map(|t| records.iter().rev().find(|r| r.check_type == *t).cloned())
            .collect()
    }

    /// Attaches a manual resolution note to a reviewed record.
    ///
    /// The single permitted mutation of the trail; a record can only be
    /// resolved once.
    pub fn annotate_resolution(
        &self,
        record_id: u64,
        resolved_by: &str,
        note: &str,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or(LedgerError::RecordNotFound)?;
        if record.resolution.is_some() {
            return Err(LedgerError::AlreadyResolved);
        }
        record.resolution = Some(ResolutionNote {
            resolved_by: resolved_by.to_string(),
            note: note.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}

fn join_ids(ids: &[ExternalEventId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
