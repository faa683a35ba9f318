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

//! Ledger entry types.
//!
//! A [`LedgerEntry`] is one immutable record of a balance-affecting event.
//! Entries are only ever appended; a mistake is corrected by a compensating
//! [`EntryKind::AdminAdjust`] entry, never by editing history.

use crate::base::{AccountId, EntryId, ExternalEventId, Tokens};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Tokens bought from the external payment processor
    Purchase,
    /// Tokens spent by a fan (call, tip, gift, ppv unlock)
    Spend,
    /// Tokens earned by a creator (the credit half of a transfer)
    Earn,
    /// Tokens leaving the system through a creator payout
    Payout,
    /// Processor-initiated refund of a purchase
    Refund,
    /// Processor-initiated chargeback of a purchase
    Chargeback,
    /// Manual compensating adjustment
    AdminAdjust,
}

/// Whether the recorded operation applied a balance change.
///
/// `Failed` entries carry a zero amount: they exist to pin an external event
/// id that could not be applied (e.g. a refund exceeding the balance), so the
/// event stays deduplicated and the failure is visible to reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Failed,
}

/// One immutable record in the append-only ledger.
///
/// # Invariants
///
/// - `balance_after - balance_before == amount`
/// - entries sharing a `ref_id` sum to zero (double-entry closure)
/// - at most one entry per `external_event_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Signed delta: positive = credit, negative = debit.
    pub amount: Tokens,
    pub balance_before: Tokens,
    pub balance_after: Tokens,
    /// Groups the legs of one logical transfer.
    pub ref_id: Option<Uuid>,
    /// Present only for entries sourced from an external payment event.
    pub external_event_id: Option<ExternalEventId>,
    /// Free-form reason supplied by the caller ("tip", "session", ...).
    pub reason: String,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

/// Entry fields supplied by the caller; id and timestamp are assigned on
/// append.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub amount: Tokens,
    pub balance_before: Tokens,
    pub balance_after: Tokens,
    pub ref_id: Option<Uuid>,
    pub external_event_id: Option<ExternalEventId>,
    pub reason: String,
    pub status: EntryStatus,
}
