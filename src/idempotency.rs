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

//! Exactly-once application of externally-sourced events.
//!
//! The guard caches the outcome recorded for each external event id. A
//! redelivered event returns the cached outcome without re-invoking the
//! operation. The DashMap entry API makes the check-then-run-then-record
//! sequence atomic per event id: a second delivery racing the first blocks
//! on the shard until the first outcome is recorded.
//!
//! The ledger's unique index on external event ids is the authoritative
//! backstop: if the cache has no outcome but the ledger already holds the
//! entry, the duplicate-insert failure is converted into a cache hit rather
//! than surfaced as an error.

use crate::base::ExternalEventId;
use crate::entry::LedgerEntry;
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Outcome of processing an external event through the guard.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// The ledger entry recorded for the event.
    pub entry: Arc<LedgerEntry>,
    /// True when this delivery was a replay and no operation ran.
    pub replayed: bool,
}

/// Deduplicates externally-sourced events before they reach the engine.
#[derive(Debug)]
pub struct IdempotencyGuard {
    outcomes: DashMap<ExternalEventId, Arc<LedgerEntry>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self {
            outcomes: DashMap::new(),
        }
    }

    /// Runs `f` at most once for the given event id.
    ///
    /// `f` must record its result in `ledger` under the same event id; the
    /// recorded entry becomes the cached outcome returned to every replay.
    /// Errors from `f` other than [`LedgerError::DuplicateEvent`] are not
    /// cached, so a transiently failing delivery can be retried.
    pub fn process_once<F>(
        &self,
        ledger: &Ledger,
        event_id: &ExternalEventId,
        f: F,
    ) -> Result<ProcessOutcome>
    where
        F: FnOnce() -> Result<Arc<LedgerEntry>>,
    {
        match self.outcomes.entry(event_id.clone()) {
            Entry::Occupied(slot) => Ok(ProcessOutcome {
                entry: Arc::clone(slot.get()),
                replayed: true,
            }),
            Entry::Vacant(slot) => match f() {
                Ok(entry) => {
                    slot.insert(Arc::clone(&entry));
                    Ok(ProcessOutcome {
                        entry,
                        replayed: false,
                    })
                }
                // The ledger already holds this event (e.g. the cache was
                // rebuilt after a restart): treat as already processed.
                Err(LedgerError::DuplicateEvent) => {
                    let entry = ledger
                        .find_by_external_id(event_id)
                        .ok_or(LedgerError::DuplicateEvent)?;
                    slot.insert(Arc::clone(&entry));
                    Ok(ProcessOutcome {
                        entry,
                        replayed: true,
                    })
                }
                Err(other) => Err(other),
            },
        }
    }

    /// Number of distinct events processed so far.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new()
    }
}
