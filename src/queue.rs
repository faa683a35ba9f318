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

//! Per-creator call queues with dense position numbering.
//!
//! Active positions for a creator are always exactly `{1, 2, ..., n}`:
//! removal compacts every later position in the same critical section, so
//! no reader can observe a gap. Each creator's queue has its own lock;
//! queues for different creators never contend.

use crate::base::{AccountId, QueueEntryId, Tokens};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    Expired,
    Cancelled,
}

/// One fan waiting (or no longer waiting) for one creator.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub creator_id: AccountId,
    pub fan_id: AccountId,
    /// Dense, 1-based, unique per creator among waiting entries.
    pub position: u32,
    pub estimated_cost: Tokens,
    pub status: QueueStatus,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Position-ordered waiting lists, one per creator.
#[derive(Debug)]
pub struct CallQueue {
    queues: DashMap<AccountId, Mutex<Vec<QueueEntry>>>,
    /// Maps entry ids to the creator queue holding them.
    entry_index: DashMap<QueueEntryId, AccountId>,
    next_id: AtomicU64,
    ttl: Duration,
}

impl CallQueue {
    /// Creates queues whose entries expire `ttl_minutes` after joining.
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            queues: DashMap::new(),
            entry_index: DashMap::new(),
            next_id: AtomicU64::new(1),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Appends a fan at the back of a creator's queue.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyQueued`] if the fan already has a waiting entry
    /// in this creator's queue.
    pub fn enqueue(
        &self,
        creator_id: AccountId,
        fan_id: AccountId,
        estimated_cost: Tokens,
    ) -> Result<QueueEntry> {
        self.enqueue_at(creator_id, fan_id, estimated_cost, Utc::now())
    }

    pub fn enqueue_at(
        &self,
        creator_id: AccountId,
        fan_id: AccountId,
        estimated_cost: Tokens,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let queue = self
            .queues
            .entry(creator_id)
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut entries = queue.lock();

        if entries.iter().any(|e| e.fan_id == fan_id) {
            return Err(LedgerError::AlreadyQueued);
        }

        let entry = QueueEntry {
            id: QueueEntryId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            creator_id,
            fan_id,
            position: entries.len() as u32 + 1,
            estimated_cost,
            status: QueueStatus::Waiting,
            enqueued_at: now,
            expires_at: now + self.ttl,
        };
        self.entry_index.insert(entry.id, creator_id);
        entries.push(entry.clone());

        info!(creator = %creator_id, fan = %fan_id, position = entry.position, "fan enqueued");
        Ok(entry)
    }

    /// Removes an entry and closes the position gap it leaves behind.
    ///
    /// Every waiting entry behind the removed one moves up by exactly one
    /// position, inside the same critical section as the removal.
    pub fn dequeue(&self, entry_id: QueueEntryId) -> Result<QueueEntry> {
        self.remove(entry_id, QueueStatus::Cancelled)
    }

    /// Transitions the entry to `Called` and removes it from the waiting
    /// list; the creator is now serving this fan.
    pub fn mark_called(&self, entry_id: QueueEntryId) -> Result<QueueEntry> {
        self.remove(entry_id, QueueStatus::Called)
    }

    fn remove(&self, entry_id: QueueEntryId, final_status: QueueStatus) -> Result<QueueEntry> {
        let creator_id = *self
            .entry_index
            .get(&entry_id)
            .ok_or(LedgerError::QueueEntryNotFound)?;
        let queue = self
            .queues
            .get(&creator_id)
            .ok_or(LedgerError::QueueEntryNotFound)?;
        let mut entries = queue.lock();

        let index = entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or(LedgerError::QueueEntryNotFound)?;
        let mut removed = entries.remove(index);
        for entry in entries.iter_mut().skip(index) {
            entry.position -= 1;
        }
        drop(entries);
        self.entry_index.remove(&entry_id);

        removed.status = final_status;
        info!(
            creator = %creator_id,
            fan = %removed.fan_id,
            status = ?removed.status,
            "queue entry removed"
        );
        Ok(removed)
    }

    /// Expires every waiting entry whose window has passed, compacting each
    /// affected queue. Returns the expired entries.
    pub fn expire_stale(&self) -> Vec<QueueEntry> {
        self.expire_stale_at(Utc::now())
    }

    pub fn expire_stale_at(&self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let mut expired = Vec::new();
        for queue in self.queues.iter() {
            let mut entries = queue.lock();
            let mut index = 0;
            while index < entries.len() {
                if entries[index].expires_at <= now {
                    let mut entry = entries.remove(index);
                    for later in entries.iter_mut().skip(index) {
                        later.position -= 1;
                    }
                    self.entry_index.remove(&entry.id);
                    entry.status = QueueStatus::Expired;
                    expired.push(entry);
                } else {
                    index += 1;
                }
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale queue entries");
        }
        expired
    }

    /// Current 1-based position of a fan in a creator's queue.
    pub fn position(&self, creator_id: AccountId, fan_id: AccountId) -> Option<u32> {
        let queue = self.queues.get(&creator_id)?;
        let entries = queue.lock();
        entries.iter().find(|e| e.fan_id == fan_id).map(|e| e.position)
    }

    /// Number of fans currently waiting for a creator.
    pub fn depth(&self, creator_id: AccountId) -> usize {
        self.queues
            .get(&creator_id)
            .map(|q| q.lock().len())
            .unwrap_or(0)
    }

    /// Snapshot of a creator's waiting list, position order.
    pub fn entries(&self, creator_id: AccountId) -> Vec<QueueEntry> {
        self.queues
            .get(&creator_id)
            .map(|q| q.lock().clone())
            .unwrap_or_default()
    }
}
