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

//! Scheduled batching of creator earnings into payouts.
//!
//! Each run scans unsettled `Earn` entries per creator; when they reach the
//! creator's payout threshold, the tokens are reserved out of the balance
//! (a `Payout` ledger entry), the entries are linked to a new batch, and the
//! batch is handed to the external transfer step. A failed transfer returns
//! the tokens and unlinks the entries, so nothing is lost — the next run
//! picks them up again. Interrupting a run mid-way leaves some creators
//! unbatched for the next invocation; nothing is half-applied per creator.

use crate::base::{AccountId, EntryId, Tokens};
use crate::engine::TransactionEngine;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

/// A grouped settlement of one creator's accumulated earnings.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutBatch {
    pub id: Uuid,
    pub creator_id: AccountId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub tokens_earned: Tokens,
    pub usd_amount: Decimal,
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
    pub status: BatchStatus,
    pub entry_ids: Vec<EntryId>,
    pub created_at: DateTime<Utc>,
}

/// Aggregates unsettled earnings into payout batches on a schedule.
pub struct PayoutBatcher {
    engine: Arc<TransactionEngine>,
    batches: DashMap<Uuid, PayoutBatch>,
    /// Earn entries already claimed by a batch. Entries stay immutable; this
    /// side index is the batch linkage.
    settled: DashMap<EntryId, Uuid>,
    thresholds: DashMap<AccountId, Tokens>,
    default_threshold: Tokens,
    usd_per_token: Decimal,
    fee_rate: Decimal,
    /// Serializes runs; two overlapping schedulers must not double-batch.
    run_lock: Mutex<()>,
}

impl PayoutBatcher {
    pub fn new(
        engine: Arc<TransactionEngine>,
        default_threshold: Tokens,
        usd_per_token: Decimal,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            engine,
            batches: DashMap::new(),
            settled: DashMap::new(),
            thresholds: DashMap::new(),
            default_threshold,
            usd_per_token,
            fee_rate,
            run_lock: Mutex::new(()),
        }
    }

    /// Overrides the payout threshold for one creator.
    pub fn set_threshold(&self, creator_id: AccountId, tokens: Tokens) {
        self.thresholds.insert(creator_id, tokens);
    }

    pub fn threshold_for(&self, creator_id: AccountId) -> Tokens {
        self.thresholds
            .get(&creator_id)
            .map(|t| *t)
            .unwrap_or(self.default_threshold)
    }

    /// Earn tokens not yet claimed by any batch.
    pub fn unsettled_earnings(&self, creator_id: AccountId) -> Tokens {
        self.engine
            .ledger()
            .earns_for(creator_id)
            .iter()
            .filter(|e| !self.settled.contains_key(&e.id))
            .map(|e| e.amount)
            .sum()
    }

    /// One scheduled batching pass. Returns the batches created.
    pub fn run(&self) -> Result<Vec<PayoutBatch>> {
        self.run_at(Utc::now())
    }

    pub fn run_at(&self, now: DateTime<Utc>) -> Result<Vec<PayoutBatch>> {
        let _guard = self.run_lock.lock();
        let ledger = self.engine.ledger();
        let mut created = Vec::new();

        for creator_id in ledger.earning_accounts() {
            let unsettled: Vec<_> = ledger
                .earns_for(creator_id)
                .into_iter()
                .filter(|e| !self.settled.contains_key(&e.id))
                .collect();
            let total: Tokens = unsettled.iter().map(|e| e.amount).sum();
            if total < self.threshold_for(creator_id) || total == 0 {
                continue;
            }

            let batch_id = Uuid::new_v4();

            // Reserve the tokens before linking anything; a creator who has
            // already spent their earnings is skipped until their balance
            // covers the batch again.
            match self
                .engine
                .payout_debit(creator_id, total, batch_id, "payout reserve")
            {
                Ok(_) => {}
                Err(LedgerError::InsufficientBalance { required, available }) => {
                    warn!(
                        creator = %creator_id,
                        required,
                        available,
                        "payout skipped: earnings already spent"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }

            let period_start = unsettled
                .iter()
                .map(|e| e.created_at)
                .min()
                .unwrap_or(now);
            let usd_amount = (Decimal::from(total) * self.usd_per_token).round_dp(2);
            let platform_fee = (usd_amount * self.fee_rate).round_dp(2);
            let entry_ids: Vec<EntryId> = unsettled.iter().map(|e| e.id).collect();

            for id in &entry_ids {
                self.settled.insert(*id, batch_id);
            }
            let batch = PayoutBatch {
                id: batch_id,
                creator_id,
                period_start,
                period_end: now,
                tokens_earned: total,
                usd_amount,
                platform_fee,
                net_amount: usd_amount - platform_fee,
                status: BatchStatus::Pending,
                entry_ids,
                created_at: now,
            };
            info!(
                creator = %creator_id,
                batch = %batch_id,
                tokens = total,
                net_usd = %batch.net_amount,
                "payout batch created"
            );
            self.batches.insert(batch_id, batch.clone());
            created.push(batch);
        }

        Ok(created)
    }

    /// Marks a batch as handed to the external transfer step.
    pub fn begin_transfer(&self, batch_id: Uuid) -> Result<PayoutBatch> {
        self.transition(batch_id, BatchStatus::Pending, BatchStatus::Processing)
    }

    /// Records external confirmation; the batch is settled for good.
    pub fn mark_paid(&self, batch_id: Uuid) -> Result<PayoutBatch> {
        let batch = self.transition(batch_id, BatchStatus::Processing, BatchStatus::Paid)?;
        info!(batch = %batch_id, creator = %batch.creator_id, "payout batch paid");
        Ok(batch)
    }

    /// Records external failure: tokens go back to the creator and the
    /// entries are unlinked so the next run retries them.
    pub fn mark_failed(&self, batch_id: Uuid) -> Result<PayoutBatch> {
        let batch = self.transition(batch_id, BatchStatus::Processing, BatchStatus::Failed)?;
        self.engine.payout_return(
            batch.creator_id,
            batch.tokens_earned,
            batch.id,
            "payout failed, tokens returned",
        )?;
        for id in &batch.entry_ids {
            self.settled.remove(id);
        }
        warn!(
            batch = %batch_id,
            creator = %batch.creator_id,
            tokens = batch.tokens_earned,
            "payout batch failed; earnings remain eligible"
        );
        Ok(batch)
    }

    fn transition(
        &self,
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<PayoutBatch> {
        let mut batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(LedgerError::BatchNotFound)?;
        if batch.status != from {
            return Err(LedgerError::InvalidBatchState);
        }
        batch.status = to;
        Ok(batch.clone())
    }

    pub fn batch(&self, batch_id: Uuid) -> Option<PayoutBatch> {
        self.batches.get(&batch_id).map(|b| b.clone())
    }

    /// All batches, oldest first.
    pub fn batches(&self) -> Vec<PayoutBatch> {
        let mut all: Vec<_> = self.batches.iter().map(|b| b.clone()).collect();
        all.sort_by_key(|b| b.created_at);
        all
    }
}
