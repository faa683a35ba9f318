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

//! Property-based tests for the ledger engine.
//!
//! These verify invariants that must hold for any sequence of operations:
//! non-negative balances, paired entries summing to zero, per-entry delta
//! consistency, queue position contiguity, and idempotent event replay.

use proptest::prelude::*;
use token_ledger::{
    AccountId, CallQueue, EntryStatus, ExternalEventId, PaymentEvent, PaymentEventKind,
    TransactionEngine,
};

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// A positive token amount.
fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=10_000
}

/// One random engine operation over a small account set.
#[derive(Debug, Clone)]
enum Op {
    Purchase { account: u64, amount: i64, event: u32 },
    Debit { account: u64, amount: i64 },
    Transfer { from: u64, to: u64, amount: i64 },
    Adjust { account: u64, amount: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=5, arb_amount(), any::<u32>())
            .prop_map(|(account, amount, event)| Op::Purchase {
                account,
                amount,
                event
            }),
        (1u64..=5, arb_amount()).prop_map(|(account, amount)| Op::Debit { account, amount }),
        (1u64..=5, 1u64..=5, arb_amount())
            .prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
        (1u64..=5, -5_000i64..=5_000).prop_map(|(account, amount)| Op::Adjust {
            account,
            amount
        }),
    ]
}

fn apply(engine: &TransactionEngine, op: &Op, seq: usize) {
    match op {
        Op::Purchase {
            account,
            amount,
            event,
        } => {
            // Sequence number keeps event ids unique per run.
            let _ = engine.process_payment_event(PaymentEvent {
                event_id: ExternalEventId::new(format!("evt_{seq}_{event}")),
                account_id: AccountId(*account),
                amount_tokens: *amount,
                kind: PaymentEventKind::Purchase,
            });
        }
        Op::Debit { account, amount } => {
            let _ = engine.debit(AccountId(*account), *amount, "spend");
        }
        Op::Transfer { from, to, amount } => {
            let _ = engine.transfer(AccountId(*from), AccountId(*to), *amount, "tip");
        }
        Op::Adjust { account, amount } => {
            let _ = engine.admin_adjust(AccountId(*account), *amount, "adjust");
        }
    }
}

// =============================================================================
// Engine Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Balances never go negative, whatever the operation mix.
    #[test]
    fn balances_never_negative(ops in prop::collection::vec(arb_op(), 1..60)) {
        let engine = TransactionEngine::new();
        for (seq, op) in ops.iter().enumerate() {
            apply(&engine, op, seq);
            for snapshot in engine.snapshots() {
                prop_assert!(
                    snapshot.balance >= 0,
                    "account {} went negative: {}",
                    snapshot.account_id,
                    snapshot.balance
                );
            }
        }
    }

    /// Every entry satisfies balance_after - balance_before == amount.
    #[test]
    fn entry_deltas_are_consistent(ops in prop::collection::vec(arb_op(), 1..60)) {
        let engine = TransactionEngine::new();
        for (seq, op) in ops.iter().enumerate() {
            apply(&engine, op, seq);
        }
        for entry in engine.ledger().entries() {
            prop_assert_eq!(entry.balance_after - entry.balance_before, entry.amount);
        }
    }

    /// Entries sharing a ref_id always sum to zero.
    #[test]
    fn ref_groups_sum_to_zero(ops in prop::collection::vec(arb_op(), 1..60)) {
        let engine = TransactionEngine::new();
        for (seq, op) in ops.iter().enumerate() {
            apply(&engine, op, seq);
        }

        let mut sums = std::collections::HashMap::new();
        for entry in engine.ledger().entries() {
            if entry.status == EntryStatus::Completed {
                if let Some(ref_id) = entry.ref_id {
                    *sums.entry(ref_id).or_insert(0i64) += entry.amount;
                }
            }
        }
        for (ref_id, sum) in sums {
            prop_assert_eq!(sum, 0, "ref {} does not cancel", ref_id);
        }
    }

    /// The ledger's net total always matches the sum of balances.
    #[test]
    fn ledger_and_balances_agree(ops in prop::collection::vec(arb_op(), 1..60)) {
        let engine = TransactionEngine::new();
        for (seq, op) in ops.iter().enumerate() {
            apply(&engine, op, seq);
        }
        prop_assert_eq!(engine.ledger().net_total(), engine.balances_total());
    }

    /// Lifetime counters never decrease and never lag the balance.
    #[test]
    fn lifetime_counters_are_monotonic(ops in prop::collection::vec(arb_op(), 1..40)) {
        let engine = TransactionEngine::new();
        let mut last: std::collections::HashMap<u64, (i64, i64, i64)> =
            std::collections::HashMap::new();

        for (seq, op) in ops.iter().enumerate() {
            apply(&engine, op, seq);
            for snapshot in engine.snapshots() {
                let current = (
                    snapshot.lifetime_purchased,
                    snapshot.lifetime_spent,
                    snapshot.lifetime_earned,
                );
                if let Some(previous) = last.get(&snapshot.account_id.0) {
                    prop_assert!(current.0 >= previous.0);
                    prop_assert!(current.1 >= previous.1);
                    prop_assert!(current.2 >= previous.2);
                }
                last.insert(snapshot.account_id.0, current);
            }
        }
    }
}

// =============================================================================
// Idempotent Replay
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Redelivering an event any number of times changes the balance once.
    #[test]
    fn replayed_events_apply_once(
        amount in arb_amount(),
        redeliveries in 1usize..6,
    ) {
        let engine = TransactionEngine::new();
        let event = PaymentEvent {
            event_id: ExternalEventId::new("evt_replay"),
            account_id: AccountId(1),
            amount_tokens: amount,
            kind: PaymentEventKind::Purchase,
        };

        let first = engine.process_payment_event(event.clone()).unwrap();
        for _ in 0..redeliveries {
            let outcome = engine.process_payment_event(event.clone()).unwrap();
            prop_assert!(outcome.replayed);
            prop_assert_eq!(outcome.entry.id, first.entry.id);
        }

        prop_assert_eq!(engine.balance(AccountId(1)).unwrap(), amount);
        prop_assert_eq!(engine.ledger().len(), 1);
    }
}

// =============================================================================
// Queue Contiguity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Active positions are exactly {1..n} after any enqueue/dequeue mix.
    #[test]
    fn queue_positions_stay_contiguous(
        joins in prop::collection::vec(1u64..=30, 1..25),
        leave_picks in prop::collection::vec(any::<prop::sample::Index>(), 0..15),
    ) {
        let creator = AccountId(1);
        let queue = CallQueue::new(15);
        let mut ids = Vec::new();

        for fan in &joins {
            if let Ok(entry) = queue.enqueue(creator, AccountId(100 + fan), 100) {
                ids.push(entry.id);
            }
        }
        for pick in &leave_picks {
            if ids.is_empty() {
                break;
            }
            let id = ids.remove(pick.index(ids.len()));
            queue.dequeue(id).unwrap();
        }

        let entries = queue.entries(creator);
        for (i, entry) in entries.iter().enumerate() {
            prop_assert_eq!(entry.position, i as u32 + 1);
        }
        prop_assert_eq!(entries.len(), ids.len());
    }
}
