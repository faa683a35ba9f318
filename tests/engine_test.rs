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

//! Engine public API integration tests.

use token_ledger::{
    AccountId, EntryKind, EntryStatus, ExternalEventId, LedgerError, PaymentEvent,
    PaymentEventKind, SessionEnd, SessionId, TransactionEngine,
};

const FAN: AccountId = AccountId(1);
const CREATOR: AccountId = AccountId(2);

fn purchase(account: AccountId, event: &str, amount: i64) -> PaymentEvent {
    PaymentEvent {
        event_id: ExternalEventId::new(event),
        account_id: account,
        amount_tokens: amount,
        kind: PaymentEventKind::Purchase,
    }
}

fn engine_with_balance(account: AccountId, amount: i64) -> TransactionEngine {
    let engine = TransactionEngine::new();
    engine
        .process_payment_event(purchase(account, "seed", amount))
        .unwrap();
    engine
}

// === Debit / Credit ===

#[test]
fn purchase_creates_account_and_credits_it() {
    let engine = TransactionEngine::new();
    engine
        .process_payment_event(purchase(FAN, "evt_1", 500))
        .unwrap();

    assert_eq!(engine.balance(FAN).unwrap(), 500);
    let snapshot = engine.snapshot(FAN).unwrap();
    assert_eq!(snapshot.lifetime_purchased, 500);
    assert_eq!(snapshot.lifetime_spent, 0);
}

#[test]
fn debit_insufficient_balance_leaves_balance_unchanged() {
    // Balance 100, debit 150 fails, balance stays 100.
    let engine = engine_with_balance(FAN, 100);

    let result = engine.debit(FAN, 150, "call");
    assert_eq!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance {
            required: 150,
            available: 100
        }
    );
    assert_eq!(engine.balance(FAN).unwrap(), 100);

    // The failed debit wrote nothing.
    assert_eq!(engine.ledger().len(), 1);
}

#[test]
fn debit_on_unknown_account_fails() {
    let engine = TransactionEngine::new();
    let result = engine.debit(AccountId(99), 10, "call");
    assert_eq!(result.unwrap_err(), LedgerError::AccountNotFound(AccountId(99)));
}

#[test]
fn debit_records_balance_snapshots() {
    let engine = engine_with_balance(FAN, 100);
    let entry = engine.debit(FAN, 30, "tip").unwrap();

    assert_eq!(entry.kind, EntryKind::Spend);
    assert_eq!(entry.amount, -30);
    assert_eq!(entry.balance_before, 100);
    assert_eq!(entry.balance_after, 70);
    assert_eq!(entry.balance_after - entry.balance_before, entry.amount);
}

#[test]
fn credit_creates_missing_account() {
    let engine = TransactionEngine::new();
    let entry = engine.credit(CREATOR, 50, "promo grant").unwrap();
    assert_eq!(entry.amount, 50);
    assert_eq!(engine.balance(CREATOR).unwrap(), 50);
}

#[test]
fn zero_amounts_are_rejected() {
    let engine = engine_with_balance(FAN, 100);
    assert_eq!(
        engine.debit(FAN, 0, "noop").unwrap_err(),
        LedgerError::InvalidAmount
    );
    assert_eq!(
        engine.credit(FAN, -5, "noop").unwrap_err(),
        LedgerError::InvalidAmount
    );
}

// === Transfers ===

#[test]
fn transfer_moves_tokens_and_pairs_entries() {
    // fan=100, creator=50; tip of 30 -> fan=70, creator=80.
    let engine = TransactionEngine::new();
    engine
        .process_payment_event(purchase(FAN, "evt_1", 100))
        .unwrap();
    engine
        .process_payment_event(purchase(CREATOR, "evt_2", 50))
        .unwrap();

    let receipt = engine.transfer(FAN, CREATOR, 30, "tip").unwrap();

    assert_eq!(engine.balance(FAN).unwrap(), 70);
    assert_eq!(engine.balance(CREATOR).unwrap(), 80);

    // Two entries, same ref, summing to zero.
    assert_eq!(receipt.debit.ref_id, Some(receipt.ref_id));
    assert_eq!(receipt.credit.ref_id, Some(receipt.ref_id));
    assert_eq!(receipt.debit.amount + receipt.credit.amount, 0);
    assert_eq!(receipt.debit.kind, EntryKind::Spend);
    assert_eq!(receipt.credit.kind, EntryKind::Earn);
}

#[test]
fn transfer_with_insufficient_balance_touches_neither_account() {
    let engine = TransactionEngine::new();
    engine
        .process_payment_event(purchase(FAN, "evt_1", 20))
        .unwrap();
    engine
        .process_payment_event(purchase(CREATOR, "evt_2", 50))
        .unwrap();

    let result = engine.transfer(FAN, CREATOR, 30, "tip");
    assert!(matches!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance { .. }
    ));
    assert_eq!(engine.balance(FAN).unwrap(), 20);
    assert_eq!(engine.balance(CREATOR).unwrap(), 50);
    assert_eq!(engine.ledger().len(), 2); // just the purchases
}

#[test]
fn transfer_to_self_is_rejected() {
    let engine = engine_with_balance(FAN, 100);
    assert_eq!(
        engine.transfer(FAN, FAN, 10, "tip").unwrap_err(),
        LedgerError::SelfTransfer
    );
}

#[test]
fn transfer_updates_lifetime_counters() {
    let engine = engine_with_balance(FAN, 100);
    engine.transfer(FAN, CREATOR, 40, "gift").unwrap();

    assert_eq!(engine.snapshot(FAN).unwrap().lifetime_spent, 40);
    assert_eq!(engine.snapshot(CREATOR).unwrap().lifetime_earned, 40);
}

// === Idempotent payment events ===

#[test]
fn duplicate_event_credits_exactly_once() {
    // evt_1 delivered twice credits 500, not 1000.
    let engine = TransactionEngine::new();

    let first = engine
        .process_payment_event(purchase(FAN, "evt_1", 500))
        .unwrap();
    let second = engine
        .process_payment_event(purchase(FAN, "evt_1", 500))
        .unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.entry.id, second.entry.id);
    assert_eq!(engine.balance(FAN).unwrap(), 500);
    assert_eq!(engine.ledger().len(), 1);
}

#[test]
fn refund_debits_the_purchase() {
    let engine = engine_with_balance(FAN, 500);

    let outcome = engine
        .process_payment_event(PaymentEvent {
            event_id: ExternalEventId::new("evt_refund"),
            account_id: FAN,
            amount_tokens: 200,
            kind: PaymentEventKind::Refund,
        })
        .unwrap();

    assert_eq!(outcome.entry.kind, EntryKind::Refund);
    assert_eq!(outcome.entry.amount, -200);
    assert_eq!(engine.balance(FAN).unwrap(), 300);
}

#[test]
fn chargeback_exceeding_balance_records_failed_entry() {
    let engine = engine_with_balance(FAN, 100);
    engine.debit(FAN, 80, "spent already").unwrap();

    let outcome = engine
        .process_payment_event(PaymentEvent {
            event_id: ExternalEventId::new("evt_cb"),
            account_id: FAN,
            amount_tokens: 100,
            kind: PaymentEventKind::Chargeback,
        })
        .unwrap();

    // Balance untouched, event pinned as failed, auditor notified.
    assert_eq!(outcome.entry.status, EntryStatus::Failed);
    assert_eq!(outcome.entry.amount, 0);
    assert_eq!(engine.balance(FAN).unwrap(), 20);

    let violations = engine.drain_integrity_events();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].account_id, FAN);

    // Redelivery replays the failed outcome without a second violation.
    let replay = engine
        .process_payment_event(PaymentEvent {
            event_id: ExternalEventId::new("evt_cb"),
            account_id: FAN,
            amount_tokens: 100,
            kind: PaymentEventKind::Chargeback,
        })
        .unwrap();
    assert!(replay.replayed);
    assert!(engine.drain_integrity_events().is_empty());
}

// === Session settlement ===

#[test]
fn session_bills_rounded_up_minutes() {
    // 2.3 minutes at 10/min bills ceil(2.3) = 3 minutes = 30.
    let engine = engine_with_balance(FAN, 100);

    let receipt = engine
        .settle_session(SessionEnd {
            session_id: SessionId::new("sess_1"),
            fan_id: FAN,
            creator_id: CREATOR,
            duration_minutes: 2.3,
            rate_per_minute: 10,
        })
        .unwrap();

    assert_eq!(receipt.billed_minutes, 3);
    assert_eq!(receipt.total_cost, 30);
    assert_eq!(engine.balance(FAN).unwrap(), 70);
    assert_eq!(engine.balance(CREATOR).unwrap(), 30);
}

#[test]
fn sub_minute_session_bills_one_minute() {
    let engine = engine_with_balance(FAN, 100);

    let receipt = engine
        .settle_session(SessionEnd {
            session_id: SessionId::new("sess_2"),
            fan_id: FAN,
            creator_id: CREATOR,
            duration_minutes: 0.4,
            rate_per_minute: 10,
        })
        .unwrap();

    assert_eq!(receipt.billed_minutes, 1);
    assert_eq!(receipt.total_cost, 10);
}

#[test]
fn session_the_fan_cannot_afford_fails_cleanly() {
    let engine = engine_with_balance(FAN, 25);

    let result = engine.settle_session(SessionEnd {
        session_id: SessionId::new("sess_3"),
        fan_id: FAN,
        creator_id: CREATOR,
        duration_minutes: 5.0,
        rate_per_minute: 10,
    });

    assert!(matches!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance { .. }
    ));
    assert_eq!(engine.balance(FAN).unwrap(), 25);
}

// === Admin adjustments ===

#[test]
fn admin_adjust_credits_and_debits() {
    let engine = engine_with_balance(FAN, 100);

    let up = engine.admin_adjust(FAN, 50, "goodwill").unwrap();
    assert_eq!(up.kind, EntryKind::AdminAdjust);
    assert_eq!(engine.balance(FAN).unwrap(), 150);

    engine.admin_adjust(FAN, -30, "correction").unwrap();
    assert_eq!(engine.balance(FAN).unwrap(), 120);
}

#[test]
fn negative_admin_adjust_respects_floor() {
    let engine = engine_with_balance(FAN, 100);
    let result = engine.admin_adjust(FAN, -150, "too much");
    assert!(matches!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance { .. }
    ));
    assert_eq!(engine.balance(FAN).unwrap(), 100);
}

// === History ===

#[test]
fn history_returns_newest_first() {
    let engine = engine_with_balance(FAN, 100);
    engine.debit(FAN, 10, "first").unwrap();
    engine.debit(FAN, 20, "second").unwrap();

    let history = engine.history(FAN, 2);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, "second");
    assert_eq!(history[1].reason, "first");
}

#[test]
fn every_entry_satisfies_the_delta_invariant() {
    let engine = engine_with_balance(FAN, 1000);
    engine.transfer(FAN, CREATOR, 100, "tip").unwrap();
    engine.debit(FAN, 50, "ppv unlock").unwrap();
    engine.admin_adjust(CREATOR, -20, "fee correction").unwrap();

    for entry in engine.ledger().entries() {
        assert_eq!(entry.balance_after - entry.balance_before, entry.amount);
    }
}
