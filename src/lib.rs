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

//! # Token Ledger
//!
//! A token ledger and settlement engine for a virtual currency used to pay
//! for calls, tips, gifts, and pay-per-view content, with creator payouts
//! on the other side.
//!
//! ## Core Components
//!
//! - [`TransactionEngine`]: the only writer of balances and ledger entries;
//!   atomic debit/credit/transfer and session settlement
//! - [`Ledger`]: append-only double-entry log with a unique index on
//!   external event ids
//! - [`IdempotencyGuard`]: exactly-once application of at-least-once
//!   payment events
//! - [`ReconciliationAuditor`]: scheduled drift detection across ledger,
//!   balances, and the external processor
//! - [`PayoutBatcher`]: threshold-driven batching of creator earnings
//! - [`PricingCalculator`] and [`CallQueue`]: surge pricing and the
//!   position-ordered waiting list feeding the billing path
//!
//! ## Example
//!
//! ```
//! use token_ledger::{
//!     AccountId, ExternalEventId, PaymentEvent, PaymentEventKind, TransactionEngine,
//! };
//!
//! let engine = TransactionEngine::new();
//!
//! // Credit a fan from an external purchase event (idempotent).
//! let event = PaymentEvent {
//!     event_id: ExternalEventId::new("evt_1"),
//!     account_id: AccountId(1),
//!     amount_tokens: 500,
//!     kind: PaymentEventKind::Purchase,
//! };
//! engine.process_payment_event(event).unwrap();
//!
//! // Tip a creator: one atomic transfer, two paired ledger entries.
//! engine.transfer(AccountId(1), AccountId(2), 30, "tip").unwrap();
//!
//! assert_eq!(engine.balance(AccountId(1)).unwrap(), 470);
//! assert_eq!(engine.balance(AccountId(2)).unwrap(), 30);
//! ```
//!
//! ## Thread Safety
//!
//! Accounts are the unit of locking: operations on different accounts run
//! fully in parallel, operations on the same account serialize on its
//! mutex. The ledger is append-only and safe for concurrent readers.

pub mod account;
mod base;
pub mod config;
mod engine;
pub mod entry;
pub mod error;
mod event;
mod idempotency;
mod ledger;
pub mod payout;
pub mod pricing;
pub mod queue;
pub mod reconciliation;

pub use account::{Account, AccountSnapshot};
pub use base::{AccountId, EntryId, ExternalEventId, QueueEntryId, SessionId, Tokens};
pub use config::Settings;
pub use engine::{
    IntegrityEvent, SessionEnd, SessionReceipt, TransactionEngine, TransferReceipt,
};
pub use entry::{EntryDraft, EntryKind, EntryStatus, LedgerEntry};
pub use error::{LedgerError, Result};
pub use event::{PaymentEvent, PaymentEventKind};
pub use idempotency::{IdempotencyGuard, ProcessOutcome};
pub use ledger::Ledger;
pub use payout::{BatchStatus, PayoutBatch, PayoutBatcher};
pub use pricing::{CreatorPricing, PeakWindow, PricingCalculator, Quote, ServiceType};
pub use queue::{CallQueue, QueueEntry, QueueStatus};
pub use reconciliation::{
    CheckStatus, CheckType, ReconciliationAuditor, ReconciliationRecord, ResolutionNote,
};
