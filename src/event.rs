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

//! Payment events consumed from the external processor.
//!
//! Delivery is at-least-once: the same event may arrive any number of times.
//! The only valid entry point for these is
//! [`TransactionEngine::process_payment_event`](crate::TransactionEngine::process_payment_event),
//! which routes them through the idempotency guard.

use crate::base::{AccountId, ExternalEventId, Tokens};
use serde::{Deserialize, Serialize};

/// What the processor says happened to real money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    /// Tokens were bought; credit the account.
    Purchase,
    /// A purchase was refunded; claw the tokens back.
    Refund,
    /// The card issuer reversed a purchase; claw the tokens back.
    Chargeback,
}

/// One webhook-delivered payment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: ExternalEventId,
    pub account_id: AccountId,
    pub amount_tokens: Tokens,
    pub kind: PaymentEventKind,
}
