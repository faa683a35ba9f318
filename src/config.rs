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

//! Engine settings with production defaults.

use crate::base::Tokens;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Tunables for payouts and queues. Every field has a default, so partial
/// configuration files deserialize cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum unsettled earnings before a payout batch is created.
    pub min_payout_tokens: Tokens,
    /// Platform's cut of each payout, as a fraction.
    pub platform_fee_rate: Decimal,
    /// USD value of one token.
    pub usd_per_token: Decimal,
    /// Queue entries expire this long after joining.
    pub queue_ttl_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_payout_tokens: 5_000,
            platform_fee_rate: dec!(0.20),
            usd_per_token: dec!(0.05),
            queue_ttl_minutes: 15,
        }
    }
}
