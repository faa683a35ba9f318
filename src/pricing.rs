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

//! Dynamic session pricing.
//!
//! The effective per-minute rate is
//! `base_rate * peak_multiplier * demand_multiplier * (1 - bulk_discount)`,
//! rounded to whole tokens. Peak windows are creator-configured per weekday;
//! the demand multiplier follows the creator's live queue depth.

use crate::base::{AccountId, Tokens};
use crate::queue::CallQueue;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Billable session kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    VideoCall,
    VoiceCall,
}

/// One peak-hour window on one weekday; `[start_hour, end_hour)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakWindow {
    pub weekday: Weekday,
    pub start_hour: u32,
    pub end_hour: u32,
    pub multiplier: Decimal,
}

impl PeakWindow {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        at.weekday() == self.weekday && (self.start_hour..self.end_hour).contains(&at.hour())
    }
}

/// Creator-configured rates and peak windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorPricing {
    /// Tokens per minute for video calls.
    pub video_rate: Tokens,
    /// Tokens per minute for voice calls.
    pub voice_rate: Tokens,
    pub peak_windows: Vec<PeakWindow>,
}

impl Default for CreatorPricing {
    fn default() -> Self {
        Self {
            video_rate: 20,
            voice_rate: 10,
            peak_windows: Vec::new(),
        }
    }
}

impl CreatorPricing {
    fn base_rate(&self, service: ServiceType) -> Tokens {
        match service {
            ServiceType::VideoCall => self.video_rate,
            ServiceType::VoiceCall => self.voice_rate,
        }
    }
}

/// A priced session offer.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    /// Effective rate after multipliers and discount, whole tokens.
    pub rate_per_minute: Tokens,
    /// Projected cost for the requested duration.
    pub estimated_total: Tokens,
    pub peak_multiplier: Decimal,
    pub demand_multiplier: Decimal,
    pub bulk_discount: Decimal,
}

/// Computes effective session prices from live queue depth and time of day.
pub struct PricingCalculator {
    configs: DashMap<AccountId, CreatorPricing>,
    queue: Arc<CallQueue>,
}

impl PricingCalculator {
    pub fn new(queue: Arc<CallQueue>) -> Self {
        Self {
            configs: DashMap::new(),
            queue,
        }
    }

    /// Installs a creator's pricing configuration.
    pub fn configure(&self, creator_id: AccountId, pricing: CreatorPricing) {
        self.configs.insert(creator_id, pricing);
    }

    /// Prices a session for the current instant.
    pub fn quote(
        &self,
        creator_id: AccountId,
        service: ServiceType,
        duration_minutes: u32,
    ) -> Quote {
        self.quote_at(creator_id, service, duration_minutes, Utc::now())
    }

    /// Prices a session as of `at` (time drives the peak multiplier).
    pub fn quote_at(
        &self,
        creator_id: AccountId,
        service: ServiceType,
        duration_minutes: u32,
        at: DateTime<Utc>,
    ) -> Quote {
        let pricing = self
            .configs
            .get(&creator_id)
            .map(|c| c.clone())
            .unwrap_or_default();

        let peak_multiplier = pricing
            .peak_windows
            .iter()
            .find(|w| w.contains(at))
            .map(|w| w.multiplier)
            .unwrap_or(Decimal::ONE);
        let demand_multiplier = demand_multiplier(self.queue.depth(creator_id));
        let bulk_discount = bulk_discount(duration_minutes);

        let rate = Decimal::from(pricing.base_rate(service))
            * peak_multiplier
            * demand_multiplier
            * (Decimal::ONE - bulk_discount);
        let rate_per_minute = rate.round().to_i64().unwrap_or(Tokens::MAX);

        Quote {
            rate_per_minute,
            estimated_total: rate_per_minute * Tokens::from(duration_minutes.max(1)),
            peak_multiplier,
            demand_multiplier,
            bulk_discount,
        }
    }
}

/// Surcharge driven by current queue depth.
fn demand_multiplier(depth: usize) -> Decimal {
    if depth > 5 {
        dec!(1.3)
    } else if depth > 2 {
        dec!(1.1)
    } else {
        Decimal::ONE
    }
}

/// Discount for longer bookings.
fn bulk_discount(duration_minutes: u32) -> Decimal {
    if duration_minutes >= 60 {
        dec!(0.10)
    } else if duration_minutes >= 30 {
        dec!(0.05)
    } else {
        Decimal::ZERO
    }
}
