//! Virtual account of the local connector.
//!
//! Drawdown is measured against the balance:
//!
//! ```text
//!   draw_down_rate = max(0, -(profit_loss + asset_profit_loss) / balance)
//!   draw_down      = max(0, -(profit_loss + asset_profit_loss))
//! ```
//!
//! Both keep their running maximum for the session. One [`AccountSample`] is
//! kept per calendar day; days without any update are back-filled with the
//! last known values.

use serde::{Deserialize, Serialize};
use sx_core::config::AccountConfig;
use sx_core::time_util::{day_index, day_start};
use sx_core::types::AccountSignal;
use tracing::debug;

/// End-of-day snapshot of the account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSample {
    /// Days since epoch.
    pub day: i64,
    pub timestamp: f64,
    pub equity: f64,
    pub profit_loss: f64,
    pub draw_down_rate: f64,
    pub draw_down: f64,
}

#[derive(Debug, Clone)]
pub struct VirtualAccount {
    pub currency: String,
    pub precision: u32,
    /// Realized margin balance.
    pub balance: f64,
    /// Margin locked by open positions.
    pub used_margin: f64,
    /// Unrealized profit or loss of open positions.
    pub profit_loss: f64,
    /// Unrealized profit or loss of held spot assets.
    pub asset_profit_loss: f64,

    pub draw_down_rate: f64,
    pub draw_down: f64,
    pub max_draw_down_rate: f64,
    pub max_draw_down: f64,

    samples: Vec<AccountSample>,
}

impl VirtualAccount {
    pub fn new(config: &AccountConfig) -> Self {
        Self {
            currency: config.effective_currency(),
            precision: config.effective_precision(),
            balance: config.effective_balance(),
            used_margin: 0.0,
            profit_loss: 0.0,
            asset_profit_loss: 0.0,
            draw_down_rate: 0.0,
            draw_down: 0.0,
            max_draw_down_rate: 0.0,
            max_draw_down: 0.0,
            samples: Vec::new(),
        }
    }

    pub fn equity(&self) -> f64 {
        self.balance + self.profit_loss + self.asset_profit_loss
    }

    pub fn free_margin(&self) -> f64 {
        self.balance + self.profit_loss - self.used_margin
    }

    pub fn samples(&self) -> &[AccountSample] {
        &self.samples
    }

    /// Recompute the current drawdown and raise the running maxima.
    pub fn update_draw_down(&mut self) {
        let pl = self.profit_loss + self.asset_profit_loss;
        self.draw_down = (-pl).max(0.0);
        self.draw_down_rate = if self.balance > 0.0 { (-pl / self.balance).max(0.0) } else { 0.0 };
        self.max_draw_down = self.max_draw_down.max(self.draw_down);
        self.max_draw_down_rate = self.max_draw_down_rate.max(self.draw_down_rate);
    }

    fn sample(&self, day: i64, timestamp: f64) -> AccountSample {
        AccountSample {
            day,
            timestamp,
            equity: self.equity(),
            profit_loss: self.profit_loss + self.asset_profit_loss,
            draw_down_rate: self.draw_down_rate,
            draw_down: self.draw_down,
        }
    }

    /// Refresh the sample of the day of `timestamp`, back-filling every
    /// skipped day with the previous sample.
    pub fn update_samples(&mut self, timestamp: f64) {
        let day = day_index(timestamp);
        let Some(last) = self.samples.last().copied() else {
            self.samples.push(self.sample(day, timestamp));
            return;
        };
        if day < last.day {
            return;
        }
        if day == last.day {
            let current = self.sample(day, timestamp);
            if let Some(slot) = self.samples.last_mut() {
                *slot = current;
            }
            return;
        }
        for skipped in last.day + 1..day {
            self.samples.push(AccountSample { day: skipped, timestamp: day_start(skipped), ..last });
        }
        self.samples.push(self.sample(day, timestamp));
        debug!("[local] account sample day {day} equity={:.2}", self.equity());
    }

    pub fn to_signal(&self) -> AccountSignal {
        AccountSignal {
            currency: self.currency.clone(),
            balance: self.balance,
            free_margin: self.free_margin(),
            reserved_margin: self.used_margin,
            margin_factor: 1.0,
            profit_loss: self.profit_loss,
        }
    }
}
