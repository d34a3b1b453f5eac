//! Per-trade statistics.

use serde::{Deserialize, Serialize};
use sx_core::types::{Direction, ExitReason, OrderKind};

/// Figures collected over the life of one trade.
///
/// Written only by the owning trade, read by strategies when the trade is
/// reported closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub best_price: f64,
    pub best_price_timestamp: f64,
    pub worst_price: f64,
    pub worst_price_timestamp: f64,

    pub first_realized_entry_timestamp: f64,
    pub last_realized_entry_timestamp: f64,
    pub first_realized_exit_timestamp: f64,
    pub last_realized_exit_timestamp: f64,

    /// Open profit or loss of the remaining quantity, in quote currency.
    pub unrealized_profit_loss: f64,
    /// Entry notional value (filled quantity at entry price).
    pub notional_value: f64,

    pub entry_fees: f64,
    pub exit_fees: f64,

    pub exit_reason: ExitReason,

    pub entry_order_kind: OrderKind,
    pub take_profit_order_kind: OrderKind,
    pub stop_order_kind: OrderKind,
}

impl TradeStats {
    /// Track the most and least favorable prices seen for `direction`.
    pub fn track_price(&mut self, direction: Direction, price: f64, timestamp: f64) {
        if price <= 0.0 {
            return;
        }
        let better = |a: f64, b: f64| match direction {
            Direction::Long => a > b,
            Direction::Short => a < b,
        };
        if self.best_price <= 0.0 || better(price, self.best_price) {
            self.best_price = price;
            self.best_price_timestamp = timestamp;
        }
        if self.worst_price <= 0.0 || better(self.worst_price, price) {
            self.worst_price = price;
            self.worst_price_timestamp = timestamp;
        }
    }

    pub(crate) fn record_entry(&mut self, timestamp: f64) {
        if self.first_realized_entry_timestamp <= 0.0 {
            self.first_realized_entry_timestamp = timestamp;
        }
        self.last_realized_entry_timestamp = timestamp;
    }

    pub(crate) fn record_exit(&mut self, timestamp: f64) {
        if self.first_realized_exit_timestamp <= 0.0 {
            self.first_realized_exit_timestamp = timestamp;
        }
        self.last_realized_exit_timestamp = timestamp;
    }

    pub fn total_fees(&self) -> f64 {
        self.entry_fees + self.exit_fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_worst_long() {
        let mut s = TradeStats::default();
        s.track_price(Direction::Long, 100.0, 1.0);
        s.track_price(Direction::Long, 105.0, 2.0);
        s.track_price(Direction::Long, 98.0, 3.0);
        assert_eq!((s.best_price, s.best_price_timestamp), (105.0, 2.0));
        assert_eq!((s.worst_price, s.worst_price_timestamp), (98.0, 3.0));
    }

    #[test]
    fn best_worst_short() {
        let mut s = TradeStats::default();
        s.track_price(Direction::Short, 100.0, 1.0);
        s.track_price(Direction::Short, 95.0, 2.0);
        s.track_price(Direction::Short, 102.0, 3.0);
        assert_eq!(s.best_price, 95.0);
        assert_eq!(s.worst_price, 102.0);
    }
}
