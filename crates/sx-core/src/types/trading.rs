//! Trading records: orders and positions.
//!
//! Both are plain mutable records owned by whoever currently holds them: the
//! trade that builds an order until submission, the connector afterwards.
//! They are pooled (see [`crate::pool`]) and handed out zeroed.

use serde::{Deserialize, Serialize};

use super::enums::{Direction, OrderKind};
use crate::pool::Poolable;

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// An intent to transact, as submitted to a connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip)]
    slot: Option<u32>,

    /// Identifier generated by the trader proxy.
    pub order_id: String,
    /// Optional client reference, shared by every order of one trade.
    pub ref_id: Option<String>,
    pub market_id: String,
    /// Identifier of the owning strategy instance.
    pub strategy_id: String,
    /// Position to reduce or close, for position-targeting orders.
    pub position_id: Option<String>,

    pub direction: Direction,
    pub kind: OrderKind,
    /// Limit price for limit-type orders.
    pub order_price: f64,
    /// Trigger price for stop and take-profit orders.
    pub stop_price: f64,
    pub quantity: f64,

    /// Margin (position) execution rather than spot.
    pub margin: bool,
    /// Allows an independent position per order.
    pub hedging: bool,
    /// Never increases or reverses a position.
    pub reduce_only: bool,

    pub created: f64,

    // --- filled in by the connector on execution ---
    pub executed: f64,
    pub exec_price: f64,
    pub avg_price: f64,
    pub filled: f64,
    pub cumulative_filled: f64,
    pub commission: f64,
}

impl Order {
    /// Client reference if any, the order id otherwise.
    pub fn reference(&self) -> &str {
        self.ref_id.as_deref().unwrap_or(&self.order_id)
    }

    /// Record one execution, keeping the running average price.
    pub fn record_fill(&mut self, quantity: f64, price: f64, timestamp: f64) {
        let total = self.cumulative_filled + quantity;
        if total > 0.0 {
            self.avg_price = (self.avg_price * self.cumulative_filled + price * quantity) / total;
        }
        self.filled = quantity;
        self.cumulative_filled = total;
        self.exec_price = price;
        self.executed = timestamp;
    }

    pub fn is_fully_filled(&self) -> bool {
        self.cumulative_filled >= self.quantity
    }
}

impl Poolable for Order {
    fn slot(&self) -> Option<u32> {
        self.slot
    }

    fn set_slot(&mut self, slot: Option<u32>) {
        self.slot = slot;
    }

    fn reset(&mut self) {
        *self = Self { slot: self.slot, ..Self::default() };
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A live exchange position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(skip)]
    slot: Option<u32>,

    pub position_id: String,
    /// Reference of the order that opened the position.
    pub ref_order_id: Option<String>,
    pub market_id: String,
    pub strategy_id: String,

    pub direction: Direction,
    pub quantity: f64,
    pub avg_price: f64,
    /// Price of the last execution on this position.
    pub exec_price: f64,
    /// Attached stop price, `0.0` when unset.
    pub stop_price: f64,
    /// Attached limit (take-profit) price, `0.0` when unset.
    pub limit_price: f64,

    pub created: f64,
    pub updated: f64,

    /// Unrealized profit or loss in quote currency.
    pub profit_loss: f64,
    /// Unrealized profit or loss as a rate of the average price.
    pub profit_loss_rate: f64,
    /// Profit or loss already realized by reductions.
    pub realized_profit_loss: f64,
    /// Margin currently locked by the position.
    pub margin: f64,
    /// Fees paid so far.
    pub commission: f64,
}

impl Position {
    /// Refresh the unrealized figures against a close-execution price.
    pub fn update_profit_loss(&mut self, close_price: f64, contract_size: f64) {
        if self.quantity <= 0.0 || self.avg_price <= 0.0 {
            self.profit_loss = 0.0;
            self.profit_loss_rate = 0.0;
            return;
        }
        let delta = self.direction.sign() * (close_price - self.avg_price);
        self.profit_loss = delta * self.quantity * contract_size;
        self.profit_loss_rate = delta / self.avg_price;
    }

    /// True once the attached stop is hit by `close_price`.
    pub fn stop_hit(&self, close_price: f64) -> bool {
        if self.stop_price <= 0.0 {
            return false;
        }
        match self.direction {
            Direction::Long => close_price <= self.stop_price,
            Direction::Short => close_price >= self.stop_price,
        }
    }

    /// True once the attached limit is reached by `close_price`.
    pub fn limit_hit(&self, close_price: f64) -> bool {
        if self.limit_price <= 0.0 {
            return false;
        }
        match self.direction {
            Direction::Long => close_price >= self.limit_price,
            Direction::Short => close_price <= self.limit_price,
        }
    }
}

impl Poolable for Position {
    fn slot(&self) -> Option<u32> {
        self.slot
    }

    fn set_slot(&mut self, slot: Option<u32>) {
        self.slot = slot;
    }

    fn reset(&mut self) {
        *self = Self { slot: self.slot, ..Self::default() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_record_fill_average() {
        let mut order = Order { quantity: 10.0, ..Order::default() };
        order.record_fill(4.0, 100.0, 1.0);
        order.record_fill(6.0, 110.0, 2.0);
        assert!((order.avg_price - 106.0).abs() < 1e-9);
        assert_eq!(order.filled, 6.0);
        assert!(order.is_fully_filled());
    }

    #[test]
    fn order_reset_keeps_slot() {
        let mut order = Order { order_id: "7".into(), ..Order::default() };
        order.set_slot(Some(3));
        order.reset();
        assert_eq!(order.slot(), Some(3));
        assert!(order.order_id.is_empty());
    }

    #[test]
    fn position_stop_and_limit() {
        let pos = Position {
            direction: Direction::Short,
            quantity: 1.0,
            avg_price: 100.0,
            stop_price: 105.0,
            limit_price: 90.0,
            ..Position::default()
        };
        assert!(!pos.stop_hit(104.9));
        assert!(pos.stop_hit(105.0));
        assert!(pos.limit_hit(90.0));
        assert!(!pos.limit_hit(90.5));
    }

    #[test]
    fn position_profit_loss_short() {
        let mut pos = Position {
            direction: Direction::Short,
            quantity: 2.0,
            avg_price: 100.0,
            ..Position::default()
        };
        pos.update_profit_loss(95.0, 1.0);
        assert!((pos.profit_loss - 10.0).abs() < 1e-9);
        assert!((pos.profit_loss_rate - 0.05).abs() < 1e-9);
    }
}
