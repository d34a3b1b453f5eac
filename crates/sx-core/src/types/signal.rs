//! Signals emitted by connectors toward the trader proxy.
//!
//! Signals are origin-agnostic: the local simulated exchange and a remote
//! broker gateway produce the same records. Optional fields are `None` when
//! the event does not carry that information.

use serde::{Deserialize, Serialize};

use super::enums::{Direction, OrderEvent, OrderKind, PositionEvent, StatusEvent};
use super::trading::{Order, Position};

/// Change to an order's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSignal {
    pub event: OrderEvent,
    pub market_id: String,
    pub strategy_id: String,
    pub order_id: String,
    pub ref_id: Option<String>,
    pub position_id: Option<String>,
    pub direction: Direction,
    pub kind: OrderKind,
    pub created: f64,
    pub executed: f64,
    pub quantity: f64,
    pub avg_price: Option<f64>,
    pub exec_price: Option<f64>,
    /// Quantity executed by this event.
    pub filled: Option<f64>,
    /// Quantity executed on the order so far.
    pub cumulative_filled: Option<f64>,
    /// Set with the last fill of the order.
    pub completed: bool,
    pub stop_price: Option<f64>,
    pub limit_price: Option<f64>,
    /// Fee paid for this execution.
    pub commission: Option<f64>,
}

impl OrderSignal {
    /// Signal describing `order` without execution details.
    pub fn from_order(event: OrderEvent, order: &Order) -> Self {
        Self {
            event,
            market_id: order.market_id.clone(),
            strategy_id: order.strategy_id.clone(),
            order_id: order.order_id.clone(),
            ref_id: order.ref_id.clone(),
            position_id: order.position_id.clone(),
            direction: order.direction,
            kind: order.kind,
            created: order.created,
            executed: order.executed,
            quantity: order.quantity,
            avg_price: None,
            exec_price: None,
            filled: None,
            cumulative_filled: None,
            completed: false,
            stop_price: (order.stop_price > 0.0).then_some(order.stop_price),
            limit_price: (order.order_price > 0.0).then_some(order.order_price),
            commission: None,
        }
    }

    /// `TRADED` signal carrying the last execution recorded on `order`.
    pub fn traded(order: &Order) -> Self {
        Self {
            avg_price: Some(order.avg_price),
            exec_price: Some(order.exec_price),
            filled: Some(order.filled),
            cumulative_filled: Some(order.cumulative_filled),
            completed: order.is_fully_filled(),
            commission: Some(order.commission),
            ..Self::from_order(OrderEvent::Traded, order)
        }
    }
}

/// Change to a position's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSignal {
    pub event: PositionEvent,
    pub market_id: String,
    pub strategy_id: String,
    pub position_id: String,
    /// Reference of the order the change is attributed to.
    pub ref_order_id: Option<String>,
    pub direction: Direction,
    pub created: f64,
    pub updated: f64,
    /// Quantity held after the event.
    pub quantity: Option<f64>,
    pub avg_price: Option<f64>,
    pub exec_price: Option<f64>,
    /// Quantity executed by this event.
    pub filled: Option<f64>,
    pub cumulative_filled: Option<f64>,
    pub stop_price: Option<f64>,
    pub limit_price: Option<f64>,
    pub profit_loss: Option<f64>,
    pub commission: Option<f64>,
}

impl PositionSignal {
    /// Bare signal for a position id, every optional field unset.
    pub fn new(event: PositionEvent, market_id: &str, position_id: &str, direction: Direction) -> Self {
        Self {
            event,
            market_id: market_id.to_owned(),
            strategy_id: String::new(),
            position_id: position_id.to_owned(),
            ref_order_id: None,
            direction,
            created: 0.0,
            updated: 0.0,
            quantity: None,
            avg_price: None,
            exec_price: None,
            filled: None,
            cumulative_filled: None,
            stop_price: None,
            limit_price: None,
            profit_loss: None,
            commission: None,
        }
    }

    /// Signal mirroring the current state of `position`.
    pub fn from_position(event: PositionEvent, position: &Position) -> Self {
        Self {
            strategy_id: position.strategy_id.clone(),
            ref_order_id: position.ref_order_id.clone(),
            created: position.created,
            updated: position.updated,
            quantity: Some(position.quantity),
            avg_price: Some(position.avg_price),
            exec_price: Some(position.exec_price),
            stop_price: Some(position.stop_price),
            limit_price: Some(position.limit_price),
            profit_loss: Some(position.realized_profit_loss),
            ..Self::new(event, &position.market_id, &position.position_id, position.direction)
        }
    }
}

/// Account balance and margin figures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSignal {
    pub currency: String,
    pub balance: f64,
    pub free_margin: f64,
    pub reserved_margin: f64,
    pub margin_factor: f64,
    pub profit_loss: f64,
}

/// Quantity held of one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetSignal {
    pub symbol: String,
    pub free: f64,
    pub locked: f64,
    /// Average entry price in the market quote, `0.0` if unknown.
    pub price: f64,
}

/// Price or state change of a market.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSignal {
    pub market_id: String,
    pub timestamp: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub tradeable: Option<bool>,
}

/// Connectivity change of the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSignal {
    pub event: StatusEvent,
    pub connector: String,
}
