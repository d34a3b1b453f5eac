//! Pending order trigger rules.
//!
//! | Kind                | Long triggers when | Short triggers when | Execution price            |
//! |---------------------|--------------------|---------------------|----------------------------|
//! | `Limit`             | `ask <= order`     | `bid >= order`      | ask / bid                  |
//! | `Stop`              | `bid >= stop`      | `ask <= stop`       | ask / bid                  |
//! | `StopLimit`         | `bid >= stop`      | `ask <= stop`       | min(limit, ask) / max(limit, bid) |
//! | `TakeProfit`        | `bid <= stop`      | `ask >= stop`       | ask / bid                  |
//! | `TakeProfitLimit`   | `bid <= stop`      | `ask >= stop`       | min(limit, ask) / max(limit, bid) |
//!
//! Comparisons are inclusive: an order resting exactly at the quote fires.

use sx_core::types::{Direction, Order, OrderKind};

/// Execution price of `order` against the quote, or `None` while it rests.
///
/// Market orders always fire at ask (long) or bid (short).
pub fn evaluate(order: &Order, bid: f64, ask: f64) -> Option<f64> {
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    let long = order.direction == Direction::Long;
    let at_market = if long { ask } else { bid };

    let fired = match order.kind {
        OrderKind::Market => true,
        OrderKind::Limit => {
            if long {
                ask <= order.order_price
            } else {
                bid >= order.order_price
            }
        }
        OrderKind::Stop | OrderKind::StopLimit => {
            if long {
                bid >= order.stop_price
            } else {
                ask <= order.stop_price
            }
        }
        OrderKind::TakeProfit | OrderKind::TakeProfitLimit => {
            if long {
                bid <= order.stop_price
            } else {
                ask >= order.stop_price
            }
        }
    };
    if !fired {
        return None;
    }

    let price = match order.kind {
        OrderKind::StopLimit | OrderKind::TakeProfitLimit if order.order_price > 0.0 => {
            // the more conservative of the limit and the market
            if long { order.order_price.min(ask) } else { order.order_price.max(bid) }
        }
        _ => at_market,
    };
    Some(price)
}

/// Whether the order carries the prices its kind needs.
pub fn has_valid_prices(order: &Order) -> bool {
    match order.kind {
        OrderKind::Market => true,
        OrderKind::Limit => order.order_price > 0.0,
        OrderKind::Stop | OrderKind::TakeProfit | OrderKind::StopLimit | OrderKind::TakeProfitLimit => {
            order.stop_price > 0.0
        }
    }
}
