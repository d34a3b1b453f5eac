//! Execution backends of the simulated exchange.
//!
//! A triggered order is executed by exactly one backend, chosen from the
//! market capabilities and the order flags:
//!
//! | Order                          | Market                  | Backend        |
//! |--------------------------------|-------------------------|----------------|
//! | `margin == false`              | spot                    | [`asset`]      |
//! | `hedging`                      | position                | [`position`]   |
//! | margin                         | indivisible margin      | [`ind_margin`] |
//! | margin                         | fifo or plain margin    | [`fifo_margin`]|
//! | margin                         | position only           | [`position`]   |
//!
//! The margin backends share one lot engine ([`execute_lots`]): a position is
//! a queue of lots, each attributed to the reference of the order that opened
//! it. Backends differ in how an opposite fill picks the lots it consumes and
//! whether it may reverse the position.
//!
//! Every successful execution pushes the `TRADED` order signal first, then one
//! position signal per affected reference carrying that reference's remaining
//! quantity.

pub mod asset;
pub mod fifo_margin;
pub mod ind_margin;
pub mod position;

use sx_core::types::{
    Market, Order, OrderSignal, Position, PositionEvent, PositionSignal, ReturnCode,
};
use sx_trade::{Signal, TraderProxy};

use crate::state::{LocalState, Lot, VirtualPosition};

pub(crate) const QTY_EPSILON: f64 = 1e-9;

/// Execution context of one fill.
pub(crate) struct Exec<'a> {
    pub market: &'a Market,
    pub proxy: &'a TraderProxy,
    pub price: f64,
    /// Resting limit-type execution, charged the maker fee.
    pub maker: bool,
    pub timestamp: f64,
    pub signals: Vec<Signal>,
    /// Positions closed by the execution, to be returned to the pool.
    pub freed: Vec<Position>,
}

impl<'a> Exec<'a> {
    pub fn new(market: &'a Market, proxy: &'a TraderProxy, price: f64, maker: bool, timestamp: f64) -> Self {
        Self { market, proxy, price, maker, timestamp, signals: Vec::new(), freed: Vec::new() }
    }

    /// Record the fill on the order and emit its `TRADED` signal. Returns the
    /// commission charged.
    pub fn fill(&mut self, order: &mut Order, quantity: f64) -> f64 {
        let notional = quantity * self.price * self.market.contract_size;
        let commission = self.market.commission(notional, self.maker);
        order.record_fill(quantity, self.price, self.timestamp);
        order.commission = commission;
        self.signals.push(Signal::Order(OrderSignal::traded(order)));
        commission
    }
}

/// An execution model.
pub(crate) trait Backend: Sync {
    fn name(&self) -> &'static str;

    /// Check and execute `order` at `ex.price`. Nothing changes unless the
    /// result is [`ReturnCode::Accepted`].
    fn execute(&self, state: &mut LocalState, order: &mut Order, ex: &mut Exec<'_>) -> ReturnCode;
}

static ASSET: asset::AssetBackend = asset::AssetBackend;
static IND_MARGIN: ind_margin::IndMarginBackend = ind_margin::IndMarginBackend;
static FIFO_MARGIN: fifo_margin::FifoMarginBackend = fifo_margin::FifoMarginBackend;
static POSITION: position::PositionBackend = position::PositionBackend;

/// Backend executing `order` on `market`, if any can.
pub(crate) fn select(market: &Market, order: &Order) -> Option<&'static dyn Backend> {
    let backend: &'static dyn Backend = if !order.margin {
        if !market.has_spot() {
            return None;
        }
        &ASSET
    } else if order.hedging && market.has_position() {
        &POSITION
    } else if market.indivisible_position() {
        &IND_MARGIN
    } else if market.fifo_position() || market.has_margin() {
        &FIFO_MARGIN
    } else if market.has_position() {
        &POSITION
    } else {
        return None;
    };
    Some(backend)
}

// ---------------------------------------------------------------------------
// Lot engine
// ---------------------------------------------------------------------------

/// How an execution interacts with the lots of a position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LotPolicy {
    /// Opposite fills consume the lots of the order's own reference first.
    pub own_ref_first: bool,
    /// Same-reference fills merge into the existing lot.
    pub merge_lots: bool,
    /// Leftover opposite quantity opens a position the other way.
    pub allow_reverse: bool,
    /// Individual position, closed by orders carrying its id.
    pub hedging: bool,
}

/// Quantity of one reference touched by an execution.
struct Touch {
    ref_id: String,
    strategy_id: String,
    quantity: f64,
}

/// Execute `order` against the position stored under `key`, or a new
/// position when `key` is `None` or unknown.
pub(crate) fn execute_lots(
    state: &mut LocalState,
    order: &mut Order,
    ex: &mut Exec<'_>,
    key: Option<&str>,
    policy: LotPolicy,
) -> ReturnCode {
    let market = ex.market;
    let price = ex.price;
    let contract = market.contract_size;
    let order_ref = order.reference().to_owned();

    let held = key.and_then(|k| state.positions.get(k));
    let (held_dir, held_qty, held_margin) = match held {
        Some(vp) => (Some(vp.position.direction), vp.position.quantity, vp.position.margin),
        None => (None, 0.0, 0.0),
    };
    let reducing = held_qty > QTY_EPSILON && held_dir.is_some_and(|d| d != order.direction);
    let close_qty = if reducing { order.quantity.min(held_qty) } else { 0.0 };
    let mut open_qty = if order.reduce_only { 0.0 } else { order.quantity - close_qty };
    if reducing && !policy.allow_reverse {
        open_qty = 0.0;
    }
    let exec_qty = close_qty + open_qty;
    if exec_qty <= QTY_EPSILON {
        return ReturnCode::Rejected;
    }

    let released = if held_qty > 0.0 { held_margin * close_qty / held_qty } else { 0.0 };
    let required = market.margin_required(open_qty, price);
    let commission = market.commission(exec_qty * price * contract, ex.maker);
    if open_qty > 0.0 && required + commission > state.account.free_margin() + released {
        return ReturnCode::InsufficientMargin;
    }

    // position the fill lands on
    let pid = match key.filter(|k| state.positions.contains_key(*k)) {
        Some(k) => k.to_owned(),
        None => {
            let mut position = ex.proxy.new_position(&order.strategy_id);
            if let Some(k) = key {
                position.position_id = k.to_owned();
            }
            position.market_id = market.market_id.clone();
            position.direction = order.direction;
            position.created = ex.timestamp;
            let pid = position.position_id.clone();
            let mut vp = VirtualPosition::new(position);
            vp.hedging = policy.hedging;
            state.positions.insert(pid.clone(), vp);
            pid
        }
    };
    order.position_id = Some(pid.clone());
    let commission = ex.fill(order, exec_qty);

    let Some(vp) = state.positions.get_mut(&pid) else {
        return ReturnCode::Error;
    };

    // reduce
    let mut touched: Vec<Touch> = Vec::new();
    let mut realized = 0.0;
    if close_qty > 0.0 {
        let sign = vp.position.direction.sign();
        let mut left = close_qty;
        if policy.own_ref_first {
            left = consume(vp, left, Some(order_ref.as_str()), &mut touched, &mut realized, sign, price, contract);
        }
        consume(vp, left, None, &mut touched, &mut realized, sign, price, contract);
        vp.lots.retain(|l| l.quantity > QTY_EPSILON);
        vp.position.margin -= released;
        vp.position.realized_profit_loss += realized;
        vp.refresh();
    }
    for t in &touched {
        let share = commission * t.quantity / exec_qty;
        let event = if vp.ref_quantity(&t.ref_id) <= QTY_EPSILON { PositionEvent::Deleted } else { PositionEvent::Updated };
        ex.signals.push(Signal::Position(lot_signal(vp, t, event, price, share, ex.timestamp)));
    }

    // open or reverse
    if open_qty > 0.0 {
        if vp.lots.is_empty() {
            vp.position.direction = order.direction;
        }
        let existed = vp.ref_quantity(&order_ref) > QTY_EPSILON;
        let merged = policy.merge_lots
            && match vp.lots.iter_mut().find(|l| l.ref_id == order_ref) {
                Some(lot) => {
                    lot.price = (lot.price * lot.quantity + price * open_qty) / (lot.quantity + open_qty);
                    lot.quantity += open_qty;
                    true
                }
                None => false,
            };
        if !merged {
            vp.lots.push_back(Lot {
                ref_id: order_ref.clone(),
                strategy_id: order.strategy_id.clone(),
                quantity: open_qty,
                price,
            });
        }
        vp.position.margin += required;
        vp.refresh();

        let t = Touch { ref_id: order_ref.clone(), strategy_id: order.strategy_id.clone(), quantity: open_qty };
        let share = commission * open_qty / exec_qty;
        let event = if existed { PositionEvent::Updated } else { PositionEvent::Opened };
        ex.signals.push(Signal::Position(lot_signal(vp, &t, event, price, share, ex.timestamp)));
    }

    vp.position.exec_price = price;
    vp.position.updated = ex.timestamp;
    vp.position.commission += commission;
    if vp.position.ref_order_id.is_none() || close_qty > 0.0 {
        vp.position.ref_order_id = vp.main_ref().map(str::to_owned);
    }
    let emptied = vp.lots.is_empty();

    state.account.balance += realized - commission;
    state.account.used_margin = (state.account.used_margin + required - released).max(0.0);

    if emptied {
        if let Some(vp) = state.positions.remove(&pid) {
            ex.freed.push(vp.position);
        }
    }
    ReturnCode::Accepted
}

/// Take up to `quantity` from the lots matching `only_ref` (all lots when
/// `None`), oldest first. Returns what is left to take.
#[allow(clippy::too_many_arguments)]
fn consume(
    vp: &mut VirtualPosition,
    mut quantity: f64,
    only_ref: Option<&str>,
    touched: &mut Vec<Touch>,
    realized: &mut f64,
    sign: f64,
    price: f64,
    contract: f64,
) -> f64 {
    for lot in vp.lots.iter_mut() {
        if quantity <= QTY_EPSILON {
            break;
        }
        if only_ref.is_some_and(|r| r != lot.ref_id) || lot.quantity <= QTY_EPSILON {
            continue;
        }
        let take = quantity.min(lot.quantity);
        lot.quantity -= take;
        quantity -= take;
        *realized += sign * (price - lot.price) * take * contract;
        match touched.iter_mut().find(|t| t.ref_id == lot.ref_id) {
            Some(t) => t.quantity += take,
            None => touched.push(Touch {
                ref_id: lot.ref_id.clone(),
                strategy_id: lot.strategy_id.clone(),
                quantity: take,
            }),
        }
    }
    quantity
}

fn lot_signal(
    vp: &VirtualPosition,
    touch: &Touch,
    event: PositionEvent,
    price: f64,
    commission: f64,
    timestamp: f64,
) -> PositionSignal {
    let p = &vp.position;
    let mut s = PositionSignal::new(event, &p.market_id, &p.position_id, p.direction);
    s.strategy_id.clone_from(&touch.strategy_id);
    s.ref_order_id = Some(touch.ref_id.clone());
    s.created = p.created;
    s.updated = timestamp;
    s.quantity = Some(vp.ref_quantity(&touch.ref_id));
    let avg = vp.ref_price(&touch.ref_id);
    s.avg_price = Some(if avg > 0.0 { avg } else { price });
    s.exec_price = Some(price);
    s.filled = Some(touch.quantity);
    s.stop_price = Some(p.stop_price);
    s.limit_price = Some(p.limit_price);
    s.profit_loss = Some(p.realized_profit_loss);
    s.commission = Some(commission);
    s
}

/// Signal describing the whole position, attributed to its oldest lot.
pub(crate) fn position_signal(vp: &VirtualPosition, event: PositionEvent) -> PositionSignal {
    let mut s = PositionSignal::from_position(event, &vp.position);
    if let Some(lot) = vp.lots.front() {
        s.ref_order_id = Some(lot.ref_id.clone());
        s.strategy_id.clone_from(&lot.strategy_id);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use sx_core::types::{Direction, MarketRegistry, TradeCaps};

    fn routed(caps: u8, margin: bool, hedging: bool) -> Option<&'static str> {
        let registry = MarketRegistry::new();
        let market = registry.insert(Market::new("X", "A", "B", TradeCaps(caps)));
        let mut order = Order::default();
        order.direction = Direction::Long;
        order.margin = margin;
        order.hedging = hedging;
        select(&market, &order).map(|b| b.name())
    }

    #[test]
    fn selection_follows_caps() {
        assert_eq!(routed(TradeCaps::SPOT, false, false), Some("asset"));
        assert_eq!(routed(TradeCaps::MARGIN, false, false), None);
        assert_eq!(routed(TradeCaps::POSITION | TradeCaps::IND_MARGIN, true, true), Some("position"));
        assert_eq!(routed(TradeCaps::POSITION | TradeCaps::IND_MARGIN, true, false), Some("ind-margin"));
        assert_eq!(routed(TradeCaps::FIFO, true, false), Some("fifo-margin"));
        assert_eq!(routed(TradeCaps::MARGIN, true, true), Some("fifo-margin"));
        assert_eq!(routed(TradeCaps::POSITION, true, false), Some("position"));
        assert_eq!(routed(TradeCaps::SPOT, true, false), None);
    }
}
