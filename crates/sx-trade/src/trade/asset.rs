//! Asset-style trade for spot markets.
//!
//! A buy order acquires the asset; selling happens through an optional stop
//! order, an optional limit order, or a market sell issued by `close`. Fills
//! are read from the `TRADED` order signals of each leg. When the sold
//! quantity catches up with the bought quantity the remaining sibling order
//! is canceled.

use std::sync::Weak;

use serde::{Deserialize, Serialize};
use sx_core::error::SxResult;
use sx_core::types::{
    Direction, ExitReason, ModifierType, OrderKind, OrderSignal, PositionSignal, ReturnCode, TradeState, TradeType,
};
use tracing::{debug, warn};

use super::{EntryRequest, OrderLeg, QTY_EPSILON, TradeCore, TradeLifecycle, TradePhase, resolve_mode};
use crate::proxy::TraderProxy;
use crate::strategy::Strategy;

/// Which sell leg an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SellLeg {
    Stop,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTrade {
    core: TradeCore,
    buy: OrderLeg,
    /// Stop sell, also carries the market sell of a close.
    stop: OrderLeg,
    limit: OrderLeg,
    /// A market sell is in flight.
    closing: bool,
}

impl AssetTrade {
    pub fn new(proxy: Weak<TraderProxy>) -> Self {
        Self {
            core: TradeCore::new(TradeType::Spot, proxy),
            buy: OrderLeg::default(),
            stop: OrderLeg::default(),
            limit: OrderLeg::default(),
            closing: false,
        }
    }

    pub fn buy_leg(&self) -> &OrderLeg {
        &self.buy
    }

    pub fn stop_leg(&self) -> &OrderLeg {
        &self.stop
    }

    pub fn limit_leg(&self) -> &OrderLeg {
        &self.limit
    }

    fn leg_mut(&mut self, leg: SellLeg) -> &mut OrderLeg {
        match leg {
            SellLeg::Stop => &mut self.stop,
            SellLeg::Limit => &mut self.limit,
        }
    }

    /// Cancel a working leg. The leg is marked canceled only once the
    /// connector accepted.
    fn cancel_leg(&mut self, leg: SellLeg) -> ReturnCode {
        let l = self.leg_mut(leg);
        if !l.is_working() {
            return ReturnCode::NothingToDo;
        }
        let Some(order_id) = l.order_id.clone() else {
            return ReturnCode::NothingToDo;
        };
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let ret = proxy.cancel_order(&order_id);
        if ret.is_accepted() {
            self.leg_mut(leg).state = TradeState::Canceled;
        }
        ret
    }

    /// Submit a sell order for the held quantity on `leg`.
    fn send_sell(&mut self, leg: SellLeg, kind: OrderKind, price: f64) -> ReturnCode {
        let quantity = self.core.remaining_quantity();
        if quantity <= QTY_EPSILON {
            return ReturnCode::InvalidArgs;
        }
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let mut order = proxy.new_order(&self.core.strategy_id);
        order.market_id = self.core.market_id.clone();
        order.ref_id = Some(self.core.ref_id.clone());
        order.direction = Direction::Short;
        order.kind = kind;
        match kind {
            OrderKind::Market => {}
            OrderKind::Limit => order.order_price = price,
            _ => order.stop_price = price,
        }
        order.quantity = quantity;
        order.margin = false;
        order.created = self.core.market().map(|m| m.timestamp()).unwrap_or_default();

        let order_id = order.order_id.clone();
        let ret = proxy.create_order(order);
        *self.leg_mut(leg) = if ret.is_accepted() {
            OrderLeg::submitted(order_id, quantity)
        } else {
            warn!("[trade] #{} {kind} sell refused: {ret}", self.core.id);
            OrderLeg { state: TradeState::Rejected, order_id: Some(order_id), quantity, cumulative: 0.0 }
        };
        ret
    }

    fn exec_price(signal: &OrderSignal) -> f64 {
        signal.exec_price.filter(|p| *p > 0.0).or(signal.avg_price).unwrap_or(0.0)
    }

    fn on_sell_signal(&mut self, leg: SellLeg, signal: &OrderSignal) -> SxResult<()> {
        let delta = self.leg_mut(leg).on_event(signal);
        if delta > 0.0 {
            let ts = if signal.executed > 0.0 { signal.executed } else { signal.created };
            self.core.apply_exit_fill(delta, Self::exec_price(signal), ts)?;
            self.core.stats.exit_fees += signal.commission.unwrap_or(0.0);
        }

        let done = self.core.filled_entry > QTY_EPSILON
            && self.core.filled_exit >= self.core.filled_entry - QTY_EPSILON;
        if done {
            // a close already recorded its own reason
            if !self.closing {
                self.core.stats.exit_reason = match leg {
                    SellLeg::Stop => ExitReason::StopLossMarket,
                    SellLeg::Limit => ExitReason::TakeProfitLimit,
                };
            }
            self.closing = false;
            let sibling = match leg {
                SellLeg::Stop => SellLeg::Limit,
                SellLeg::Limit => SellLeg::Stop,
            };
            let ret = self.cancel_leg(sibling);
            if !matches!(ret, ReturnCode::Accepted | ReturnCode::NothingToDo) {
                warn!("[trade] #{} sibling cancel failed: {ret}", self.core.id);
            }
        } else if leg == SellLeg::Stop && self.closing && !self.stop.is_working() {
            // the market sell ended without completing the exit
            self.closing = false;
        }
        Ok(())
    }
}

impl TradeLifecycle for AssetTrade {
    fn core(&self) -> &TradeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TradeCore {
        &mut self.core
    }

    fn entry_state(&self) -> TradeState {
        self.buy.state
    }

    fn exit_state(&self) -> TradeState {
        if self.limit.cumulative > QTY_EPSILON && self.stop.cumulative <= QTY_EPSILON {
            self.limit.state
        } else if self.stop.state != TradeState::Undefined || self.stop.cumulative > QTY_EPSILON {
            self.stop.state
        } else {
            self.limit.state
        }
    }

    fn phase(&self) -> TradePhase {
        TradePhase::resolve(self.core.filled_entry, self.core.filled_exit, self.buy.state, self.closing)
    }

    fn open(&mut self, strategy: &dyn Strategy, request: &EntryRequest) -> ReturnCode {
        if self.buy.state != TradeState::Undefined {
            return ReturnCode::NothingToDo;
        }
        if request.direction != Direction::Long {
            warn!("[trade] spot trades only buy");
            return ReturnCode::InvalidArgs;
        }
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let market = strategy.market();
        if !market.has_spot() {
            return ReturnCode::InvalidArgs;
        }
        let quantity = market.adjust_quantity(request.quantity);
        if quantity <= 0.0 {
            return ReturnCode::InvalidArgs;
        }

        self.core.begin(strategy, request, quantity);

        let mut order = proxy.new_order(strategy.identifier());
        order.market_id = market.market_id.clone();
        order.ref_id = Some(self.core.ref_id.clone());
        order.direction = Direction::Long;
        order.kind = request.kind;
        match request.kind {
            OrderKind::Market => {}
            OrderKind::Limit => order.order_price = request.order_price,
            OrderKind::Stop | OrderKind::TakeProfit => order.stop_price = request.order_price,
            OrderKind::StopLimit | OrderKind::TakeProfitLimit => {
                order.stop_price = request.order_price;
                order.order_price = request.trigger_limit();
            }
        }
        order.quantity = quantity;
        order.margin = false;
        order.created = self.core.created;

        self.buy = OrderLeg::submitted(order.order_id.clone(), quantity);

        let ret = proxy.create_order(order);
        if !ret.is_accepted() {
            self.buy.state = TradeState::Rejected;
            warn!("[trade] #{} buy {} rejected: {ret}", self.core.id, request.kind);
        }
        ret
    }

    fn cancel_open(&mut self) -> ReturnCode {
        if !self.buy.is_working() {
            return ReturnCode::NothingToDo;
        }
        let Some(order_id) = self.buy.order_id.clone() else {
            return ReturnCode::NothingToDo;
        };
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let ret = proxy.cancel_order(&order_id);
        if ret.is_accepted() {
            self.buy.state = TradeState::Canceled;
            if self.core.filled_entry <= QTY_EPSILON {
                self.core.stats.exit_reason = ExitReason::Canceled;
            }
        }
        ret
    }

    fn cancel_close(&mut self) -> ReturnCode {
        if !self.closing {
            return ReturnCode::NothingToDo;
        }
        let ret = self.cancel_leg(SellLeg::Stop);
        if ret.is_accepted() {
            self.closing = false;
        }
        ret
    }

    fn modify_take_profit(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        if self.closing {
            return ReturnCode::NothingToDo;
        }
        match resolve_mode(mode, self.core.tp_mode) {
            ModifierType::Distant => {
                let ret = self.cancel_leg(SellLeg::Limit);
                if !matches!(ret, ReturnCode::Accepted | ReturnCode::NothingToDo) {
                    return ret;
                }
                let ret = self.send_sell(SellLeg::Limit, OrderKind::Limit, price);
                if ret.is_accepted() {
                    self.core.take_profit = price;
                    self.core.tp_mode = ModifierType::Distant;
                    self.core.stats.take_profit_order_kind = OrderKind::Limit;
                }
                ret
            }
            _ => {
                self.cancel_leg(SellLeg::Limit);
                self.core.take_profit = price;
                self.core.tp_mode = ModifierType::Local;
                self.core.stats.take_profit_order_kind = OrderKind::Market;
                ReturnCode::Accepted
            }
        }
    }

    fn modify_stop_loss(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        if self.closing {
            return ReturnCode::NothingToDo;
        }
        match resolve_mode(mode, self.core.sl_mode) {
            ModifierType::Distant => {
                let ret = self.cancel_leg(SellLeg::Stop);
                if !matches!(ret, ReturnCode::Accepted | ReturnCode::NothingToDo) {
                    return ret;
                }
                let ret = self.send_sell(SellLeg::Stop, OrderKind::Stop, price);
                if ret.is_accepted() {
                    self.core.stop_loss = price;
                    self.core.sl_mode = ModifierType::Distant;
                    self.core.stats.stop_order_kind = OrderKind::Stop;
                }
                ret
            }
            _ => {
                self.cancel_leg(SellLeg::Stop);
                self.core.stop_loss = price;
                self.core.sl_mode = ModifierType::Local;
                self.core.stats.stop_order_kind = OrderKind::Market;
                ReturnCode::Accepted
            }
        }
    }

    fn close(&mut self, reason: ExitReason) -> ReturnCode {
        if self.closing {
            return ReturnCode::NothingToDo;
        }
        match self.phase() {
            TradePhase::Opening => {
                let ret = self.cancel_open();
                if ret.is_accepted() {
                    self.core.stats.exit_reason = reason;
                }
                return ret;
            }
            TradePhase::Active => {}
            _ => return ReturnCode::NothingToDo,
        }

        self.core.stats.exit_reason = reason;
        self.cancel_open();
        self.cancel_leg(SellLeg::Stop);
        self.cancel_leg(SellLeg::Limit);

        let ret = self.send_sell(SellLeg::Stop, OrderKind::Market, 0.0);
        if ret.is_accepted() {
            self.closing = true;
        }
        ret
    }

    fn order_signal(&mut self, signal: &OrderSignal) -> SxResult<()> {
        if self.buy.is(&signal.order_id) {
            let delta = self.buy.on_event(signal);
            if delta > 0.0 {
                self.core.stats.entry_fees += signal.commission.unwrap_or(0.0);
                let ts = if signal.executed > 0.0 { signal.executed } else { signal.created };
                self.core.apply_entry_fill(delta, Self::exec_price(signal), ts);
            }
            Ok(())
        } else if self.stop.is(&signal.order_id) {
            self.on_sell_signal(SellLeg::Stop, signal)
        } else if self.limit.is(&signal.order_id) {
            self.on_sell_signal(SellLeg::Limit, signal)
        } else {
            debug!("[trade] #{} ignores order {} {:?}", self.core.id, signal.order_id, signal.event);
            Ok(())
        }
    }

    fn position_signal(&mut self, _signal: &PositionSignal) -> SxResult<()> {
        Ok(())
    }

    fn is_target_order(&self, order_id: &str, ref_id: Option<&str>) -> bool {
        self.buy.is(order_id)
            || self.stop.is(order_id)
            || self.limit.is(order_id)
            || ref_id == Some(self.core.ref_id.as_str())
    }

    fn is_target_position(&self, _position_id: &str, _ref_id: Option<&str>) -> bool {
        false
    }
}
