//! Position-style trade: margin, indivisible margin and position markets.
//!
//! One entry order opens (or contributes to) a position. Filled quantities
//! follow the position signals: the quantity a signal reports for the
//! trade's reference is compared with the quantity already accounted, an
//! increase is an entry fill and a decrease an exit fill. Order signals only
//! drive the entry/exit side states.
//!
//! Closing goes through `close_position` when the trade owns an individual
//! position, otherwise through an opposite reduce-only market order carrying
//! the trade reference.

use std::sync::Weak;

use serde::{Deserialize, Serialize};
use sx_core::error::SxResult;
use sx_core::types::{
    ExitReason, ModifierType, OrderKind, OrderSignal, PositionEvent, PositionSignal, ReturnCode, TradeState,
    TradeType,
};
use tracing::{debug, warn};

use super::{EntryRequest, OrderLeg, QTY_EPSILON, TradeCore, TradeLifecycle, TradePhase, resolve_mode};
use crate::proxy::TraderProxy;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTrade {
    core: TradeCore,
    entry: OrderLeg,
    exit: OrderLeg,
    /// Exchange position the trade contributes to.
    position_id: Option<String>,
    /// Quantity of the position attributed to this trade.
    position_quantity: f64,
    /// Stop price pushed on the position, `0.0` when none.
    position_stop: f64,
    /// Limit price pushed on the position, `0.0` when none.
    position_limit: f64,
}

impl PositionTrade {
    pub fn new(trade_type: TradeType, proxy: Weak<TraderProxy>) -> Self {
        Self {
            core: TradeCore::new(trade_type, proxy),
            entry: OrderLeg::default(),
            exit: OrderLeg::default(),
            position_id: None,
            position_quantity: 0.0,
            position_stop: 0.0,
            position_limit: 0.0,
        }
    }

    pub fn position_id(&self) -> Option<&str> {
        self.position_id.as_deref()
    }

    pub fn entry_leg(&self) -> &OrderLeg {
        &self.entry
    }

    pub fn exit_leg(&self) -> &OrderLeg {
        &self.exit
    }

    /// Push stop and limit prices to the position. Local copies are updated
    /// only once the connector accepts.
    fn push_position(&mut self, stop: f64, limit: f64) -> ReturnCode {
        let Some(position_id) = self.position_id.clone() else {
            return ReturnCode::InvalidArgs;
        };
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let ret = proxy.modify_position(&position_id, stop, limit);
        if ret.is_accepted() {
            self.position_stop = stop;
            self.position_limit = limit;
        } else {
            warn!("[trade] #{} modify position {position_id} refused: {ret}", self.core.id);
        }
        ret
    }

    fn entry_fill_state(&self) -> TradeState {
        if self.core.filled_entry >= self.entry.quantity - QTY_EPSILON {
            TradeState::Filled
        } else {
            TradeState::PartiallyFilled
        }
    }
}

impl TradeLifecycle for PositionTrade {
    fn core(&self) -> &TradeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TradeCore {
        &mut self.core
    }

    fn entry_state(&self) -> TradeState {
        self.entry.state
    }

    fn exit_state(&self) -> TradeState {
        self.exit.state
    }

    fn phase(&self) -> TradePhase {
        TradePhase::resolve(self.core.filled_entry, self.core.filled_exit, self.entry.state, self.exit.is_working())
    }

    fn open(&mut self, strategy: &dyn Strategy, request: &EntryRequest) -> ReturnCode {
        if self.entry.state != TradeState::Undefined {
            return ReturnCode::NothingToDo;
        }
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let market = strategy.market();
        if !market.supports(self.core.trade_type) {
            warn!("[trade] {} trade refused on market {}", self.core.trade_type, market.market_id);
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
        order.direction = request.direction;
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
        order.margin = true;
        order.hedging = self.core.trade_type == TradeType::Position;
        order.created = self.core.created;

        self.entry = OrderLeg::submitted(order.order_id.clone(), quantity);

        let ret = proxy.create_order(order);
        if !ret.is_accepted() {
            self.entry.state = TradeState::Rejected;
            warn!("[trade] #{} entry {} {} rejected: {ret}", self.core.id, request.direction, request.kind);
        }
        ret
    }

    fn cancel_open(&mut self) -> ReturnCode {
        if !self.entry.is_working() {
            return ReturnCode::NothingToDo;
        }
        let Some(order_id) = self.entry.order_id.clone() else {
            return ReturnCode::NothingToDo;
        };
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let ret = proxy.cancel_order(&order_id);
        if ret.is_accepted() {
            self.entry.state = TradeState::Canceled;
            if self.core.filled_entry <= QTY_EPSILON {
                self.core.stats.exit_reason = ExitReason::Canceled;
            }
        }
        ret
    }

    fn cancel_close(&mut self) -> ReturnCode {
        if !self.exit.is_working() {
            return ReturnCode::NothingToDo;
        }
        let Some(order_id) = self.exit.order_id.clone() else {
            return ReturnCode::NothingToDo;
        };
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };
        let ret = proxy.cancel_order(&order_id);
        if ret.is_accepted() {
            self.exit.state = TradeState::Canceled;
        }
        ret
    }

    fn modify_take_profit(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        match resolve_mode(mode, self.core.tp_mode) {
            ModifierType::Distant => {
                let ret = self.push_position(self.position_stop, price);
                if ret.is_accepted() {
                    self.core.take_profit = price;
                    self.core.tp_mode = ModifierType::Distant;
                    self.core.stats.take_profit_order_kind = OrderKind::Limit;
                }
                ret
            }
            _ => {
                if self.position_limit > 0.0 {
                    // best effort, the local trigger takes over either way
                    self.push_position(self.position_stop, 0.0);
                }
                self.core.take_profit = price;
                self.core.tp_mode = ModifierType::Local;
                self.core.stats.take_profit_order_kind = OrderKind::Market;
                ReturnCode::Accepted
            }
        }
    }

    fn modify_stop_loss(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        match resolve_mode(mode, self.core.sl_mode) {
            ModifierType::Distant => {
                let ret = self.push_position(price, self.position_limit);
                if ret.is_accepted() {
                    self.core.stop_loss = price;
                    self.core.sl_mode = ModifierType::Distant;
                    self.core.stats.stop_order_kind = OrderKind::Stop;
                }
                ret
            }
            _ => {
                if self.position_stop > 0.0 {
                    self.push_position(0.0, self.position_limit);
                }
                self.core.stop_loss = price;
                self.core.sl_mode = ModifierType::Local;
                self.core.stats.stop_order_kind = OrderKind::Market;
                ReturnCode::Accepted
            }
        }
    }

    fn close(&mut self, reason: ExitReason) -> ReturnCode {
        if self.exit.is_working() {
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
            TradePhase::Closed | TradePhase::Canceled | TradePhase::Closing => return ReturnCode::NothingToDo,
            TradePhase::Active => {}
        }
        let proxy = match self.core.proxy() {
            Ok(p) => p,
            Err(ret) => return ret,
        };

        self.core.stats.exit_reason = reason;
        if self.entry.is_working() {
            // stop the entry from growing while exiting
            self.cancel_open();
        }

        let remaining = self.core.remaining_quantity();
        let ret = match (&self.position_id, self.core.trade_type) {
            (Some(position_id), TradeType::Position) => {
                self.exit = OrderLeg { state: TradeState::Undefined, order_id: None, quantity: remaining, cumulative: 0.0 };
                proxy.close_position(position_id, self.core.direction, remaining, true, 0.0)
            }
            _ => {
                let mut order = proxy.new_order(&self.core.strategy_id);
                order.market_id = self.core.market_id.clone();
                order.ref_id = Some(self.core.ref_id.clone());
                order.position_id = self.position_id.clone();
                order.direction = self.core.direction.opposite();
                order.kind = OrderKind::Market;
                order.quantity = remaining;
                order.margin = true;
                order.reduce_only = true;
                order.created = self.core.market().map(|m| m.timestamp()).unwrap_or_default();
                self.exit = OrderLeg { state: TradeState::Undefined, order_id: Some(order.order_id.clone()), quantity: remaining, cumulative: 0.0 };
                proxy.create_order(order)
            }
        };

        if ret.is_accepted() {
            self.exit.state = TradeState::New;
        } else {
            warn!("[trade] #{} close request refused: {ret}", self.core.id);
        }
        ret
    }

    fn order_signal(&mut self, signal: &OrderSignal) -> SxResult<()> {
        if self.entry.is(&signal.order_id) {
            self.entry.on_event(signal);
            if self.position_id.is_none() && signal.position_id.is_some() {
                self.position_id = signal.position_id.clone();
            }
        } else if self.exit.is(&signal.order_id) {
            self.exit.on_event(signal);
        } else {
            debug!("[trade] #{} ignores order {} {:?}", self.core.id, signal.order_id, signal.event);
        }
        // quantities are accounted from position signals
        Ok(())
    }

    fn position_signal(&mut self, signal: &PositionSignal) -> SxResult<()> {
        if self.position_id.is_none() {
            self.position_id = Some(signal.position_id.clone());
        }
        if let Some(stop) = signal.stop_price {
            self.position_stop = stop;
        }
        if let Some(limit) = signal.limit_price {
            self.position_limit = limit;
        }

        let new_quantity = match signal.event {
            PositionEvent::Amended => return Ok(()),
            PositionEvent::Deleted => 0.0,
            _ => match signal.quantity.or(signal.cumulative_filled) {
                Some(q) => q,
                None => return Ok(()),
            },
        };
        let price = signal
            .exec_price
            .filter(|p| *p > 0.0)
            .or(signal.avg_price)
            .unwrap_or(0.0);
        let timestamp = if signal.updated > 0.0 { signal.updated } else { signal.created };
        let delta = new_quantity - self.position_quantity;

        if delta > QTY_EPSILON {
            self.core.apply_entry_fill(delta, price, timestamp);
            self.core.stats.entry_fees += signal.commission.unwrap_or(0.0);
            if !self.entry.state.is_failed() {
                self.entry.state = self.entry_fill_state();
            }
        } else if delta < -QTY_EPSILON {
            self.core.apply_exit_fill(-delta, price, timestamp)?;
            self.core.stats.exit_fees += signal.commission.unwrap_or(0.0);
            if self.core.filled_exit >= self.core.filled_entry - QTY_EPSILON {
                self.exit.state = TradeState::Filled;
                if self.core.stats.exit_reason == ExitReason::None {
                    self.core.stats.exit_reason = ExitReason::Unknown;
                }
            } else if self.exit.is_working() {
                self.exit.state = TradeState::PartiallyFilled;
            }
        }

        self.position_quantity = new_quantity;
        Ok(())
    }

    fn is_target_order(&self, order_id: &str, ref_id: Option<&str>) -> bool {
        self.entry.is(order_id) || self.exit.is(order_id) || ref_id == Some(self.core.ref_id.as_str())
    }

    fn is_target_position(&self, position_id: &str, ref_id: Option<&str>) -> bool {
        match ref_id {
            Some(r) if !r.is_empty() => r == self.core.ref_id || self.entry.is(r) || self.exit.is(r),
            _ => !position_id.is_empty() && self.position_id.as_deref() == Some(position_id),
        }
    }
}
