//! Trade lifecycle state machine.
//!
//! A [`Trade`] models one strategy-initiated position from entry intent to
//! settlement. Entry and exit sides carry independent [`TradeState`]s; the
//! pair, together with the filled quantities, resolves to exactly one
//! [`TradePhase`]:
//!
//! | Phase      | Condition                                                     |
//! |------------|---------------------------------------------------------------|
//! | `Canceled` | nothing filled and the entry order done (failed or netted away) |
//! | `Opening`  | nothing filled and the entry order still working              |
//! | `Closed`   | something filled and exit quantity caught up with entry       |
//! | `Closing`  | something filled and an exit order in flight                  |
//! | `Active`   | something filled, nothing in flight on the exit side          |
//!
//! Every predicate (`is_active`, `is_closed`, ...) is derived from the phase,
//! so at most one of them is true for any state combination.
//!
//! Two variants share the [`TradeLifecycle`] operations:
//! - [`PositionTrade`] for margin, indivisible margin and position markets
//! - [`AssetTrade`] for spot markets (buy, then stop or limit sell)

pub mod asset;
pub mod position;
pub mod stats;

pub use asset::AssetTrade;
pub use position::PositionTrade;
pub use stats::TradeStats;

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use sx_core::error::{SxError, SxResult};
use sx_core::pool::Poolable;
use sx_core::types::{
    Direction, ExitReason, Market, ModifierType, OrderEvent, OrderKind, OrderSignal, PositionSignal,
    ReturnCode, TradeState, TradeType,
};
use tracing::{info, warn};

use crate::proxy::TraderProxy;
use crate::strategy::Strategy;

/// Quantities below this are treated as zero.
pub const QTY_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Phase and legs
// ---------------------------------------------------------------------------

/// Coarse lifecycle phase of a trade, see the module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradePhase {
    Opening,
    Active,
    Closing,
    Closed,
    Canceled,
}

impl TradePhase {
    /// Common resolution from filled quantities and side states.
    pub(crate) fn resolve(filled_entry: f64, filled_exit: f64, entry: TradeState, exit_in_flight: bool) -> Self {
        if filled_entry <= QTY_EPSILON {
            // a filled entry with nothing attributed went to reduce someone
            // else's lot on a net position
            if entry.is_failed() || entry == TradeState::Filled { Self::Canceled } else { Self::Opening }
        } else if filled_exit >= filled_entry - QTY_EPSILON {
            Self::Closed
        } else if exit_in_flight {
            Self::Closing
        } else {
            Self::Active
        }
    }
}

/// One exchange order submitted on behalf of a trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderLeg {
    pub state: TradeState,
    pub order_id: Option<String>,
    /// Ordered quantity.
    pub quantity: f64,
    /// Quantity reported filled by the exchange so far.
    pub cumulative: f64,
}

impl OrderLeg {
    pub(crate) fn submitted(order_id: String, quantity: f64) -> Self {
        Self { state: TradeState::New, order_id: Some(order_id), quantity, cumulative: 0.0 }
    }

    pub fn is(&self, order_id: &str) -> bool {
        self.order_id.as_deref() == Some(order_id)
    }

    pub fn is_working(&self) -> bool {
        self.state.is_working()
    }

    /// Apply an order event to the leg, returning the newly filled quantity.
    ///
    /// The delta is `cumulative − previous cumulative`; a stale or repeated
    /// `TRADED` event yields zero.
    pub(crate) fn on_event(&mut self, signal: &OrderSignal) -> f64 {
        match signal.event {
            OrderEvent::Opened => {
                if matches!(self.state, TradeState::New | TradeState::Undefined) {
                    self.state = TradeState::Opened;
                }
                0.0
            }
            OrderEvent::Updated => 0.0,
            OrderEvent::Traded => {
                let cumulative = signal
                    .cumulative_filled
                    .unwrap_or(self.cumulative + signal.filled.unwrap_or(0.0));
                let delta = cumulative - self.cumulative;
                if delta > QTY_EPSILON {
                    self.cumulative = cumulative;
                }
                self.state = if signal.completed || self.cumulative >= self.quantity - QTY_EPSILON {
                    TradeState::Filled
                } else {
                    TradeState::PartiallyFilled
                };
                delta.max(0.0)
            }
            OrderEvent::Deleted => {
                if self.state.is_working() {
                    self.state = if self.cumulative > QTY_EPSILON && self.cumulative >= self.quantity - QTY_EPSILON {
                        TradeState::Filled
                    } else {
                        TradeState::Deleted
                    };
                }
                0.0
            }
            OrderEvent::Rejected => {
                if self.state.is_working() {
                    self.state = TradeState::Rejected;
                }
                0.0
            }
            OrderEvent::Canceled => {
                if self.state.is_working() {
                    self.state = TradeState::Canceled;
                }
                0.0
            }
        }
    }
}

/// Parameters of a trade entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryRequest {
    pub direction: Direction,
    pub kind: OrderKind,
    /// Limit price for limit kinds, trigger price for stop and take-profit
    /// kinds, ignored for market orders.
    pub order_price: f64,
    /// Limit of a stop-limit or take-profit-limit entry, `0.0` to rest at
    /// the trigger price.
    pub limit_price: f64,
    pub quantity: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

impl EntryRequest {
    pub fn market(direction: Direction, quantity: f64) -> Self {
        Self {
            direction,
            kind: OrderKind::Market,
            order_price: 0.0,
            limit_price: 0.0,
            quantity,
            take_profit: 0.0,
            stop_loss: 0.0,
        }
    }

    pub fn limit(direction: Direction, price: f64, quantity: f64) -> Self {
        Self { kind: OrderKind::Limit, order_price: price, ..Self::market(direction, quantity) }
    }

    pub fn with_kind(mut self, kind: OrderKind, price: f64) -> Self {
        self.kind = kind;
        self.order_price = price;
        self
    }

    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = price;
        self
    }

    /// Limit the entry order rests at once triggered.
    pub fn trigger_limit(&self) -> f64 {
        if self.limit_price > 0.0 { self.limit_price } else { self.order_price }
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = price;
        self
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = price;
        self
    }
}

// ---------------------------------------------------------------------------
// TradeCore
// ---------------------------------------------------------------------------

/// State shared by every trade variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCore {
    #[serde(skip)]
    slot: Option<u32>,
    #[serde(skip)]
    proxy: Weak<TraderProxy>,
    #[serde(skip)]
    market: Option<Arc<Market>>,

    pub(crate) id: u32,
    pub(crate) trade_type: TradeType,
    /// Client reference stamped on every order of the trade.
    pub(crate) ref_id: String,
    pub(crate) market_id: String,
    pub(crate) strategy_id: String,
    pub(crate) timeframe: f64,

    pub(crate) direction: Direction,
    pub(crate) created: f64,
    pub(crate) order_price: f64,
    pub(crate) order_quantity: f64,

    pub(crate) entry_price: f64,
    pub(crate) exit_price: f64,
    pub(crate) take_profit: f64,
    pub(crate) stop_loss: f64,

    pub(crate) filled_entry: f64,
    pub(crate) filled_exit: f64,
    pub(crate) profit_loss_rate: f64,

    pub(crate) entry_timeout: f64,
    pub(crate) expiry: f64,

    pub(crate) tp_mode: ModifierType,
    pub(crate) sl_mode: ModifierType,

    pub(crate) stats: TradeStats,
}

impl TradeCore {
    pub(crate) fn new(trade_type: TradeType, proxy: Weak<TraderProxy>) -> Self {
        Self {
            slot: None,
            proxy,
            market: None,
            id: 0,
            trade_type,
            ref_id: String::new(),
            market_id: String::new(),
            strategy_id: String::new(),
            timeframe: 0.0,
            direction: Direction::Long,
            created: 0.0,
            order_price: 0.0,
            order_quantity: 0.0,
            entry_price: 0.0,
            exit_price: 0.0,
            take_profit: 0.0,
            stop_loss: 0.0,
            filled_entry: 0.0,
            filled_exit: 0.0,
            profit_loss_rate: 0.0,
            entry_timeout: 0.0,
            expiry: 0.0,
            tp_mode: ModifierType::Local,
            sl_mode: ModifierType::Local,
            stats: TradeStats::default(),
        }
    }

    /// Upgrade the proxy reference, or report the service unreachable.
    pub(crate) fn proxy(&self) -> Result<Arc<TraderProxy>, ReturnCode> {
        self.proxy.upgrade().ok_or(ReturnCode::UnreachableService)
    }

    pub(crate) fn bind(&mut self, id: u32, market: Arc<Market>, timeframe: f64) {
        self.id = id;
        self.ref_id = format!("t{id}");
        self.market_id = market.market_id.clone();
        self.market = Some(market);
        self.timeframe = timeframe;
    }

    /// Record the entry parameters before the entry order is sent.
    pub(crate) fn begin(&mut self, strategy: &dyn Strategy, request: &EntryRequest, quantity: f64) {
        let market = strategy.market();
        self.strategy_id = strategy.identifier().to_owned();
        self.market_id = market.market_id.clone();
        self.created = market.timestamp();
        self.market = Some(market);
        self.direction = request.direction;
        self.order_price = request.order_price;
        self.order_quantity = quantity;
        self.take_profit = request.take_profit;
        self.stop_loss = request.stop_loss;
        self.stats.entry_order_kind = request.kind;
    }

    // --- accessors ---

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn trade_type(&self) -> TradeType {
        self.trade_type
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn market(&self) -> Option<&Arc<Market>> {
        self.market.as_ref()
    }

    pub fn timeframe(&self) -> f64 {
        self.timeframe
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn created(&self) -> f64 {
        self.created
    }

    pub fn order_price(&self) -> f64 {
        self.order_price
    }

    pub fn order_quantity(&self) -> f64 {
        self.order_quantity
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn exit_price(&self) -> f64 {
        self.exit_price
    }

    pub fn take_profit(&self) -> f64 {
        self.take_profit
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn filled_entry_quantity(&self) -> f64 {
        self.filled_entry
    }

    pub fn filled_exit_quantity(&self) -> f64 {
        self.filled_exit
    }

    /// Quantity still held.
    pub fn remaining_quantity(&self) -> f64 {
        (self.filled_entry - self.filled_exit).max(0.0)
    }

    /// Realized profit or loss rate of the exited quantity, net of fees.
    pub fn profit_loss_rate(&self) -> f64 {
        self.profit_loss_rate
    }

    pub fn stats(&self) -> &TradeStats {
        &self.stats
    }

    pub fn take_profit_mode(&self) -> ModifierType {
        self.tp_mode
    }

    pub fn stop_loss_mode(&self) -> ModifierType {
        self.sl_mode
    }

    pub fn set_entry_timeout(&mut self, timeout: f64) {
        self.entry_timeout = timeout;
    }

    pub fn set_expiry(&mut self, expiry: f64) {
        self.expiry = expiry;
    }

    // --- fills ---

    /// Add an entry execution, keeping the weighted average entry price.
    pub(crate) fn apply_entry_fill(&mut self, quantity: f64, price: f64, timestamp: f64) {
        if quantity <= QTY_EPSILON {
            return;
        }
        let total = self.filled_entry + quantity;
        self.entry_price = (self.entry_price * self.filled_entry + price * quantity) / total;
        self.filled_entry = total;
        self.stats.notional_value = self.entry_price * self.filled_entry;
        self.stats.record_entry(timestamp);
    }

    /// Add an exit execution. Refused when it would exit more than entered.
    pub(crate) fn apply_exit_fill(&mut self, quantity: f64, price: f64, timestamp: f64) -> SxResult<()> {
        if quantity <= QTY_EPSILON {
            return Ok(());
        }
        if self.filled_exit + quantity > self.filled_entry + QTY_EPSILON {
            return Err(SxError::Invariant(format!(
                "trade #{}: exit fill {quantity} would exceed entry ({} exited of {})",
                self.id, self.filled_exit, self.filled_entry
            )));
        }
        let total = self.filled_exit + quantity;
        self.exit_price = (self.exit_price * self.filled_exit + price * quantity) / total;
        self.filled_exit = total;
        self.stats.record_exit(timestamp);
        self.update_profit_loss_rate();
        Ok(())
    }

    fn update_profit_loss_rate(&mut self) {
        if self.entry_price <= 0.0 || self.filled_exit <= QTY_EPSILON {
            return;
        }
        let raw = self.direction.sign() * (self.exit_price - self.entry_price) / self.entry_price;
        self.profit_loss_rate = raw - self.entry_fees_rate() - self.exit_fees_rate();
    }

    /// Entry fees relative to the entry notional.
    pub fn entry_fees_rate(&self) -> f64 {
        let notional = self.entry_price * self.filled_entry;
        if notional > 0.0 { self.stats.entry_fees / notional } else { 0.0 }
    }

    /// Exit fees relative to the exit notional.
    pub fn exit_fees_rate(&self) -> f64 {
        let notional = self.exit_price * self.filled_exit;
        if notional > 0.0 { self.stats.exit_fees / notional } else { 0.0 }
    }

    /// Local stop-loss or take-profit breached by `close_price`, if any.
    pub(crate) fn local_exit_trigger(&self, close_price: f64) -> Option<ExitReason> {
        let sign = self.direction.sign();
        if self.sl_mode == ModifierType::Local
            && self.stop_loss > 0.0
            && sign * (close_price - self.stop_loss) <= 0.0
        {
            return Some(ExitReason::StopLossMarket);
        }
        if self.tp_mode == ModifierType::Local
            && self.take_profit > 0.0
            && sign * (close_price - self.take_profit) >= 0.0
        {
            return Some(ExitReason::TakeProfitMarket);
        }
        None
    }

    /// Estimated rate of closing at `price`, with the exit paying the taker
    /// fee.
    fn estimate_rate_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 || price <= 0.0 {
            return 0.0;
        }
        let raw = self.direction.sign() * (price - self.entry_price) / self.entry_price;
        let exit_fee = self.market.as_ref().map(|m| m.taker_fee.rate).unwrap_or(0.0);
        raw - self.entry_fees_rate() - exit_fee
    }
}

/// Resolve [`ModifierType::Previous`] against the last mode used for a leg.
pub(crate) fn resolve_mode(requested: ModifierType, previous: ModifierType) -> ModifierType {
    match requested {
        ModifierType::Previous => previous,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// TradeLifecycle
// ---------------------------------------------------------------------------

/// Operations common to every trade variant.
///
/// Implementors only provide the state transitions; predicates, estimates,
/// timeouts and the strategy-side safety net are derived here.
pub trait TradeLifecycle {
    fn core(&self) -> &TradeCore;

    fn core_mut(&mut self) -> &mut TradeCore;

    fn entry_state(&self) -> TradeState;

    fn exit_state(&self) -> TradeState;

    fn phase(&self) -> TradePhase;

    /// Build and submit the entry order. The entry state becomes `New` when
    /// the connector accepts it, `Rejected` otherwise.
    fn open(&mut self, strategy: &dyn Strategy, request: &EntryRequest) -> ReturnCode;

    /// Cancel the outstanding entry order. Best effort: re-check the filled
    /// quantity afterwards.
    fn cancel_open(&mut self) -> ReturnCode;

    /// Cancel the outstanding exit order.
    fn cancel_close(&mut self) -> ReturnCode;

    fn modify_take_profit(&mut self, price: f64, mode: ModifierType) -> ReturnCode;

    fn modify_stop_loss(&mut self, price: f64, mode: ModifierType) -> ReturnCode;

    /// Exit the remaining quantity at market. A second call while a close is
    /// in flight does nothing.
    fn close(&mut self, reason: ExitReason) -> ReturnCode;

    fn order_signal(&mut self, signal: &OrderSignal) -> SxResult<()>;

    fn position_signal(&mut self, signal: &PositionSignal) -> SxResult<()>;

    fn is_target_order(&self, order_id: &str, ref_id: Option<&str>) -> bool;

    fn is_target_position(&self, position_id: &str, ref_id: Option<&str>) -> bool;

    // -----------------------------------------------------------------------
    // Provided
    // -----------------------------------------------------------------------

    fn id(&self) -> u32 {
        self.core().id
    }

    fn direction(&self) -> Direction {
        self.core().direction
    }

    fn is_opening(&self) -> bool {
        self.phase() == TradePhase::Opening
    }

    fn is_active(&self) -> bool {
        self.phase() == TradePhase::Active
    }

    fn is_closing(&self) -> bool {
        self.phase() == TradePhase::Closing
    }

    fn is_closed(&self) -> bool {
        self.phase() == TradePhase::Closed
    }

    fn is_canceled(&self) -> bool {
        self.phase() == TradePhase::Canceled
    }

    /// Entry accepted by the exchange, nothing filled yet.
    fn is_opened(&self) -> bool {
        self.is_opening() && self.entry_state() == TradeState::Opened
    }

    fn can_delete(&self) -> bool {
        matches!(self.phase(), TradePhase::Closed | TradePhase::Canceled)
    }

    /// Entry still unfilled `timeout` seconds after creation. A non-positive
    /// `timeout` falls back to the trade's own entry timeout.
    fn is_entry_timeout(&self, timestamp: f64, timeout: f64) -> bool {
        let core = self.core();
        let timeout = if timeout > 0.0 { timeout } else { core.entry_timeout };
        self.is_opening() && core.created > 0.0 && timeout > 0.0 && timestamp - core.created > timeout
    }

    /// Position held for longer than `timeout` seconds. A non-positive
    /// `timeout` falls back to the trade's expiry.
    fn is_trade_timeout(&self, timestamp: f64, timeout: f64) -> bool {
        let core = self.core();
        let timeout = if timeout > 0.0 { timeout } else { core.expiry };
        let since = core.stats.first_realized_entry_timestamp;
        self.is_active() && since > 0.0 && timeout > 0.0 && timestamp - since > timeout
    }

    /// Rate obtained by closing now at the market close-execution price.
    fn estimate_profit_loss_rate(&self) -> f64 {
        let core = self.core();
        match core.market() {
            Some(market) => core.estimate_rate_at(market.close_exec_price(core.direction)),
            None => 0.0,
        }
    }

    fn estimate_take_profit_rate(&self) -> f64 {
        let core = self.core();
        core.estimate_rate_at(core.take_profit)
    }

    fn estimate_stop_loss_rate(&self) -> f64 {
        let core = self.core();
        core.estimate_rate_at(core.stop_loss)
    }

    /// Refresh best/worst prices and the unrealized profit or loss.
    fn update_stats(&mut self, last_price: f64, timestamp: f64) {
        let core = self.core_mut();
        if core.filled_entry <= QTY_EPSILON || last_price <= 0.0 {
            return;
        }
        let direction = core.direction;
        core.stats.track_price(direction, last_price, timestamp);
        core.stats.unrealized_profit_loss =
            direction.sign() * (last_price - core.entry_price) * core.remaining_quantity();
    }

    /// Strategy-side safety net: close when a local stop-loss or take-profit
    /// is breached by the current close-execution price.
    fn process(&mut self, _timestamp: f64) {
        if self.phase() != TradePhase::Active {
            return;
        }
        let core = self.core();
        let Some(market) = core.market() else {
            return;
        };
        let close_price = market.close_exec_price(core.direction);
        if close_price <= 0.0 {
            return;
        }
        if let Some(reason) = core.local_exit_trigger(close_price) {
            let id = core.id;
            let ret = self.close(reason);
            if ret.is_accepted() {
                info!("[trade] #{id} {reason:?} at {close_price}");
            } else if ret != ReturnCode::NothingToDo {
                warn!("[trade] #{id} {reason:?} close failed: {ret}");
            }
        }
    }

    fn state_to_str(&self) -> &'static str {
        match self.phase() {
            TradePhase::Opening if self.entry_state() == TradeState::New => "new",
            TradePhase::Opening => "opened",
            TradePhase::Canceled if self.entry_state() == TradeState::Rejected => "rejected",
            TradePhase::Canceled => "canceled",
            TradePhase::Active if self.entry_state().is_working() => "filling",
            TradePhase::Active => "filled",
            TradePhase::Closing => "closing",
            TradePhase::Closed => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A trade of either variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum Trade {
    Position(PositionTrade),
    Asset(AssetTrade),
}

macro_rules! dispatch {
    ($self:ident, $t:ident => $e:expr) => {
        match $self {
            Trade::Position($t) => $e,
            Trade::Asset($t) => $e,
        }
    };
}

impl Trade {
    /// A blank trade of the variant matching `trade_type`.
    pub fn new(trade_type: TradeType, proxy: Weak<TraderProxy>) -> Self {
        match trade_type {
            TradeType::Spot => Self::Asset(AssetTrade::new(proxy)),
            _ => Self::Position(PositionTrade::new(trade_type, proxy)),
        }
    }

    pub fn trade_type(&self) -> TradeType {
        self.core().trade_type
    }

    /// Persistable copy of the trade.
    pub fn dumps(&self) -> TradeRecord {
        TradeRecord {
            market_id: self.core().market_id.clone(),
            strategy_id: self.core().strategy_id.clone(),
            trade: self.clone(),
        }
    }

    /// Restore the state saved by [`Trade::dumps`] into this pooled trade.
    /// Pool slot and proxy binding are kept; the market is rebound.
    pub fn loads(&mut self, record: &TradeRecord, market: Arc<Market>) -> SxResult<()> {
        if record.trade.trade_type() != self.trade_type() {
            return Err(SxError::Persistence(format!(
                "record is a {} trade, slot holds {}",
                record.trade.trade_type(),
                self.trade_type()
            )));
        }
        let slot = self.core().slot;
        let proxy = self.core().proxy.clone();
        *self = record.trade.clone();
        let core = self.core_mut();
        core.slot = slot;
        core.proxy = proxy;
        core.market = Some(market);
        Ok(())
    }
}

impl TradeLifecycle for Trade {
    fn core(&self) -> &TradeCore {
        dispatch!(self, t => t.core())
    }

    fn core_mut(&mut self) -> &mut TradeCore {
        dispatch!(self, t => t.core_mut())
    }

    fn entry_state(&self) -> TradeState {
        dispatch!(self, t => t.entry_state())
    }

    fn exit_state(&self) -> TradeState {
        dispatch!(self, t => t.exit_state())
    }

    fn phase(&self) -> TradePhase {
        dispatch!(self, t => t.phase())
    }

    fn open(&mut self, strategy: &dyn Strategy, request: &EntryRequest) -> ReturnCode {
        dispatch!(self, t => t.open(strategy, request))
    }

    fn cancel_open(&mut self) -> ReturnCode {
        dispatch!(self, t => t.cancel_open())
    }

    fn cancel_close(&mut self) -> ReturnCode {
        dispatch!(self, t => t.cancel_close())
    }

    fn modify_take_profit(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        dispatch!(self, t => t.modify_take_profit(price, mode))
    }

    fn modify_stop_loss(&mut self, price: f64, mode: ModifierType) -> ReturnCode {
        dispatch!(self, t => t.modify_stop_loss(price, mode))
    }

    fn close(&mut self, reason: ExitReason) -> ReturnCode {
        dispatch!(self, t => t.close(reason))
    }

    fn order_signal(&mut self, signal: &OrderSignal) -> SxResult<()> {
        dispatch!(self, t => t.order_signal(signal))
    }

    fn position_signal(&mut self, signal: &PositionSignal) -> SxResult<()> {
        dispatch!(self, t => t.position_signal(signal))
    }

    fn is_target_order(&self, order_id: &str, ref_id: Option<&str>) -> bool {
        dispatch!(self, t => t.is_target_order(order_id, ref_id))
    }

    fn is_target_position(&self, position_id: &str, ref_id: Option<&str>) -> bool {
        dispatch!(self, t => t.is_target_position(position_id, ref_id))
    }
}

impl Poolable for Trade {
    fn slot(&self) -> Option<u32> {
        self.core().slot
    }

    fn set_slot(&mut self, slot: Option<u32>) {
        self.core_mut().slot = slot;
    }

    fn reset(&mut self) {
        let slot = self.core().slot;
        let proxy = self.core().proxy.clone();
        *self = Trade::new(self.trade_type(), proxy);
        self.core_mut().slot = slot;
    }
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.core();
        write!(
            f,
            "#{} {} {} {} {} qty={}/{} entry={} exit={} pl={:.2}%",
            c.id,
            c.market_id,
            c.trade_type,
            c.direction,
            self.state_to_str(),
            c.filled_exit,
            c.filled_entry,
            c.entry_price,
            c.exit_price,
            c.profit_loss_rate * 100.0
        )
    }
}

/// Persisted form of a trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub market_id: String,
    pub strategy_id: String,
    pub trade: Trade,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Fixture, position_signal};
    use proptest::prelude::*;
    use sx_core::types::PositionEvent;

    const STATES: [TradeState; 9] = [
        TradeState::Undefined,
        TradeState::New,
        TradeState::Opened,
        TradeState::PartiallyFilled,
        TradeState::Filled,
        TradeState::Rejected,
        TradeState::Canceled,
        TradeState::Deleted,
        TradeState::Error,
    ];

    fn bare_core() -> TradeCore {
        TradeCore::new(TradeType::Margin, Weak::new())
    }

    proptest! {
        #[test]
        fn entry_price_is_weighted_mean(fills in prop::collection::vec((0.01f64..50.0, 1.0f64..1000.0), 1..20)) {
            let mut core = bare_core();
            for (q, p) in &fills {
                core.apply_entry_fill(*q, *p, 1.0);
            }
            let qty: f64 = fills.iter().map(|(q, _)| q).sum();
            let notional: f64 = fills.iter().map(|(q, p)| q * p).sum();
            prop_assert!((core.filled_entry_quantity() - qty).abs() < 1e-6);
            prop_assert!((core.entry_price() - notional / qty).abs() < 1e-6);
        }

        #[test]
        fn exit_never_exceeds_entry(entry in 0.1f64..100.0, exits in prop::collection::vec(0.01f64..40.0, 1..10)) {
            let mut core = bare_core();
            core.apply_entry_fill(entry, 10.0, 1.0);
            for q in exits {
                let before = core.filled_exit_quantity();
                match core.apply_exit_fill(q, 11.0, 2.0) {
                    Ok(()) => prop_assert!((core.filled_exit_quantity() - before - q).abs() < 1e-9),
                    Err(_) => prop_assert_eq!(core.filled_exit_quantity(), before),
                }
                prop_assert!(core.filled_exit_quantity() <= core.filled_entry_quantity() + QTY_EPSILON);
            }
        }

        #[test]
        fn phase_predicates_exclusive(
            entry in 0.0f64..10.0,
            ratio in 0.0f64..1.5,
            state in 0usize..9,
            in_flight in any::<bool>(),
        ) {
            let exit = (entry * ratio).min(entry);
            let phase = TradePhase::resolve(entry, exit, STATES[state], in_flight);
            let closed = phase == TradePhase::Closed;
            let canceled = phase == TradePhase::Canceled;
            prop_assert!(!(closed && canceled));
            if entry <= QTY_EPSILON {
                prop_assert!(!closed);
            }
        }
    }

    #[test]
    fn filled_entry_without_share_resolves_canceled() {
        assert_eq!(TradePhase::resolve(0.0, 0.0, TradeState::Filled, false), TradePhase::Canceled);
        assert_eq!(TradePhase::resolve(0.0, 0.0, TradeState::Undefined, false), TradePhase::Opening);
        assert_eq!(TradePhase::resolve(1.0, 0.0, TradeState::Filled, false), TradePhase::Active);
    }

    #[test]
    fn rejected_exit_fill_leaves_core_untouched() {
        let mut core = bare_core();
        core.apply_entry_fill(1.0, 100.0, 1.0);
        assert!(core.apply_exit_fill(1.5, 90.0, 2.0).is_err());
        assert_eq!(core.filled_exit_quantity(), 0.0);
        assert_eq!(core.exit_price(), 0.0);
    }

    #[test]
    fn short_rate_sign() {
        let mut core = bare_core();
        core.direction = Direction::Short;
        core.apply_entry_fill(2.0, 100.0, 1.0);
        core.apply_exit_fill(2.0, 90.0, 2.0).unwrap();
        assert!((core.profit_loss_rate() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn fees_reduce_rate() {
        let mut core = bare_core();
        core.apply_entry_fill(1.0, 100.0, 1.0);
        core.stats.entry_fees = 0.1;
        core.stats.exit_fees = 0.11;
        core.apply_exit_fill(1.0, 110.0, 2.0).unwrap();
        assert!((core.profit_loss_rate() - (0.1 - 0.001 - 0.001)).abs() < 1e-12);
    }

    #[test]
    fn leg_ignores_stale_traded() {
        let fx = Fixture::new();
        let mut leg = OrderLeg::submitted("o1".into(), 5.0);
        let mut s = fx.order_signal(OrderEvent::Traded, "o1");
        s.cumulative_filled = Some(3.0);
        assert_eq!(leg.on_event(&s), 3.0);
        assert_eq!(leg.on_event(&s), 0.0);
        assert_eq!(leg.state, TradeState::PartiallyFilled);
        s.cumulative_filled = Some(5.0);
        assert_eq!(leg.on_event(&s), 2.0);
        assert_eq!(leg.state, TradeState::Filled);
    }

    #[test]
    fn entry_timeout_only_while_opening() {
        let fx = Fixture::new();
        fx.market.set_price(100.0, 100.0, 1000.0);
        let mut trade = fx.trade(TradeType::Margin);
        trade.open(fx.strategy.as_ref(), &EntryRequest::limit(Direction::Long, 90.0, 1.0));
        assert!(!trade.is_entry_timeout(1030.0, 60.0));
        assert!(trade.is_entry_timeout(1061.0, 60.0));
        trade.core_mut().set_entry_timeout(10.0);
        assert!(trade.is_entry_timeout(1011.0, 0.0));
    }

    #[test]
    fn dumps_then_loads_keeps_fills() {
        let fx = Fixture::new();
        let mut trade = fx.trade(TradeType::Margin);
        trade.open(fx.strategy.as_ref(), &EntryRequest::market(Direction::Long, 4.0).with_stop_loss(90.0));
        let r = trade.core().ref_id().to_owned();
        let mut s = position_signal(PositionEvent::Opened, "BTCUSDT", &r, Direction::Long);
        s.quantity = Some(4.0);
        s.exec_price = Some(100.0);
        trade.position_signal(&s).unwrap();

        let record = trade.dumps();
        let json = serde_json::to_string(&record).unwrap();
        let back: TradeRecord = serde_json::from_str(&json).unwrap();

        let mut restored = fx.trade(TradeType::Margin);
        restored.loads(&back, fx.market.clone()).unwrap();
        assert_eq!(restored.id(), trade.id());
        assert_eq!(restored.core().filled_entry_quantity(), 4.0);
        assert_eq!(restored.core().stop_loss(), 90.0);
        assert!(restored.is_active());
        assert!(restored.is_target_position("BTCUSDT", Some(&r)));

        let mut spot = fx.trade(TradeType::Spot);
        assert!(spot.loads(&back, fx.market.clone()).is_err());
    }

    #[test]
    fn display_mentions_state() {
        let fx = Fixture::new();
        let trade = fx.trade(TradeType::Position);
        let text = trade.to_string();
        assert!(text.starts_with(&format!("#{} BTCUSDT position long", trade.id())));
    }
}
