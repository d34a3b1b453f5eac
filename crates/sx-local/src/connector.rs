//! The local connector: a simulated exchange driven by market updates.
//!
//! ```text
//!   strategy thread                    market-data thread
//!   ───────────────                    ──────────────────
//!   create_order ──┐                   market.set_price(..)
//!   cancel_order ──┤                   connector.update(ts)
//!   close_position ┼──► LocalState ◄──┘   │ triggers → backend
//!   modify_position┘    (one mutex)       │ position stop / limit
//!                                         │ mark-to-market, drawdown
//!                          │              ▼
//!                          └──── signals ──► TraderProxy channel
//! ```
//!
//! Signals produced under the state lock are collected first and posted once
//! the lock is released, together with the orders and positions returning to
//! the proxy pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use sx_core::config::AccountConfig;
use sx_core::types::{
    Direction, Market, MarketRegistry, Order, OrderEvent, OrderKind, OrderSignal, Position, PositionEvent,
    ReturnCode, StatusEvent, StatusSignal,
};
use sx_trade::{Connector, Signal, TraderProxy};
use tracing::{debug, info, warn};

use crate::account::{AccountSample, VirtualAccount};
use crate::backend::{self, Exec, QTY_EPSILON};
use crate::state::{LocalState, Lot, PendingOrder, VirtualAsset};
use crate::trigger;

/// What one locked section hands back to the proxy.
#[derive(Default)]
struct Outcome {
    signals: Vec<Signal>,
    orders: Vec<Order>,
    positions: Vec<Position>,
}

pub struct LocalConnector {
    markets: Arc<MarketRegistry>,
    state: Mutex<LocalState>,
    proxy: RwLock<Weak<TraderProxy>>,
    connected: AtomicBool,
    /// Initial account and asset figures still to be published.
    announce: AtomicBool,
}

impl LocalConnector {
    pub fn new(account: &AccountConfig, markets: Arc<MarketRegistry>) -> Self {
        Self {
            markets,
            state: Mutex::new(LocalState::new(account)),
            proxy: RwLock::new(Weak::new()),
            connected: AtomicBool::new(true),
            announce: AtomicBool::new(true),
        }
    }

    fn proxy(&self) -> Option<Arc<TraderProxy>> {
        self.proxy.read().upgrade()
    }

    /// Simulate a connectivity change.
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) == connected {
            return;
        }
        let event = if connected { StatusEvent::ConnectionAcquired } else { StatusEvent::ConnectionLost };
        if let Some(proxy) = self.proxy() {
            proxy.post_signal(Signal::Status(StatusSignal { event, connector: self.name().to_owned() }));
        }
    }

    fn flush(&self, proxy: &TraderProxy, out: Outcome) {
        if self.announce.swap(false, Ordering::AcqRel) {
            let st = self.state.lock();
            proxy.post_signal(Signal::Account(st.account.to_signal()));
            for symbol in st.assets.keys() {
                proxy.post_signal(Signal::Asset(st.asset_signal(symbol)));
            }
        }
        for signal in out.signals {
            proxy.post_signal(signal);
        }
        for order in out.orders {
            if let Err(e) = proxy.free_order(order) {
                warn!("[local] {e}");
            }
        }
        for position in out.positions {
            if let Err(e) = proxy.free_position(position) {
                warn!("[local] {e}");
            }
        }
    }

    /// Release an order refused before reaching the book.
    fn refuse(&self, proxy: &TraderProxy, order: Order, code: ReturnCode) -> ReturnCode {
        debug!("[local] order {} refused: {code}", order.order_id);
        if let Err(e) = proxy.free_order(order) {
            warn!("[local] {e}");
        }
        code
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `order` through its backend at `price`.
    fn execute(
        state: &mut LocalState,
        order: &mut Order,
        market: &Market,
        proxy: &TraderProxy,
        price: f64,
        maker: bool,
        out: &mut Outcome,
    ) -> ReturnCode {
        let Some(backend) = backend::select(market, order) else {
            return ReturnCode::Error;
        };
        let mut ex = Exec::new(market, proxy, price, maker, state.timestamp);
        let code = backend.execute(state, order, &mut ex);
        if code.is_accepted() {
            debug!(
                "[local] {} {} {:?} {} @ {price} ({})",
                backend.name(),
                order.order_id,
                order.direction,
                order.filled,
                order.reference()
            );
            out.signals.append(&mut ex.signals);
            out.positions.append(&mut ex.freed);
            if order.margin {
                out.signals.push(Signal::Account(state.account.to_signal()));
            }
        }
        code
    }

    /// Execute a market order at once or rest any other kind.
    fn submit(
        &self,
        state: &mut LocalState,
        mut order: Order,
        market: &Market,
        proxy: &TraderProxy,
        out: &mut Outcome,
    ) -> ReturnCode {
        if order.created <= 0.0 {
            order.created = state.timestamp.max(market.timestamp());
        }

        if order.kind == OrderKind::Market {
            let Some(price) = trigger::evaluate(&order, market.bid(), market.ask()) else {
                out.signals.push(Signal::Order(OrderSignal::from_order(OrderEvent::Rejected, &order)));
                out.orders.push(order);
                return ReturnCode::Rejected;
            };
            let opened = OrderSignal::from_order(OrderEvent::Opened, &order);
            let mut executed = Outcome::default();
            let code = Self::execute(state, &mut order, market, proxy, price, false, &mut executed);
            if code.is_accepted() {
                out.signals.push(Signal::Order(opened));
                out.signals.append(&mut executed.signals);
                out.signals.push(Signal::Order(OrderSignal::from_order(OrderEvent::Deleted, &order)));
                out.positions.append(&mut executed.positions);
            } else {
                out.signals.push(Signal::Order(OrderSignal::from_order(OrderEvent::Rejected, &order)));
            }
            out.orders.push(order);
            return code;
        }

        // spot buys reserve their quote up front
        let mut locked = 0.0;
        if !order.margin && order.direction == Direction::Long {
            let price = if order.order_price > 0.0 { order.order_price } else { order.stop_price };
            let need = order.quantity * price;
            let need = need + market.commission(need, false);
            let quote = state.asset_mut(&market.quote);
            if quote.free + QTY_EPSILON < need {
                out.orders.push(order);
                return ReturnCode::InsufficientFunds;
            }
            quote.free -= need;
            quote.locked += need;
            locked = need;
            out.signals.push(Signal::Asset(state.asset_signal(&market.quote)));
        }

        state.seq += 1;
        out.signals.push(Signal::Order(OrderSignal::from_order(OrderEvent::Opened, &order)));
        debug!("[local] order {} resting {:?} {:?}", order.order_id, order.kind, order.direction);
        state.orders.insert(order.order_id.clone(), PendingOrder { seq: state.seq, order, locked });
        ReturnCode::Accepted
    }

    /// Give back the quote reserved by a pending spot buy.
    fn unlock(state: &mut LocalState, pending: &PendingOrder, market: &Market, out: &mut Outcome) {
        if pending.locked <= 0.0 {
            return;
        }
        let quote = state.asset_mut(&market.quote);
        quote.locked = (quote.locked - pending.locked).max(0.0);
        quote.free += pending.locked;
        out.signals.push(Signal::Asset(state.asset_signal(&market.quote)));
    }

    /// Internal market order closing `quantity` of the position `position_id`.
    fn close_order(state: &LocalState, proxy: &TraderProxy, position_id: &str, quantity: f64) -> Option<Order> {
        let vp = state.positions.get(position_id)?;
        let lot = vp.lots.front()?;
        let mut order = proxy.new_order(&lot.strategy_id);
        order.market_id.clone_from(&vp.position.market_id);
        order.ref_id = Some(lot.ref_id.clone());
        order.position_id = Some(position_id.to_owned());
        order.direction = vp.position.direction.opposite();
        order.kind = OrderKind::Market;
        order.quantity = if quantity > 0.0 { quantity.min(vp.position.quantity) } else { vp.position.quantity };
        order.margin = true;
        order.hedging = vp.hedging;
        order.reduce_only = true;
        Some(order)
    }

    // -----------------------------------------------------------------------
    // Market updates
    // -----------------------------------------------------------------------

    /// Advance the simulation to `timestamp` against the current market
    /// prices: fire pending orders in arrival order, apply position stops and
    /// limits, then mark everything to market.
    pub fn update(&self, timestamp: f64) {
        let Some(proxy) = self.proxy() else {
            return;
        };
        let mut out = Outcome::default();
        {
            let mut state = self.state.lock();
            state.timestamp = timestamp;
            self.fire_pending(&mut state, &proxy, &mut out);
            self.check_positions(&mut state, &proxy, &mut out);
            self.mark_to_market(&mut state);
            state.account.update_draw_down();
            state.account.update_samples(timestamp);
            out.signals.push(Signal::Account(state.account.to_signal()));
        }
        self.flush(&proxy, out);
    }

    fn fire_pending(&self, state: &mut LocalState, proxy: &TraderProxy, out: &mut Outcome) {
        let mut queue: Vec<(u64, String)> = state.orders.iter().map(|(id, p)| (p.seq, id.clone())).collect();
        queue.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, order_id) in queue {
            let Some(pending) = state.orders.get(&order_id) else {
                continue;
            };
            let Some(market) = self.markets.get(&pending.order.market_id) else {
                continue;
            };
            if !market.is_tradeable() {
                continue;
            }
            let Some(price) = trigger::evaluate(&pending.order, market.bid(), market.ask()) else {
                continue;
            };
            let Some(mut pending) = state.orders.remove(&order_id) else {
                continue;
            };
            Self::unlock(state, &pending, &market, out);

            let maker = pending.order.kind.is_limit_type();
            let code = Self::execute(state, &mut pending.order, &market, proxy, price, maker, out);
            let event = if code.is_accepted() {
                OrderEvent::Deleted
            } else {
                info!("[local] order {} triggered at {price} but {code}", pending.order.order_id);
                OrderEvent::Rejected
            };
            out.signals.push(Signal::Order(OrderSignal::from_order(event, &pending.order)));
            out.orders.push(pending.order);
        }
    }

    fn check_positions(&self, state: &mut LocalState, proxy: &TraderProxy, out: &mut Outcome) {
        let hits: Vec<String> = state
            .positions
            .iter()
            .filter(|(_, vp)| {
                self.markets.get(&vp.position.market_id).is_some_and(|m| {
                    let close = m.close_exec_price(vp.position.direction);
                    close > 0.0 && (vp.position.stop_hit(close) || vp.position.limit_hit(close))
                })
            })
            .map(|(pid, _)| pid.clone())
            .collect();

        for pid in hits {
            let Some(order) = Self::close_order(state, proxy, &pid, 0.0) else {
                continue;
            };
            let Some(market) = self.markets.get(&order.market_id) else {
                out.orders.push(order);
                continue;
            };
            info!("[local] position {pid} stop/limit reached");
            let code = self.submit(state, order, &market, proxy, out);
            if !code.is_accepted() {
                warn!("[local] closing position {pid}: {code}");
            }
        }
    }

    fn mark_to_market(&self, state: &mut LocalState) {
        let mut profit_loss = 0.0;
        for vp in state.positions.values_mut() {
            let Some(market) = self.markets.get(&vp.position.market_id) else {
                continue;
            };
            let close = market.close_exec_price(vp.position.direction);
            if close > 0.0 {
                vp.position.update_profit_loss(close, market.contract_size);
            }
            profit_loss += vp.position.profit_loss;
        }

        let currency = state.account.currency.clone();
        let mut asset_profit_loss = 0.0;
        for id in self.markets.ids() {
            let Some(market) = self.markets.get(&id) else {
                continue;
            };
            if market.quote != currency || !market.has_spot() {
                continue;
            }
            if let Some(asset) = state.assets.get(&market.base) {
                let bid = market.bid();
                if asset.avg_price > 0.0 && bid > 0.0 {
                    asset_profit_loss += asset.total() * (bid - asset.avg_price);
                }
            }
        }

        state.account.profit_loss = profit_loss;
        state.account.asset_profit_loss = asset_profit_loss;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn account(&self) -> VirtualAccount {
        self.state.lock().account.clone()
    }

    pub fn balance(&self) -> f64 {
        self.state.lock().account.balance
    }

    pub fn equity(&self) -> f64 {
        self.state.lock().account.equity()
    }

    pub fn free_margin(&self) -> f64 {
        self.state.lock().account.free_margin()
    }

    /// Unrealized profit or loss of positions and held assets.
    pub fn profit_loss(&self) -> f64 {
        let state = self.state.lock();
        state.account.profit_loss + state.account.asset_profit_loss
    }

    /// Current drawdown as `(rate, absolute)`.
    pub fn draw_down(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.account.draw_down_rate, state.account.draw_down)
    }

    pub fn samples(&self) -> Vec<AccountSample> {
        self.state.lock().account.samples().to_vec()
    }

    /// Resting orders in arrival order.
    pub fn pending_orders(&self) -> Vec<Order> {
        let state = self.state.lock();
        let mut pending: Vec<&PendingOrder> = state.orders.values().collect();
        pending.sort_unstable_by_key(|p| p.seq);
        pending.into_iter().map(|p| p.order.clone()).collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.lock().positions.values().map(|vp| vp.position.clone()).collect()
    }

    /// Lots composing a position, oldest first.
    pub fn lots(&self, position_id: &str) -> Vec<Lot> {
        self.state.lock().positions.get(position_id).map(|vp| vp.lots.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn asset(&self, symbol: &str) -> Option<VirtualAsset> {
        self.state.lock().assets.get(symbol).cloned()
    }
}

impl Connector for LocalConnector {
    fn name(&self) -> &str {
        "local"
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_trader_proxy(&self, proxy: Weak<TraderProxy>) {
        *self.proxy.write() = proxy;
        self.announce.store(true, Ordering::Release);
    }

    fn create_order(&self, order: Order) -> ReturnCode {
        let Some(proxy) = self.proxy() else {
            return ReturnCode::UnreachableService;
        };
        if !self.connected() {
            return self.refuse(&proxy, order, ReturnCode::UnreachableService);
        }
        let Some(market) = self.markets.get(&order.market_id) else {
            return self.refuse(&proxy, order, ReturnCode::InvalidArgs);
        };
        if order.quantity <= 0.0 || !trigger::has_valid_prices(&order) {
            return self.refuse(&proxy, order, ReturnCode::InvalidArgs);
        }
        if backend::select(&market, &order).is_none() {
            return self.refuse(&proxy, order, ReturnCode::Error);
        }
        if !market.is_tradeable() {
            return self.refuse(&proxy, order, ReturnCode::Rejected);
        }

        let mut out = Outcome::default();
        let code = {
            let mut state = self.state.lock();
            self.submit(&mut state, order, &market, &proxy, &mut out)
        };
        self.flush(&proxy, out);
        code
    }

    fn cancel_order(&self, order_id: &str) -> ReturnCode {
        let Some(proxy) = self.proxy() else {
            return ReturnCode::UnreachableService;
        };
        if !self.connected() {
            return ReturnCode::UnreachableService;
        }
        let mut out = Outcome::default();
        {
            let mut state = self.state.lock();
            let Some(pending) = state.orders.remove(order_id) else {
                return ReturnCode::InvalidArgs;
            };
            if let Some(market) = self.markets.get(&pending.order.market_id) {
                Self::unlock(&mut state, &pending, &market, &mut out);
            }
            out.signals.push(Signal::Order(OrderSignal::from_order(OrderEvent::Canceled, &pending.order)));
            out.orders.push(pending.order);
        }
        debug!("[local] order {order_id} canceled");
        self.flush(&proxy, out);
        ReturnCode::Accepted
    }

    fn close_position(
        &self,
        position_id: &str,
        direction: Direction,
        quantity: f64,
        taker: bool,
        limit_price: f64,
    ) -> ReturnCode {
        let Some(proxy) = self.proxy() else {
            return ReturnCode::UnreachableService;
        };
        if !self.connected() {
            return ReturnCode::UnreachableService;
        }
        let mut out = Outcome::default();
        let code = {
            let mut state = self.state.lock();
            let Some(mut order) = Self::close_order(&state, &proxy, position_id, quantity) else {
                return ReturnCode::InvalidArgs;
            };
            if order.direction == direction {
                warn!("[local] close of {position_id} asked for the wrong side");
                out.orders.push(order);
                ReturnCode::InvalidArgs
            } else {
                match self.markets.get(&order.market_id) {
                    Some(market) => {
                        if !taker {
                            order.kind = OrderKind::Limit;
                            order.order_price = limit_price;
                        }
                        if order.kind == OrderKind::Limit && limit_price <= 0.0 {
                            out.orders.push(order);
                            ReturnCode::InvalidArgs
                        } else {
                            self.submit(&mut state, order, &market, &proxy, &mut out)
                        }
                    }
                    None => {
                        out.orders.push(order);
                        ReturnCode::InvalidArgs
                    }
                }
            }
        };
        self.flush(&proxy, out);
        code
    }

    fn modify_position(&self, position_id: &str, stop_price: f64, limit_price: f64) -> ReturnCode {
        let Some(proxy) = self.proxy() else {
            return ReturnCode::UnreachableService;
        };
        if !self.connected() {
            return ReturnCode::UnreachableService;
        }
        let mut out = Outcome::default();
        {
            let mut state = self.state.lock();
            let timestamp = state.timestamp;
            let Some(vp) = state.positions.get_mut(position_id) else {
                return ReturnCode::InvalidArgs;
            };
            vp.position.stop_price = stop_price.max(0.0);
            vp.position.limit_price = limit_price.max(0.0);
            vp.position.updated = timestamp;
            out.signals.push(Signal::Position(backend::position_signal(vp, PositionEvent::Amended)));
        }
        self.flush(&proxy, out);
        ReturnCode::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sx_core::types::{TradeCaps, TradeType};
    use sx_trade::{EntryRequest, Strategy, Trade, TradeLifecycle, TradeManager};

    struct Bench {
        connector: Arc<LocalConnector>,
        proxy: Arc<TraderProxy>,
        market: Arc<Market>,
    }

    fn bench(caps: u8, balance: f64) -> Bench {
        let registry = Arc::new(MarketRegistry::new());
        let market = registry.insert(Market::new("BTCUSDT", "BTC", "USDT", TradeCaps(caps)));
        let mut config = AccountConfig { balance: Some(balance), ..AccountConfig::default() };
        config.assets.insert("USDT".into(), 1000.0);
        let connector = Arc::new(LocalConnector::new(&config, registry.clone()));
        let proxy = TraderProxy::new(connector.clone(), registry);
        Bench { connector, proxy, market }
    }

    impl Bench {
        fn tick(&self, bid: f64, ask: f64, ts: f64) {
            self.market.set_price(bid, ask, ts);
            self.connector.update(ts);
        }

        fn order(&self, r: &str, direction: Direction, kind: OrderKind, price: f64, qty: f64) -> Order {
            let mut o = self.proxy.new_order("s1");
            o.market_id = "BTCUSDT".into();
            o.ref_id = Some(r.to_owned());
            o.direction = direction;
            o.kind = kind;
            if kind == OrderKind::Limit {
                o.order_price = price;
            } else {
                o.stop_price = price;
            }
            o.quantity = qty;
            o.margin = true;
            o
        }
    }

    #[test]
    fn initial_account_published() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        b.tick(100.0, 100.0, 1.0);
        b.proxy.dispatch_signals();
        assert_eq!(b.proxy.account().balance, 10_000.0);
        assert_eq!(b.proxy.free_asset_quantity("USDT"), 1000.0);
    }

    #[test]
    fn market_order_executes_at_once() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        b.tick(99.0, 101.0, 1.0);
        let code = b.connector.create_order(b.order("t1", Direction::Long, OrderKind::Market, 0.0, 2.0));
        assert_eq!(code, ReturnCode::Accepted);
        let positions = b.connector.open_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].avg_price, 101.0);
        assert!(b.connector.pending_orders().is_empty());

        b.tick(104.0, 106.0, 2.0);
        assert_eq!(b.connector.account().profit_loss, 6.0);
        assert_eq!(b.connector.equity(), 10_006.0);
    }

    #[test]
    fn market_order_without_quote_rejected() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        let code = b.connector.create_order(b.order("t1", Direction::Long, OrderKind::Market, 0.0, 1.0));
        assert_eq!(code, ReturnCode::Rejected);
        assert_eq!(b.proxy.pool_usage().0, 0);
    }

    #[test]
    fn limit_then_stop_scenario() {
        // zero spread: limit buy at 100 fills, short stop at 95 closes
        let b = bench(TradeCaps::MARGIN | TradeCaps::FIFO, 10_000.0);
        b.tick(101.0, 101.0, 1.0);
        assert!(b.connector.create_order(b.order("t1", Direction::Long, OrderKind::Limit, 100.0, 1.0)).is_accepted());
        b.tick(100.5, 100.5, 2.0);
        assert_eq!(b.connector.pending_orders().len(), 1);
        b.tick(100.0, 100.0, 3.0);
        assert!(b.connector.pending_orders().is_empty());

        let mut stop = b.order("t1", Direction::Short, OrderKind::Stop, 95.0, 1.0);
        stop.reduce_only = true;
        assert!(b.connector.create_order(stop).is_accepted());
        b.tick(96.0, 96.0, 4.0);
        assert_eq!(b.connector.open_positions().len(), 1);
        b.tick(95.0, 95.0, 5.0);
        assert!(b.connector.open_positions().is_empty());
        assert_eq!(b.connector.balance(), 9_995.0);
        assert_eq!(b.proxy.pool_usage().1, 0);
    }

    #[test]
    fn pending_orders_fire_in_arrival_order() {
        let b = bench(TradeCaps::MARGIN | TradeCaps::FIFO, 10_000.0);
        b.tick(110.0, 110.0, 1.0);
        for r in ["t1", "t2", "t3"] {
            b.connector.create_order(b.order(r, Direction::Long, OrderKind::Limit, 100.0, 1.0));
        }
        b.tick(100.0, 100.0, 2.0);
        let refs: Vec<String> = b.connector.lots("BTCUSDT").into_iter().map(|l| l.ref_id).collect();
        assert_eq!(refs, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn cancel_releases_order() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        b.tick(110.0, 110.0, 1.0);
        let o = b.order("t1", Direction::Long, OrderKind::Limit, 100.0, 1.0);
        let id = o.order_id.clone();
        b.connector.create_order(o);
        assert_eq!(b.proxy.pool_usage().0, 1);
        assert_eq!(b.connector.cancel_order(&id), ReturnCode::Accepted);
        assert_eq!(b.connector.cancel_order(&id), ReturnCode::InvalidArgs);
        assert_eq!(b.proxy.pool_usage().0, 0);
    }

    #[test]
    fn spot_buy_locks_quote() {
        let b = bench(TradeCaps::SPOT, 0.0);
        b.tick(110.0, 110.0, 1.0);
        let mut o = b.order("t1", Direction::Long, OrderKind::Limit, 100.0, 2.0);
        o.margin = false;
        let id = o.order_id.clone();
        assert!(b.connector.create_order(o).is_accepted());
        let usdt = b.connector.asset("USDT").unwrap_or_default();
        assert_eq!((usdt.free, usdt.locked), (800.0, 200.0));

        let mut too_big = b.order("t2", Direction::Long, OrderKind::Limit, 100.0, 9.0);
        too_big.margin = false;
        assert_eq!(b.connector.create_order(too_big), ReturnCode::InsufficientFunds);

        b.connector.cancel_order(&id);
        let usdt = b.connector.asset("USDT").unwrap_or_default();
        assert_eq!((usdt.free, usdt.locked), (1000.0, 0.0));
    }

    #[test]
    fn spot_fill_tracks_asset_profit() {
        let b = bench(TradeCaps::SPOT, 0.0);
        b.tick(110.0, 110.0, 1.0);
        let mut o = b.order("t1", Direction::Long, OrderKind::Limit, 100.0, 2.0);
        o.margin = false;
        b.connector.create_order(o);
        b.tick(100.0, 100.0, 2.0);
        assert_eq!(b.connector.asset("BTC").map(|a| a.free), Some(2.0));
        assert_eq!(b.connector.asset("USDT").map(|a| (a.free, a.locked)), Some((800.0, 0.0)));
        b.tick(90.0, 90.0, 3.0);
        assert_eq!(b.connector.account().asset_profit_loss, -20.0);
    }

    #[test]
    fn position_stop_closes_in_full() {
        let b = bench(TradeCaps::POSITION, 10_000.0);
        b.tick(100.0, 100.0, 1.0);
        let mut o = b.order("t1", Direction::Long, OrderKind::Market, 0.0, 1.0);
        o.hedging = true;
        b.connector.create_order(o);
        let pid = b.connector.open_positions()[0].position_id.clone();
        assert_eq!(b.connector.modify_position(&pid, 95.0, 120.0), ReturnCode::Accepted);
        assert_eq!(b.connector.modify_position("p404", 95.0, 0.0), ReturnCode::InvalidArgs);

        b.tick(96.0, 96.5, 2.0);
        assert_eq!(b.connector.open_positions().len(), 1);
        b.tick(94.0, 94.5, 3.0);
        assert!(b.connector.open_positions().is_empty());
        assert_eq!(b.connector.balance(), 9_994.0);
    }

    #[test]
    fn close_position_at_limit_rests() {
        let b = bench(TradeCaps::POSITION, 10_000.0);
        b.tick(100.0, 100.0, 1.0);
        let mut o = b.order("t1", Direction::Long, OrderKind::Market, 0.0, 1.0);
        o.hedging = true;
        b.connector.create_order(o);
        let pid = b.connector.open_positions()[0].position_id.clone();

        assert_eq!(b.connector.close_position(&pid, Direction::Short, 1.0, true, 0.0), ReturnCode::InvalidArgs);
        assert_eq!(b.connector.close_position(&pid, Direction::Long, 1.0, false, 110.0), ReturnCode::Accepted);
        assert_eq!(b.connector.pending_orders().len(), 1);
        b.tick(110.0, 110.5, 2.0);
        assert!(b.connector.open_positions().is_empty());
        assert_eq!(b.connector.balance(), 10_010.0);
    }

    #[test]
    fn daily_samples_back_filled() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        let day = sx_core::time_util::SECONDS_PER_DAY;
        b.tick(100.0, 100.0, day);
        b.tick(100.0, 100.0, 4.0 * day + 10.0);
        let days: Vec<i64> = b.connector.samples().iter().map(|s| s.day).collect();
        assert_eq!(days, vec![1, 2, 3, 4]);
    }

    #[test]
    fn disconnected_refuses_and_frees() {
        let b = bench(TradeCaps::MARGIN, 10_000.0);
        b.tick(100.0, 100.0, 1.0);
        b.connector.set_connected(false);
        let code = b.connector.create_order(b.order("t1", Direction::Long, OrderKind::Market, 0.0, 1.0));
        assert_eq!(code, ReturnCode::UnreachableService);
        assert_eq!(b.proxy.pool_usage().0, 0);
        b.proxy.dispatch_signals();
        assert!(!b.proxy.alive());
    }

    // -----------------------------------------------------------------------
    // End to end with a trade manager
    // -----------------------------------------------------------------------

    struct Recorder {
        market: Arc<Market>,
        trade_type: TradeType,
        closed: Mutex<Vec<(u32, f64)>>,
    }

    impl Strategy for Recorder {
        fn identifier(&self) -> &str {
            "s1"
        }
        fn broker_id(&self) -> &str {
            "local"
        }
        fn market(&self) -> Arc<Market> {
            self.market.clone()
        }
        fn trade_type(&self) -> TradeType {
            self.trade_type
        }
        fn add_closed_trade(&self, trade: &Trade) {
            self.closed.lock().push((trade.id(), trade.core().profit_loss_rate()));
        }
    }

    fn managed(caps: u8, trade_type: TradeType) -> (Bench, Arc<Recorder>, Arc<TradeManager>) {
        let b = bench(caps, 10_000.0);
        let strategy =
            Arc::new(Recorder { market: b.market.clone(), trade_type, closed: Mutex::new(Vec::new()) });
        let manager = TradeManager::new(strategy.clone(), b.proxy.clone());
        (b, strategy, manager)
    }

    fn step(b: &Bench, manager: &TradeManager, bid: f64, ask: f64, ts: f64) {
        b.tick(bid, ask, ts);
        b.proxy.dispatch_signals();
        manager.process(ts);
    }

    #[test]
    fn position_trade_round_trip() {
        let (b, strategy, manager) = managed(TradeCaps::POSITION, TradeType::Position);
        step(&b, &manager, 100.0, 100.0, 1.0);
        let code = manager.open_trade(&EntryRequest::market(Direction::Long, 1.0), 60.0).unwrap_or(ReturnCode::Error);
        assert_eq!(code, ReturnCode::Accepted);
        b.proxy.dispatch_signals();
        assert_eq!(manager.num_active_trades(), 1);

        step(&b, &manager, 110.0, 110.0, 2.0);
        assert_eq!(manager.close_all(), 1);
        b.proxy.dispatch_signals();
        manager.process(3.0);

        assert!(!manager.has_trades());
        let closed = strategy.closed.lock().clone();
        assert_eq!(closed.len(), 1);
        assert!((closed[0].1 - 0.1).abs() < 1e-9);
        assert_eq!(b.connector.balance(), 10_010.0);
        assert_eq!(b.proxy.pool_usage(), (0, 0, 0));
    }

    #[test]
    fn ind_margin_trades_share_position() {
        let (b, _strategy, manager) = managed(TradeCaps::MARGIN | TradeCaps::IND_MARGIN, TradeType::IndMargin);
        step(&b, &manager, 100.0, 100.0, 1.0);
        for _ in 0..2 {
            manager.open_trade(&EntryRequest::market(Direction::Long, 1.0), 60.0).unwrap_or(ReturnCode::Error);
        }
        b.proxy.dispatch_signals();
        assert_eq!(manager.num_active_trades(), 2);
        assert_eq!(b.connector.open_positions()[0].quantity, 2.0);

        let first = manager.trades()[0].clone();
        assert!(first.lock().close(sx_core::types::ExitReason::CloseMarket).is_accepted());
        b.proxy.dispatch_signals();
        manager.process(2.0);
        assert_eq!(manager.num_trades(), 1);
        assert_eq!(b.connector.open_positions()[0].quantity, 1.0);
    }

    #[test]
    fn opposite_trade_netted_on_ind_margin_is_reaped() {
        let (b, strategy, manager) = managed(TradeCaps::MARGIN | TradeCaps::IND_MARGIN, TradeType::IndMargin);
        step(&b, &manager, 100.0, 100.0, 1.0);
        assert!(manager.open_trade(&EntryRequest::market(Direction::Long, 1.0), 60.0).unwrap_or(ReturnCode::Error).is_accepted());
        b.proxy.dispatch_signals();
        assert_eq!(manager.num_active_trades(), 1);

        // the short entry only reduces the long trade's lot
        assert!(manager.open_trade(&EntryRequest::market(Direction::Short, 1.0), 60.0).unwrap_or(ReturnCode::Error).is_accepted());
        for ts in [2.0, 3.0, 4.0] {
            step(&b, &manager, 105.0, 105.0, ts);
        }
        assert!(b.connector.open_positions().is_empty());
        assert_eq!(manager.num_trades(), 0);
        assert_eq!(strategy.closed.lock().len(), 2);
        assert_eq!(b.proxy.pool_usage(), (0, 0, 0));
    }

    #[test]
    fn spot_trade_stop_leg_fires() {
        let (b, strategy, manager) = managed(TradeCaps::SPOT, TradeType::Spot);
        step(&b, &manager, 100.0, 100.0, 1.0);
        let request = EntryRequest::market(Direction::Long, 2.0);
        assert!(manager.open_trade(&request, 60.0).unwrap_or(ReturnCode::Error).is_accepted());
        b.proxy.dispatch_signals();
        let trade = manager.trades()[0].clone();
        assert!(trade.lock().modify_stop_loss(95.0, sx_core::types::ModifierType::Distant).is_accepted());
        b.proxy.dispatch_signals();

        step(&b, &manager, 94.0, 94.0, 2.0);
        step(&b, &manager, 94.0, 94.0, 3.0);
        assert!(!manager.has_trades());
        assert_eq!(strategy.closed.lock().len(), 1);
        assert_eq!(b.connector.asset("BTC").map(|a| a.free), Some(0.0));
    }
}
