//! Open trades of one strategy instance.
//!
//! The manager lock protects the list structure only. Every operation that
//! touches trades first snapshots the handles under the lock, releases it,
//! then locks each trade in turn:
//!
//! ```text
//!   lock list ─► clone handles ─► unlock ─► for each: lock trade, work, unlock
//!                                            │
//!   lock list ─► remove finished ─► unlock ◄──┘
//! ```
//!
//! A trade is therefore never called while the list lock is held, and other
//! threads can query the manager while trades are processed.

use std::sync::Arc;

use parking_lot::Mutex;
use sx_core::error::{SxError, SxResult};
use sx_core::types::{Direction, OrderSignal, PositionSignal, ReturnCode};
use tracing::{debug, error, info, warn};

use crate::proxy::TraderProxy;
use crate::strategy::{Strategy, TradeDb};
use crate::trade::{EntryRequest, Trade, TradeLifecycle};

/// Shared handle to a held trade.
pub type TradeHandle = Arc<Mutex<Trade>>;

/// Aggregate view of the held trades.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Performance {
    /// Sum of the estimated profit or loss rates of active trades.
    pub performance: f64,
    /// `max(0, -performance)`.
    pub drawdown: f64,
    /// Trades still waiting for their entry.
    pub pending: usize,
    /// Trades holding a position.
    pub actives: usize,
}

pub struct TradeManager {
    strategy: Arc<dyn Strategy>,
    proxy: Arc<TraderProxy>,
    trades: Mutex<Vec<TradeHandle>>,
}

impl TradeManager {
    /// Create the manager of `strategy` and register it for signal routing.
    pub fn new(strategy: Arc<dyn Strategy>, proxy: Arc<TraderProxy>) -> Arc<Self> {
        let manager = Arc::new(Self { strategy, proxy, trades: Mutex::new(Vec::new()) });
        manager.proxy.register_manager(manager.strategy.identifier(), &manager);
        manager
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    pub fn proxy(&self) -> &Arc<TraderProxy> {
        &self.proxy
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    pub fn add_trade(&self, trade: Trade) -> TradeHandle {
        let handle = Arc::new(Mutex::new(trade));
        self.trades.lock().push(Arc::clone(&handle));
        handle
    }

    /// Detach a trade from the manager without releasing it.
    pub fn remove_trade(&self, id: u32) -> Option<TradeHandle> {
        let handle = self.get_trade(id)?;
        self.trades.lock().retain(|h| !Arc::ptr_eq(h, &handle));
        Some(handle)
    }

    /// Copy of the held handles.
    pub fn trades(&self) -> Vec<TradeHandle> {
        self.trades.lock().clone()
    }

    /// Create a trade of the strategy's type, submit its entry and hold it
    /// when the connector accepts. A refused trade goes straight back to the
    /// pool.
    pub fn open_trade(&self, request: &EntryRequest, timeframe: f64) -> SxResult<ReturnCode> {
        let market = self.strategy.market();
        let mut trade = self.proxy.create_trade(&market, self.strategy.trade_type(), timeframe)?;
        let ret = trade.open(self.strategy.as_ref(), request);
        if ret.is_accepted() {
            debug!("[manager] {} opened {trade}", self.strategy.identifier());
            self.add_trade(trade);
        } else {
            self.proxy.free_trade(trade)?;
        }
        Ok(ret)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn has_trades(&self) -> bool {
        !self.trades.lock().is_empty()
    }

    pub fn has_trades_by_direction(&self, direction: Direction) -> bool {
        self.trades().iter().any(|h| h.lock().direction() == direction)
    }

    pub fn has_trade_by_id(&self, id: u32) -> bool {
        self.trades().iter().any(|h| h.lock().id() == id)
    }

    pub fn num_trades(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn num_active_trades(&self) -> usize {
        self.trades().iter().filter(|h| h.lock().is_active()).count()
    }

    pub fn get_trade(&self, id: u32) -> Option<TradeHandle> {
        self.trades().into_iter().find(|h| h.lock().id() == id)
    }

    /// First held trade opened on `timeframe`.
    pub fn find_trade(&self, timeframe: f64) -> Option<TradeHandle> {
        self.trades().into_iter().find(|h| h.lock().core().timeframe() == timeframe)
    }

    pub fn compute_performance(&self) -> Performance {
        let mut perf = Performance::default();
        for handle in self.trades() {
            let trade = handle.lock();
            if trade.is_active() {
                perf.performance += trade.estimate_profit_loss_rate();
                perf.actives += 1;
            } else if trade.is_opening() {
                perf.pending += 1;
            }
        }
        perf.drawdown = (-perf.performance).max(0.0);
        perf
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    /// Run every trade once, then reap the finished ones: removed from the
    /// list, reported to the strategy, returned to the pool.
    pub fn process(&self, timestamp: f64) {
        let mut candidates = Vec::new();
        for handle in self.trades() {
            let done = {
                let mut trade = handle.lock();
                trade.process(timestamp);
                let last = trade.core().market().map(|m| m.last()).unwrap_or(0.0);
                trade.update_stats(last, timestamp);
                trade.can_delete()
            };
            if done {
                candidates.push(handle);
            }
        }
        if candidates.is_empty() {
            return;
        }

        // only what this call removed is reaped, a concurrent process() may
        // have taken some already
        let mut reaped = Vec::with_capacity(candidates.len());
        self.trades.lock().retain(|h| {
            let hit = candidates.iter().any(|c| Arc::ptr_eq(c, h));
            if hit {
                reaped.push(Arc::clone(h));
            }
            !hit
        });
        drop(candidates);

        for handle in reaped {
            self.reap(handle);
        }
    }

    fn reap(&self, handle: TradeHandle) {
        {
            let trade = handle.lock();
            if trade.is_closed() {
                let pl = trade.core().profit_loss_rate();
                info!(
                    "[manager] #{} {} exit at p={} pl={:.2}% {}",
                    trade.id(),
                    trade.direction(),
                    trade.core().exit_price(),
                    pl * 100.0,
                    if pl >= 0.0 { "WIN" } else { "LOSS" }
                );
            } else {
                debug!("[manager] #{} {}", trade.id(), trade.state_to_str());
            }
            self.strategy.add_closed_trade(&trade);
        }
        match Arc::try_unwrap(handle) {
            Ok(mutex) => {
                if let Err(e) = self.proxy.free_trade(mutex.into_inner()) {
                    error!("[manager] {e}");
                }
            }
            Err(handle) => {
                warn!("[manager] #{} still referenced, not returned to pool", handle.lock().id());
            }
        }
    }

    /// Close every active trade and cancel every pending entry. Returns the
    /// number of trades acted upon.
    pub fn close_all(&self) -> usize {
        self.close_matching(|_| true)
    }

    /// Same as [`close_all`](Self::close_all), restricted to `direction`.
    pub fn close_all_by_direction(&self, direction: Direction) -> usize {
        self.close_matching(|t| t.direction() == direction)
    }

    fn close_matching(&self, filter: impl Fn(&Trade) -> bool) -> usize {
        let mut count = 0;
        for handle in self.trades() {
            let mut trade = handle.lock();
            if !filter(&trade) {
                continue;
            }
            let ret = if trade.is_active() {
                trade.close(sx_core::types::ExitReason::CloseMarket)
            } else if trade.is_opening() {
                trade.cancel_open()
            } else {
                continue;
            };
            if ret.is_accepted() {
                count += 1;
            }
        }
        count
    }

    /// Release every held trade without reporting it. Used at shutdown.
    pub fn terminate(&self) {
        let trades: Vec<TradeHandle> = std::mem::take(&mut *self.trades.lock());
        for handle in trades {
            if let Ok(mutex) = Arc::try_unwrap(handle) {
                if let Err(e) = self.proxy.free_trade(mutex.into_inner()) {
                    error!("[manager] {e}");
                }
            }
        }
        self.proxy.unregister_manager(self.strategy.identifier());
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Apply an order signal to the trade it targets. Returns `false` when no
    /// held trade matches.
    pub fn on_order_signal(&self, signal: &OrderSignal) -> bool {
        self.apply_first(
            |t| t.is_target_order(&signal.order_id, signal.ref_id.as_deref()),
            |t| t.order_signal(signal),
        )
    }

    /// Apply a position signal to the trade it targets.
    pub fn on_position_signal(&self, signal: &PositionSignal) -> bool {
        self.apply_first(
            |t| t.is_target_position(&signal.position_id, signal.ref_order_id.as_deref()),
            |t| t.position_signal(signal),
        )
    }

    fn apply_first(
        &self,
        is_target: impl Fn(&Trade) -> bool,
        apply: impl FnOnce(&mut Trade) -> SxResult<()>,
    ) -> bool {
        for handle in self.trades() {
            let mut trade = handle.lock();
            if !is_target(&trade) {
                continue;
            }
            if let Err(e) = apply(&mut trade) {
                error!("[manager] #{} {e}", trade.id());
            }
            self.strategy.update_trade(&trade);
            return true;
        }
        false
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Replace the stored trades of this strategy with its active ones.
    /// Returns the number stored.
    pub fn save_trades(&self, db: &dyn TradeDb) -> SxResult<usize> {
        let broker = self.strategy.broker_id();
        let market = self.strategy.market();
        let strategy_id = self.strategy.identifier();
        let dropped = db.clear_trades(broker, &market.market_id, strategy_id)?;
        let mut count = 0;
        for handle in self.trades() {
            let trade = handle.lock();
            // pending entries and exits refer to orders a new session never sees
            if !trade.is_active() {
                continue;
            }
            db.store_trade(broker, &market.market_id, strategy_id, &trade.dumps())?;
            count += 1;
        }
        debug!("[manager] {strategy_id} saved {count} trades, replaced {dropped}");
        Ok(count)
    }

    /// Restore the stored trades of this strategy. Returns the number loaded.
    pub fn load_trades(&self, db: &dyn TradeDb) -> SxResult<usize> {
        let market = self.strategy.market();
        let records = db.fetch_trade_list(self.strategy.broker_id(), &market.market_id)?;
        let mut count = 0;
        for record in records.iter().filter(|r| r.strategy_id == self.strategy.identifier()) {
            let saved = &record.trade;
            let mut trade = self.proxy.create_trade(&market, saved.trade_type(), saved.core().timeframe())?;
            if let Err(e) = trade.loads(record, Arc::clone(&market)) {
                self.proxy.free_trade(trade)?;
                return Err(e);
            }
            if self.has_trade_by_id(trade.id()) {
                let id = trade.id();
                self.proxy.free_trade(trade)?;
                return Err(SxError::Persistence(format!("trade #{id} already held")));
            }
            self.proxy.reserve_trade_id(trade.id());
            self.add_trade(trade);
            count += 1;
        }
        if count > 0 {
            info!("[manager] {} restored {count} trades", self.strategy.identifier());
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonTradeStore;
    use crate::testutil::{Fixture, position_signal};
    use sx_core::types::{OrderEvent, PositionEvent, TradeType};

    /// Open a trade through the manager and fill it completely.
    fn active(manager: &TradeManager, direction: Direction, price: f64) -> u32 {
        assert_eq!(
            manager.open_trade(&EntryRequest::market(direction, 1.0), 60.0).unwrap(),
            ReturnCode::Accepted
        );
        let handle = manager.trades().last().cloned().unwrap();
        let r = handle.lock().core().ref_id().to_owned();
        let mut s = position_signal(PositionEvent::Opened, &format!("p-{r}"), &r, direction);
        s.quantity = Some(1.0);
        s.exec_price = Some(price);
        assert!(manager.on_position_signal(&s));
        let id = handle.lock().id();
        assert!(handle.lock().is_active());
        id
    }

    #[test]
    fn close_all_by_direction_only_matching() {
        let fx = Fixture::new();
        let manager = fx.manager();
        active(&manager, Direction::Long, 100.0);
        active(&manager, Direction::Short, 100.0);

        assert_eq!(manager.close_all_by_direction(Direction::Long), 1);
        let trades = manager.trades();
        assert!(trades[0].lock().is_closing());
        assert!(trades[1].lock().is_active());
        assert_eq!(fx.connector.close_requests(), 1);
    }

    #[test]
    fn close_all_cancels_pending() {
        let fx = Fixture::new();
        let manager = fx.manager();
        active(&manager, Direction::Long, 100.0);
        manager.open_trade(&EntryRequest::limit(Direction::Short, 120.0, 1.0), 60.0).unwrap();
        assert_eq!(manager.close_all(), 2);
        assert_eq!(fx.connector.canceled().len(), 1);
    }

    #[test]
    fn refused_entry_not_held() {
        let fx = Fixture::new();
        let manager = fx.manager();
        fx.connector.set_reply(ReturnCode::InsufficientMargin);
        let ret = manager.open_trade(&EntryRequest::market(Direction::Long, 1.0), 60.0).unwrap();
        assert_eq!(ret, ReturnCode::InsufficientMargin);
        assert!(!manager.has_trades());
        assert_eq!(fx.proxy.pool_usage().2, 0);
    }

    #[test]
    fn process_reaps_once() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let id = active(&manager, Direction::Long, 100.0);
        let r = manager.get_trade(id).unwrap().lock().core().ref_id().to_owned();
        manager.process(3.0);
        assert!(fx.strategy.closed().is_empty());

        let mut s = position_signal(PositionEvent::Deleted, &format!("p-{r}"), &r, Direction::Long);
        s.exec_price = Some(105.0);
        assert!(manager.on_position_signal(&s));

        manager.process(4.0);
        manager.process(5.0);
        assert_eq!(fx.strategy.closed(), vec![id]);
        assert!(!manager.has_trade_by_id(id));
        assert_eq!(fx.proxy.pool_usage().2, 0);
    }

    #[test]
    fn canceled_entry_reaped() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.open_trade(&EntryRequest::limit(Direction::Long, 90.0, 1.0), 60.0).unwrap();
        let order_id = fx.connector.orders()[0].order_id.clone();
        assert!(manager.on_order_signal(&fx.order_signal(OrderEvent::Canceled, &order_id)));
        manager.process(2.0);
        assert_eq!(fx.strategy.closed().len(), 1);
        assert_eq!(manager.num_trades(), 0);
    }

    #[test]
    fn unknown_signal_dropped() {
        let fx = Fixture::new();
        let manager = fx.manager();
        active(&manager, Direction::Long, 100.0);
        let updates = fx.strategy.updates();
        assert!(!manager.on_order_signal(&fx.order_signal(OrderEvent::Opened, "manual-7")));
        assert_eq!(fx.strategy.updates(), updates);
    }

    #[test]
    fn performance_of_actives() {
        let fx = Fixture::new();
        let manager = fx.manager();
        active(&manager, Direction::Long, 100.0);
        manager.open_trade(&EntryRequest::limit(Direction::Long, 90.0, 1.0), 60.0).unwrap();
        fx.market.set_price(95.0, 95.0, 2.0);
        let perf = manager.compute_performance();
        assert_eq!(perf.actives, 1);
        assert_eq!(perf.pending, 1);
        assert!((perf.performance + 0.05).abs() < 1e-9);
        assert!((perf.drawdown - 0.05).abs() < 1e-9);
        assert_eq!(manager.num_active_trades(), 1);
        assert!(manager.has_trades_by_direction(Direction::Long));
        assert!(!manager.has_trades_by_direction(Direction::Short));
        assert!(manager.find_trade(60.0).is_some());
        assert!(manager.find_trade(3600.0).is_none());
    }

    #[test]
    fn save_then_load_restores() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let id = active(&manager, Direction::Short, 100.0);
        let store = JsonTradeStore::default();
        assert_eq!(manager.save_trades(&store).unwrap(), 1);
        manager.terminate();
        assert!(!manager.has_trades());

        let restored = fx.manager();
        assert_eq!(restored.load_trades(&store).unwrap(), 1);
        let handle = restored.get_trade(id).unwrap();
        assert!(handle.lock().is_active());
        assert_eq!(handle.lock().trade_type(), TradeType::Position);
        assert!(fx.trade(TradeType::Position).id() > id);
    }

    #[test]
    fn save_keeps_only_active_and_drops_closed() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let id = active(&manager, Direction::Long, 100.0);
        manager.open_trade(&EntryRequest::limit(Direction::Long, 90.0, 1.0), 60.0).unwrap();
        let store = JsonTradeStore::default();
        assert_eq!(manager.save_trades(&store).unwrap(), 1);
        assert_eq!(store.fetch_trade_list("local", "BTCUSDT").unwrap()[0].trade.id(), id);

        let r = manager.get_trade(id).unwrap().lock().core().ref_id().to_owned();
        let mut s = position_signal(PositionEvent::Deleted, &format!("p-{r}"), &r, Direction::Long);
        s.exec_price = Some(105.0);
        assert!(manager.on_position_signal(&s));
        manager.process(2.0);
        assert_eq!(manager.save_trades(&store).unwrap(), 0);
        assert!(store.is_empty());
    }
}
