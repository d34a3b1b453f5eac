//! Account-level façade between strategies and a connector.
//!
//! The [`TraderProxy`] owns the object pools and id counters of one connector
//! session, mirrors the account and asset balances reported by the connector,
//! and routes order and position signals to the [`TradeManager`] owning the
//! matching trade.
//!
//! ```text
//!   strategy ──► TraderProxy::create_order ──► Connector
//!                     ▲                            │
//!                     │ dispatch_signals()         │ post_signal()
//!                     └──────── Signal channel ◄───┘
//! ```
//!
//! Signals are resolved by id at the trade level: the proxy only chooses the
//! manager, the manager scans its trades.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use sx_core::error::{SxError, SxResult};
use sx_core::pool::{BUCKET_SIZE, Pool};
use sx_core::types::{
    AccountSignal, Asset, AssetSignal, Direction, Market, MarketRegistry, MarketSignal, Order, OrderSignal,
    Position, PositionSignal, ReturnCode, StatusEvent, StatusSignal, TradeType,
};
use tracing::{debug, info, warn};

use crate::Connector;
use crate::event::{Signal, SignalReceiver, SignalSender, signal_channel};
use crate::manager::TradeManager;
use crate::trade::{Trade, TradeLifecycle};

/// Account figures as last reported by the connector.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub currency: String,
    pub balance: f64,
    pub free_margin: f64,
    pub reserved_margin: f64,
    pub margin_factor: f64,
    pub profit_loss: f64,
}

struct Pools {
    orders: Pool<Order>,
    positions: Pool<Position>,
    /// One pool per trade type, indexed by [`TradeType::index`].
    trades: Vec<Pool<Trade>>,
}

pub struct TraderProxy {
    connector: Arc<dyn Connector>,
    markets: Arc<MarketRegistry>,

    pools: Mutex<Pools>,
    next_trade_id: AtomicU32,
    next_order_id: AtomicU64,
    next_position_id: AtomicU64,

    account: RwLock<AccountState>,
    assets: RwLock<AHashMap<String, Asset>>,
    alive: AtomicBool,

    managers: RwLock<AHashMap<String, Weak<TradeManager>>>,

    signal_tx: SignalSender,
    signal_rx: SignalReceiver,
}

impl TraderProxy {
    /// Create the proxy and attach it to `connector`.
    pub fn new(connector: Arc<dyn Connector>, markets: Arc<MarketRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let trades = TradeType::ALL
                .iter()
                .map(|&tt| {
                    let proxy = me.clone();
                    Pool::new("trade", BUCKET_SIZE, move || Trade::new(tt, proxy.clone()))
                })
                .collect();
            let pools = Pools {
                orders: Pool::new("order", BUCKET_SIZE, Order::default),
                positions: Pool::new("position", BUCKET_SIZE, Position::default),
                trades,
            };

            connector.set_trader_proxy(me.clone());
            let alive = connector.connected();
            let (signal_tx, signal_rx) = signal_channel();

            Self {
                connector,
                markets,
                pools: Mutex::new(pools),
                next_trade_id: AtomicU32::new(0),
                next_order_id: AtomicU64::new(0),
                next_position_id: AtomicU64::new(0),
                account: RwLock::new(AccountState { margin_factor: 1.0, ..AccountState::default() }),
                assets: RwLock::new(AHashMap::new()),
                alive: AtomicBool::new(alive),
                managers: RwLock::new(AHashMap::new()),
                signal_tx,
                signal_rx,
            }
        })
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    /// Connector reachable and not reported lost.
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.connector.connected()
    }

    pub fn market(&self, market_id: &str) -> Option<Arc<Market>> {
        self.markets.get(market_id)
    }

    pub fn markets(&self) -> &Arc<MarketRegistry> {
        &self.markets
    }

    // -----------------------------------------------------------------------
    // Pools and ids
    // -----------------------------------------------------------------------

    /// A zeroed order carrying a fresh order id.
    pub fn new_order(&self, strategy_id: &str) -> Order {
        let mut order = self.pools.lock().orders.acquire();
        order.order_id = (self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        order.strategy_id = strategy_id.to_owned();
        order
    }

    /// A zeroed position carrying a fresh position id.
    pub fn new_position(&self, strategy_id: &str) -> Position {
        let mut position = self.pools.lock().positions.acquire();
        position.position_id = format!("p{}", self.next_position_id.fetch_add(1, Ordering::Relaxed) + 1);
        position.strategy_id = strategy_id.to_owned();
        position
    }

    pub fn free_order(&self, order: Order) -> SxResult<()> {
        self.pools.lock().orders.release(order)
    }

    pub fn free_position(&self, position: Position) -> SxResult<()> {
        self.pools.lock().positions.release(position)
    }

    /// Allocate a trade for `market` and assign the next trade id.
    ///
    /// Fails when the market cannot carry trades of `trade_type`.
    pub fn create_trade(&self, market: &Arc<Market>, trade_type: TradeType, timeframe: f64) -> SxResult<Trade> {
        if !market.supports(trade_type) {
            return Err(SxError::Config(format!(
                "market {} does not support {trade_type} trades",
                market.market_id
            )));
        }
        let mut trade = self.pools.lock().trades[trade_type.index()].acquire();
        let id = self.next_trade_id.fetch_add(1, Ordering::Relaxed) + 1;
        trade.core_mut().bind(id, Arc::clone(market), timeframe);
        Ok(trade)
    }

    /// Return a trade to its pool. The trade must no longer be held by any
    /// registered manager.
    pub fn free_trade(&self, trade: Trade) -> SxResult<()> {
        let id = trade.id();
        if self.live_managers().iter().any(|m| m.has_trade_by_id(id)) {
            return Err(SxError::Invariant(format!("trade #{id} freed while still held by a manager")));
        }
        let index = trade.trade_type().index();
        self.pools.lock().trades[index].release(trade)
    }

    /// Make sure future trade ids are above `id`, used when restoring trades.
    pub fn reserve_trade_id(&self, id: u32) {
        self.next_trade_id.fetch_max(id, Ordering::Relaxed);
    }

    /// Objects currently checked out of the order, position and trade pools.
    pub fn pool_usage(&self) -> (usize, usize, usize) {
        let pools = self.pools.lock();
        let trades = pools.trades.iter().map(Pool::in_use).sum();
        (pools.orders.in_use(), pools.positions.in_use(), trades)
    }

    // -----------------------------------------------------------------------
    // Connector requests
    // -----------------------------------------------------------------------

    pub fn create_order(&self, order: Order) -> ReturnCode {
        if !self.alive() {
            warn!("[proxy] {} unreachable, order {} dropped", self.connector.name(), order.order_id);
            if let Err(e) = self.free_order(order) {
                warn!("[proxy] {e}");
            }
            return ReturnCode::UnreachableService;
        }
        self.connector.create_order(order)
    }

    pub fn cancel_order(&self, order_id: &str) -> ReturnCode {
        if !self.alive() {
            return ReturnCode::UnreachableService;
        }
        self.connector.cancel_order(order_id)
    }

    pub fn close_position(
        &self,
        position_id: &str,
        direction: Direction,
        quantity: f64,
        taker: bool,
        limit_price: f64,
    ) -> ReturnCode {
        if !self.alive() {
            return ReturnCode::UnreachableService;
        }
        self.connector.close_position(position_id, direction, quantity, taker, limit_price)
    }

    pub fn modify_position(&self, position_id: &str, stop_price: f64, limit_price: f64) -> ReturnCode {
        if !self.alive() {
            return ReturnCode::UnreachableService;
        }
        self.connector.modify_position(position_id, stop_price, limit_price)
    }

    // -----------------------------------------------------------------------
    // Account state
    // -----------------------------------------------------------------------

    pub fn account(&self) -> AccountState {
        self.account.read().clone()
    }

    pub fn free_margin(&self) -> f64 {
        self.account.read().free_margin
    }

    pub fn reserved_margin(&self) -> f64 {
        self.account.read().reserved_margin
    }

    pub fn margin_factor(&self) -> f64 {
        self.account.read().margin_factor
    }

    pub fn asset(&self, symbol: &str) -> Option<Asset> {
        self.assets.read().get(symbol).cloned()
    }

    pub fn free_asset_quantity(&self, symbol: &str) -> f64 {
        self.assets.read().get(symbol).map(|a| a.free).unwrap_or(0.0)
    }

    pub fn locked_asset_quantity(&self, symbol: &str) -> f64 {
        self.assets.read().get(symbol).map(|a| a.locked).unwrap_or(0.0)
    }

    // -----------------------------------------------------------------------
    // Managers and signals
    // -----------------------------------------------------------------------

    /// Route the order and position signals of `strategy_id` to `manager`.
    pub fn register_manager(&self, strategy_id: &str, manager: &Arc<TradeManager>) {
        self.managers.write().insert(strategy_id.to_owned(), Arc::downgrade(manager));
    }

    pub fn unregister_manager(&self, strategy_id: &str) {
        self.managers.write().remove(strategy_id);
    }

    fn live_managers(&self) -> Vec<Arc<TradeManager>> {
        self.managers.read().values().filter_map(Weak::upgrade).collect()
    }

    /// Sender half handed to connectors.
    pub fn signal_sender(&self) -> SignalSender {
        self.signal_tx.clone()
    }

    pub fn post_signal(&self, signal: Signal) {
        // the receiver lives as long as self
        let _ = self.signal_tx.send(signal);
    }

    /// Apply every queued signal in emission order. Returns how many were
    /// applied.
    pub fn dispatch_signals(&self) -> usize {
        let mut count = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.apply_signal(signal);
            count += 1;
        }
        count
    }

    fn apply_signal(&self, signal: Signal) {
        let routed = match signal {
            Signal::Order(s) => self.on_order_signal(&s),
            Signal::Position(s) => self.on_position_signal(&s),
            Signal::Account(s) => {
                self.on_account_signal(&s);
                Ok(())
            }
            Signal::Asset(s) => {
                self.on_asset_signal(&s);
                Ok(())
            }
            Signal::Market(s) => {
                self.on_market_signal(&s);
                Ok(())
            }
            Signal::Status(s) => {
                self.on_status_signal(&s);
                Ok(())
            }
        };
        // manual orders have no trade, not fatal
        if let Err(e) = routed {
            debug!("[proxy] {e}");
        }
    }

    /// Offer a signal to the manager of `strategy_id`, or to every manager
    /// when that one is unknown, until one handles it.
    fn route(&self, strategy_id: &str, handle: impl Fn(&TradeManager) -> bool) -> bool {
        let target = self.managers.read().get(strategy_id).and_then(Weak::upgrade);
        match target {
            Some(manager) => handle(&manager),
            None => self.live_managers().iter().any(|m| handle(m)),
        }
    }

    /// Forward an order signal to the trade it targets. A signal no trade
    /// claims is a [`SxError::Routing`] miss.
    pub fn on_order_signal(&self, signal: &OrderSignal) -> SxResult<()> {
        if self.route(&signal.strategy_id, |m| m.on_order_signal(signal)) {
            Ok(())
        } else {
            Err(SxError::Routing(format!("order {} {:?} matched no trade", signal.order_id, signal.event)))
        }
    }

    pub fn on_position_signal(&self, signal: &PositionSignal) -> SxResult<()> {
        if self.route(&signal.strategy_id, |m| m.on_position_signal(signal)) {
            Ok(())
        } else {
            Err(SxError::Routing(format!("position {} {:?} matched no trade", signal.position_id, signal.event)))
        }
    }

    pub fn on_account_signal(&self, signal: &AccountSignal) {
        let mut account = self.account.write();
        account.currency.clone_from(&signal.currency);
        account.balance = signal.balance;
        account.free_margin = signal.free_margin;
        account.reserved_margin = signal.reserved_margin;
        account.margin_factor = signal.margin_factor;
        account.profit_loss = signal.profit_loss;
    }

    pub fn on_asset_signal(&self, signal: &AssetSignal) {
        let mut assets = self.assets.write();
        let asset = assets.entry(signal.symbol.clone()).or_insert_with(|| Asset::new(&signal.symbol));
        asset.free = signal.free;
        asset.locked = signal.locked;
    }

    pub fn on_market_signal(&self, signal: &MarketSignal) {
        let Some(market) = self.markets.get(&signal.market_id) else {
            debug!("[proxy] market signal for unknown {}", signal.market_id);
            return;
        };
        if let (Some(bid), Some(ask)) = (signal.bid, signal.ask) {
            market.set_price(bid, ask, signal.timestamp);
        }
        if let Some(tradeable) = signal.tradeable {
            market.set_tradeable(tradeable);
        }
    }

    pub fn on_status_signal(&self, signal: &StatusSignal) {
        let up = signal.event == StatusEvent::ConnectionAcquired;
        self.alive.store(up, Ordering::Release);
        if up {
            info!("[proxy] {} connected", signal.connector);
        } else {
            warn!("[proxy] {} connection lost", signal.connector);
        }
    }
}
