//! Shared test doubles: a recording connector and strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sx_core::types::{
    Direction, Market, MarketRegistry, Order, OrderEvent, OrderSignal, PositionEvent, PositionSignal, ReturnCode,
    TradeCaps, TradeType,
};

use crate::manager::TradeManager;
use crate::proxy::TraderProxy;
use crate::strategy::Strategy;
use crate::trade::Trade;
use crate::Connector;

pub(crate) struct MockConnector {
    reply: Mutex<ReturnCode>,
    connected: Mutex<bool>,
    orders: Mutex<Vec<Order>>,
    canceled: Mutex<Vec<String>>,
    closes: AtomicUsize,
    modifies: AtomicUsize,
    proxy: Mutex<Weak<TraderProxy>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            reply: Mutex::new(ReturnCode::Accepted),
            connected: Mutex::new(true),
            orders: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            modifies: AtomicUsize::new(0),
            proxy: Mutex::new(Weak::new()),
        }
    }

    pub fn set_reply(&self, ret: ReturnCode) {
        *self.reply.lock() = ret;
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().clone()
    }

    pub fn close_requests(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn modify_requests(&self) -> usize {
        self.modifies.load(Ordering::Relaxed)
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy.lock().upgrade().is_some()
    }
}

impl Connector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    fn connected(&self) -> bool {
        *self.connected.lock()
    }

    fn set_trader_proxy(&self, proxy: Weak<TraderProxy>) {
        *self.proxy.lock() = proxy;
    }

    fn create_order(&self, order: Order) -> ReturnCode {
        self.orders.lock().push(order);
        *self.reply.lock()
    }

    fn cancel_order(&self, order_id: &str) -> ReturnCode {
        self.canceled.lock().push(order_id.to_owned());
        *self.reply.lock()
    }

    fn close_position(&self, _: &str, _: Direction, _: f64, _: bool, _: f64) -> ReturnCode {
        self.closes.fetch_add(1, Ordering::Relaxed);
        *self.reply.lock()
    }

    fn modify_position(&self, _: &str, _: f64, _: f64) -> ReturnCode {
        self.modifies.fetch_add(1, Ordering::Relaxed);
        *self.reply.lock()
    }
}

pub(crate) struct MockStrategy {
    market: Arc<Market>,
    trade_type: TradeType,
    closed: Mutex<Vec<u32>>,
    updates: AtomicUsize,
}

impl MockStrategy {
    pub fn closed(&self) -> Vec<u32> {
        self.closed.lock().clone()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

impl Strategy for MockStrategy {
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
        use crate::trade::TradeLifecycle;
        self.closed.lock().push(trade.id());
    }

    fn update_trade(&self, _trade: &Trade) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct Fixture {
    pub proxy: Arc<TraderProxy>,
    pub connector: Arc<MockConnector>,
    pub market: Arc<Market>,
    pub strategy: Arc<MockStrategy>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_type(TradeType::Position)
    }

    pub fn with_type(trade_type: TradeType) -> Self {
        let caps = TradeCaps::default()
            .with(TradeCaps::SPOT)
            .with(TradeCaps::MARGIN)
            .with(TradeCaps::IND_MARGIN)
            .with(TradeCaps::POSITION);
        let registry = Arc::new(MarketRegistry::new());
        let market = registry.insert(Market::new("BTCUSDT", "BTC", "USDT", caps));
        market.set_price(100.0, 100.0, 1.0);

        let connector = Arc::new(MockConnector::new());
        let proxy = TraderProxy::new(connector.clone(), registry);
        let strategy = Arc::new(MockStrategy {
            market: market.clone(),
            trade_type,
            closed: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
        });
        Self { proxy, connector, market, strategy }
    }

    pub fn trade(&self, trade_type: TradeType) -> Trade {
        self.proxy
            .create_trade(&self.market, trade_type, 60.0)
            .expect("market supports every trade type")
    }

    pub fn manager(&self) -> Arc<TradeManager> {
        TradeManager::new(self.strategy.clone(), self.proxy.clone())
    }

    pub fn order_signal(&self, event: OrderEvent, order_id: &str) -> OrderSignal {
        let mut order = Order::default();
        order.order_id = order_id.to_owned();
        order.market_id = self.market.market_id.clone();
        order.strategy_id = "s1".into();
        OrderSignal::from_order(event, &order)
    }

    pub fn traded(&self, order_id: &str, filled: f64, cumulative: f64, price: f64) -> OrderSignal {
        let mut s = self.order_signal(OrderEvent::Traded, order_id);
        s.filled = Some(filled);
        s.cumulative_filled = Some(cumulative);
        s.exec_price = Some(price);
        s.avg_price = Some(price);
        s.executed = 2.0;
        s
    }
}

pub(crate) fn position_signal(
    event: PositionEvent,
    position_id: &str,
    ref_id: &str,
    direction: Direction,
) -> PositionSignal {
    let mut s = PositionSignal::new(event, "BTCUSDT", position_id, direction);
    s.strategy_id = "s1".into();
    s.ref_order_id = Some(ref_id.to_owned());
    s.updated = 2.0;
    s
}
