//! Scripted strategy: trading intents read from a file and applied when the
//! replay clock reaches them.
//!
//! ```json
//! [
//!   { "at": 60.0, "strategy": "s1", "action": "open", "direction": "long",
//!     "kind": "limit", "price": 100.0, "quantity": 1.0, "stop_loss": 95.0 },
//!   { "at": 90.0, "strategy": "s1", "action": "open", "direction": "long",
//!     "kind": "stop-limit", "price": 105.0, "limit_price": 105.5, "quantity": 1.0 },
//!   { "at": 600.0, "strategy": "s1", "action": "close_all" }
//! ]
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use sx_core::config::StrategyConfig;
use sx_core::types::{Direction, ExitReason, Market, OrderKind, TradeType};
use sx_trade::{EntryRequest, Strategy, Trade, TradeLifecycle, TradeManager};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Open,
    /// Close every trade of `direction`.
    Close,
    CloseAll,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Intent {
    pub at: f64,
    pub strategy: String,
    pub action: Action,
    pub direction: Option<Direction>,
    pub kind: Option<OrderKind>,
    pub price: Option<f64>,
    /// Limit of a stop-limit or take-profit-limit entry.
    pub limit_price: Option<f64>,
    pub quantity: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

impl Intent {
    /// Entry parameters of an `open` intent, `None` when incomplete.
    pub fn entry_request(&self) -> Option<EntryRequest> {
        let direction = self.direction?;
        let quantity = self.quantity.filter(|q| *q > 0.0)?;
        let kind = self.kind.unwrap_or_default();
        let mut request = EntryRequest::market(direction, quantity).with_kind(kind, self.price.unwrap_or(0.0));
        if let Some(limit) = self.limit_price {
            request = request.with_limit_price(limit);
        }
        if let Some(tp) = self.take_profit {
            request = request.with_take_profit(tp);
        }
        if let Some(sl) = self.stop_loss {
            request = request.with_stop_loss(sl);
        }
        Some(request)
    }
}

/// Intents ordered by time.
#[derive(Debug, Default)]
pub struct Script {
    intents: VecDeque<Intent>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut intents: Vec<Intent> = serde_json::from_str(text)?;
        intents.sort_by(|a, b| a.at.total_cmp(&b.at));
        Ok(Self { intents: intents.into() })
    }

    /// Take every intent due at `timestamp`.
    pub fn due(&mut self, timestamp: f64) -> Vec<Intent> {
        let mut due = Vec::new();
        while self.intents.front().is_some_and(|i| i.at <= timestamp) {
            due.extend(self.intents.pop_front());
        }
        due
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Summary of a finished trade.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub id: u32,
    pub direction: Direction,
    pub closed: bool,
    pub profit_loss_rate: f64,
    pub exit_reason: ExitReason,
}

pub struct ScriptedStrategy {
    identifier: String,
    broker_id: String,
    market: Arc<Market>,
    trade_type: TradeType,
    closed: Mutex<Vec<ClosedTrade>>,
}

impl ScriptedStrategy {
    pub fn new(config: &StrategyConfig, broker_id: &str, market: Arc<Market>) -> Self {
        Self {
            identifier: config.identifier.clone(),
            broker_id: broker_id.to_owned(),
            market,
            trade_type: config.trade_type,
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.closed.lock().clone()
    }
}

impl Strategy for ScriptedStrategy {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    fn market(&self) -> Arc<Market> {
        self.market.clone()
    }

    fn trade_type(&self) -> TradeType {
        self.trade_type
    }

    fn add_closed_trade(&self, trade: &Trade) {
        let core = trade.core();
        self.closed.lock().push(ClosedTrade {
            id: trade.id(),
            direction: trade.direction(),
            closed: trade.is_closed(),
            profit_loss_rate: core.profit_loss_rate(),
            exit_reason: core.stats().exit_reason,
        });
    }
}

/// A strategy instance and the manager of its trades.
pub struct Desk {
    pub strategy: Arc<ScriptedStrategy>,
    pub manager: Arc<TradeManager>,
    pub timeframe: f64,
    pub entry_timeout: f64,
}

impl Desk {
    pub fn apply(&self, intent: &Intent) {
        let id = self.strategy.identifier();
        match intent.action {
            Action::Open => {
                let Some(request) = intent.entry_request() else {
                    warn!("[script] {id} open at {} lacks direction or quantity", intent.at);
                    return;
                };
                match self.manager.open_trade(&request, self.timeframe) {
                    Ok(ret) if ret.is_accepted() => {
                        info!("[script] {id} open {} {} x{}", request.direction, request.kind, request.quantity);
                    }
                    Ok(ret) => warn!("[script] {id} open refused: {ret}"),
                    Err(e) => error!("[script] {id} open failed: {e}"),
                }
            }
            Action::Close => match intent.direction {
                Some(direction) => {
                    let n = self.manager.close_all_by_direction(direction);
                    info!("[script] {id} close {direction}: {n} trade(s)");
                }
                None => warn!("[script] {id} close at {} lacks direction", intent.at),
            },
            Action::CloseAll => {
                let n = self.manager.close_all();
                info!("[script] {id} close all: {n} trade(s)");
            }
        }
    }

    /// Cancel the entries still unfilled `entry_timeout` seconds after they
    /// were placed. Returns how many were canceled.
    pub fn expire_entries(&self, timestamp: f64) -> usize {
        if self.entry_timeout <= 0.0 {
            return 0;
        }
        let mut canceled = 0;
        for handle in self.manager.trades() {
            let mut trade = handle.lock();
            if trade.is_entry_timeout(timestamp, self.entry_timeout) && trade.cancel_open().is_accepted() {
                info!("[script] {} #{} entry timed out", self.strategy.identifier(), trade.id());
                canceled += 1;
            }
        }
        canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"[
        { "at": 120.0, "strategy": "s1", "action": "close_all" },
        { "at": 60.0, "strategy": "s1", "action": "open", "direction": "short",
          "kind": "stop", "price": 95.0, "quantity": 2.0, "take_profit": 80.0 },
        { "at": 60.0, "strategy": "s2", "action": "close", "direction": "long" }
    ]"#;

    #[test]
    fn due_in_time_order() {
        let mut script = Script::parse(SCRIPT).unwrap();
        assert!(script.due(59.0).is_empty());
        let due = script.due(60.0);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].action, Action::Open);
        assert_eq!(due[1].strategy, "s2");
        assert_eq!(script.len(), 1);
        assert_eq!(script.due(1e9)[0].action, Action::CloseAll);
    }

    #[test]
    fn open_intent_request() {
        let script = Script::parse(SCRIPT).unwrap();
        let request = script.intents[0].entry_request().unwrap();
        assert_eq!(request.direction, Direction::Short);
        assert_eq!(request.kind, OrderKind::Stop);
        assert_eq!(request.order_price, 95.0);
        assert_eq!(request.take_profit, 80.0);
        assert_eq!(request.stop_loss, 0.0);
        assert_eq!(request.trigger_limit(), 95.0);
        assert!(script.intents[1].entry_request().is_none());
    }
}
