//! Collaborator interfaces: the strategy owning trades and the trade store.

use std::sync::Arc;

use sx_core::error::SxResult;
use sx_core::types::{Market, TradeType};

use crate::trade::{Trade, TradeRecord};

/// The strategy instance a [`TradeManager`](crate::TradeManager) works for.
///
/// Callbacks are invoked from the strategy thread with the trade locked, so
/// implementations must not call back into the manager.
pub trait Strategy: Send + Sync {
    /// Unique identifier of the strategy instance.
    fn identifier(&self) -> &str;

    /// Broker the strategy trades through, used as persistence key.
    fn broker_id(&self) -> &str;

    /// The market the strategy trades.
    fn market(&self) -> Arc<Market>;

    fn trade_type(&self) -> TradeType;

    /// A trade reached its end (closed or canceled). Called exactly once per
    /// trade, before it returns to the pool.
    fn add_closed_trade(&self, trade: &Trade);

    /// A signal changed the state of a held trade.
    fn update_trade(&self, _trade: &Trade) {}
}

/// Persistence boundary for active trades.
pub trait TradeDb: Send + Sync {
    fn store_trade(&self, broker_id: &str, market_id: &str, strategy_id: &str, record: &TradeRecord) -> SxResult<()>;

    fn fetch_trade_list(&self, broker_id: &str, market_id: &str) -> SxResult<Vec<TradeRecord>>;

    /// Drop every record of a strategy, returning how many went.
    fn clear_trades(&self, broker_id: &str, market_id: &str, strategy_id: &str) -> SxResult<usize>;
}
