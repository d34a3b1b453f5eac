//! # sx-trade
//!
//! Trade lifecycle, account proxy and per-strategy trade management.
//!
//! | Module     | Role                                                         |
//! |------------|--------------------------------------------------------------|
//! | `trade`    | [`Trade`] state machine, position-style and asset-style      |
//! | `proxy`    | [`TraderProxy`]: pools, ids, account state, signal routing   |
//! | `manager`  | [`TradeManager`]: the open trades of one strategy instance   |
//! | `event`    | [`Signal`] channel from connectors to the proxy              |
//! | `strategy` | [`Strategy`] and [`TradeDb`] collaborator interfaces         |
//! | `store`    | JSON file implementation of [`TradeDb`]                      |
//!
//! Exchanges (the local simulator or a remote gateway) implement the
//! [`Connector`] trait.

pub mod event;
pub mod manager;
pub mod proxy;
pub mod store;
pub mod strategy;
pub mod trade;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Weak;

use sx_core::types::{Direction, Order, ReturnCode};

pub use event::{Signal, SignalReceiver, SignalSender};
pub use manager::{Performance, TradeHandle, TradeManager};
pub use proxy::TraderProxy;
pub use store::JsonTradeStore;
pub use strategy::{Strategy, TradeDb};
pub use trade::{EntryRequest, Trade, TradeLifecycle, TradePhase, TradeRecord};

/// Trait implemented by every exchange connector.
///
/// # Contract
///
/// - Every call returns a synchronous [`ReturnCode`]; nothing panics on
///   ordinary trading outcomes.
/// - State changes are reported asynchronously as signals posted to the
///   attached [`TraderProxy`], in the order they happened.
/// - An order handed to [`create_order`](Connector::create_order) belongs to
///   the connector, which returns it to the proxy pool once its terminal
///   signal has been emitted.
/// - Without an attached proxy, requests return
///   [`ReturnCode::UnreachableService`].
///
/// All methods take `&self` so strategy threads and the market-data thread
/// can call them concurrently.
pub trait Connector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn connected(&self) -> bool;

    /// Attach the proxy that receives signals and owns the object pools.
    fn set_trader_proxy(&self, proxy: Weak<TraderProxy>);

    fn create_order(&self, order: Order) -> ReturnCode;

    fn cancel_order(&self, order_id: &str) -> ReturnCode;

    /// Close `quantity` of a position. `taker` closes at market, otherwise a
    /// limit order at `limit_price` is placed.
    fn close_position(
        &self,
        position_id: &str,
        direction: Direction,
        quantity: f64,
        taker: bool,
        limit_price: f64,
    ) -> ReturnCode;

    /// Attach stop and limit prices to a position (`0.0` removes one).
    fn modify_position(&self, position_id: &str, stop_price: f64, limit_price: f64) -> ReturnCode;
}
