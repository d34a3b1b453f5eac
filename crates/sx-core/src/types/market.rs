//! Market reference data and live quote.
//!
//! A [`Market`] pairs immutable instrument settings (capabilities, fees,
//! quantity filter, contract size) with a lock-protected [`Quote`] updated by
//! the market-data thread. Readers always take a copy of the quote, so no lock
//! is held across trading decisions.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::enums::{Direction, TradeCaps, TradeType};

/// Best bid/ask snapshot of a market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub timestamp: f64,
    pub tradeable: bool,
}

/// One side of a fee schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fee {
    /// Proportional fee, applied to the notional value.
    pub rate: f64,
    /// Fixed fee per execution, in quote currency.
    pub commission: f64,
}

/// Order quantity constraints.
///
/// A zero field disables that constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantityFilter {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Instrument reference data plus live quote.
#[derive(Debug)]
pub struct Market {
    pub market_id: String,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub caps: TradeCaps,
    pub hedging: bool,
    pub contract_size: f64,
    pub margin_factor: f64,
    pub maker_fee: Fee,
    pub taker_fee: Fee,
    pub qty_filter: QuantityFilter,
    price: RwLock<Quote>,
}

impl Market {
    pub fn new(market_id: &str, base: &str, quote: &str, caps: TradeCaps) -> Self {
        Self {
            market_id: market_id.to_owned(),
            symbol: format!("{base}/{quote}"),
            base: base.to_owned(),
            quote: quote.to_owned(),
            caps,
            hedging: caps.has(TradeCaps::POSITION),
            contract_size: 1.0,
            margin_factor: 1.0,
            maker_fee: Fee::default(),
            taker_fee: Fee::default(),
            qty_filter: QuantityFilter::default(),
            price: RwLock::new(Quote { tradeable: true, ..Quote::default() }),
        }
    }

    pub fn with_fees(mut self, maker: Fee, taker: Fee) -> Self {
        self.maker_fee = maker;
        self.taker_fee = taker;
        self
    }

    pub fn with_margin_factor(mut self, margin_factor: f64) -> Self {
        self.margin_factor = margin_factor;
        self
    }

    pub fn with_contract_size(mut self, contract_size: f64) -> Self {
        self.contract_size = contract_size;
        self
    }

    pub fn with_qty_filter(mut self, filter: QuantityFilter) -> Self {
        self.qty_filter = filter;
        self
    }

    // -----------------------------------------------------------------------
    // Quote
    // -----------------------------------------------------------------------

    /// Copy of the current quote.
    pub fn snapshot(&self) -> Quote {
        *self.price.read()
    }

    pub fn set_price(&self, bid: f64, ask: f64, timestamp: f64) {
        let mut q = self.price.write();
        q.bid = bid;
        q.ask = ask;
        q.last = (bid + ask) * 0.5;
        q.timestamp = timestamp;
    }

    pub fn set_tradeable(&self, tradeable: bool) {
        self.price.write().tradeable = tradeable;
    }

    pub fn bid(&self) -> f64 {
        self.price.read().bid
    }

    pub fn ask(&self) -> f64 {
        self.price.read().ask
    }

    /// Mid price of the last quote.
    pub fn last(&self) -> f64 {
        self.price.read().last
    }

    pub fn timestamp(&self) -> f64 {
        self.price.read().timestamp
    }

    pub fn is_tradeable(&self) -> bool {
        self.price.read().tradeable
    }

    /// Price an order opening `direction` would execute at: ask for long, bid
    /// for short.
    pub fn open_exec_price(&self, direction: Direction) -> f64 {
        let q = self.price.read();
        match direction {
            Direction::Long => q.ask,
            Direction::Short => q.bid,
        }
    }

    /// Price closing a `direction` position would execute at: bid for long,
    /// ask for short.
    pub fn close_exec_price(&self, direction: Direction) -> f64 {
        let q = self.price.read();
        match direction {
            Direction::Long => q.bid,
            Direction::Short => q.ask,
        }
    }

    // -----------------------------------------------------------------------
    // Capabilities
    // -----------------------------------------------------------------------

    pub fn has_spot(&self) -> bool {
        self.caps.has(TradeCaps::SPOT)
    }

    pub fn has_margin(&self) -> bool {
        self.caps.has(TradeCaps::MARGIN)
    }

    pub fn indivisible_position(&self) -> bool {
        self.caps.has(TradeCaps::IND_MARGIN)
    }

    pub fn fifo_position(&self) -> bool {
        self.caps.has(TradeCaps::FIFO)
    }

    pub fn has_position(&self) -> bool {
        self.caps.has(TradeCaps::POSITION)
    }

    /// Whether trades of `trade_type` can run on this market.
    pub fn supports(&self, trade_type: TradeType) -> bool {
        match trade_type {
            TradeType::Spot => self.has_spot(),
            TradeType::Margin => self.has_margin() || self.fifo_position(),
            TradeType::IndMargin => self.indivisible_position(),
            TradeType::Position => self.has_position(),
        }
    }

    // -----------------------------------------------------------------------
    // Quantities and fees
    // -----------------------------------------------------------------------

    /// Fit a quantity to the filter: below the minimum gives `0.0`, above the
    /// maximum is clamped, then floored to the step size.
    pub fn adjust_quantity(&self, quantity: f64) -> f64 {
        let f = &self.qty_filter;
        if quantity <= 0.0 || quantity < f.min {
            return 0.0;
        }
        let mut q = if f.max > 0.0 { quantity.min(f.max) } else { quantity };
        if f.step > 0.0 {
            // small epsilon absorbs representation error (0.3 / 0.1 = 2.9999..)
            q = ((q / f.step) + 1e-9).floor() * f.step;
        }
        q
    }

    /// Maker side for resting limit-type executions, taker otherwise.
    pub fn fee(&self, maker: bool) -> &Fee {
        if maker { &self.maker_fee } else { &self.taker_fee }
    }

    /// Fee amount for an execution of `notional` quote value.
    pub fn commission(&self, notional: f64, maker: bool) -> f64 {
        let fee = self.fee(maker);
        notional.abs() * fee.rate + fee.commission
    }

    /// Margin locked by a position of `quantity` at `price`.
    pub fn margin_required(&self, quantity: f64, price: f64) -> f64 {
        quantity * price * self.contract_size * self.margin_factor
    }
}

// ---------------------------------------------------------------------------
// MarketRegistry
// ---------------------------------------------------------------------------

/// Shared lookup of markets by id.
#[derive(Debug, Default)]
pub struct MarketRegistry {
    markets: RwLock<AHashMap<String, Arc<Market>>>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, market: Market) -> Arc<Market> {
        let market = Arc::new(market);
        self.markets.write().insert(market.market_id.clone(), Arc::clone(&market));
        market
    }

    pub fn get(&self, market_id: &str) -> Option<Arc<Market>> {
        self.markets.read().get(market_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markets.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.markets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> Market {
        Market::new("BTCUSDT", "BTC", "USDT", TradeCaps(TradeCaps::SPOT | TradeCaps::POSITION))
            .with_qty_filter(QuantityFilter { min: 0.01, max: 5.0, step: 0.01 })
    }

    #[test]
    fn exec_prices_by_direction() {
        let m = market();
        m.set_price(99.0, 101.0, 1.0);
        assert_eq!(m.open_exec_price(Direction::Long), 101.0);
        assert_eq!(m.open_exec_price(Direction::Short), 99.0);
        assert_eq!(m.close_exec_price(Direction::Long), 99.0);
        assert_eq!(m.close_exec_price(Direction::Short), 101.0);
        assert_eq!(m.last(), 100.0);
    }

    #[test]
    fn adjust_quantity_filter() {
        let m = market();
        assert_eq!(m.adjust_quantity(0.001), 0.0);
        assert_eq!(m.adjust_quantity(9.0), 5.0);
        assert!((m.adjust_quantity(0.456) - 0.45).abs() < 1e-12);
        assert!((m.adjust_quantity(0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn supports_trade_types() {
        let m = market();
        assert!(m.supports(TradeType::Spot));
        assert!(m.supports(TradeType::Position));
        assert!(!m.supports(TradeType::IndMargin));
        assert!(!m.supports(TradeType::Margin));
    }

    #[test]
    fn commission_maker_taker() {
        let m = market().with_fees(
            Fee { rate: 0.001, commission: 0.0 },
            Fee { rate: 0.002, commission: 1.0 },
        );
        assert!((m.commission(1000.0, true) - 1.0).abs() < 1e-12);
        assert!((m.commission(1000.0, false) - 3.0).abs() < 1e-12);
    }
}
