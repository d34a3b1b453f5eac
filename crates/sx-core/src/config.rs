//! Configuration parsing for the execution runtime.
//!
//! A session reads one JSON file describing the account, the markets it may
//! trade and the strategy instances to run.
//!
//! # Example config
//!
//! ```json
//! {
//!   "session": { "name": "paper", "log_path": "/tmp/log", "broker_id": "local" },
//!   "account": { "currency": "USDT", "balance": 10000.0, "assets": { "USDT": 10000.0 } },
//!   "markets": [{
//!     "market_id": "BTCUSDT", "base": "BTC", "quote": "USDT",
//!     "trade": ["spot", "position"],
//!     "taker_fee": { "rate": 0.0005 },
//!     "qty_filter": { "min": 0.001, "max": 100.0, "step": 0.001 }
//!   }],
//!   "strategies": [{ "identifier": "s1", "market_id": "BTCUSDT", "trade_type": "position" }]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::SxError;
use crate::types::{Fee, Market, MarketRegistry, QuantityFilter, TradeCapability, TradeCaps, TradeType};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Session metadata (name, log path, broker id).
    pub session: Option<SessionMeta>,

    /// Virtual account of the local connector.
    #[serde(default)]
    pub account: AccountConfig,

    /// Tradeable markets.
    pub markets: Vec<MarketConfig>,

    /// Strategy instances to run.
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// Session metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionMeta {
    pub name: Option<String>,
    pub log_path: Option<String>,
    pub broker_id: Option<String>,
    /// Write log files as JSON lines.
    pub log_json: Option<bool>,
}

impl AppConfig {
    /// Session name, defaulting to `"paper"`.
    pub fn session_name(&self) -> String {
        self.session.as_ref().and_then(|s| s.name.clone()).unwrap_or_else(|| "paper".to_owned())
    }

    /// Broker identifier used for trade persistence, defaulting to `"local"`.
    pub fn broker_id(&self) -> String {
        self.session.as_ref().and_then(|s| s.broker_id.clone()).unwrap_or_else(|| "local".to_owned())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.log_path.clone())
    }

    pub fn log_json(&self) -> bool {
        self.session.as_ref().and_then(|s| s.log_json).unwrap_or(false)
    }

    /// Check cross references before anything is built.
    ///
    /// Fails on duplicate market or strategy ids, on a strategy bound to an
    /// unknown market, and on a trade type its market cannot support.
    pub fn validate(&self) -> Result<(), SxError> {
        if self.markets.is_empty() {
            return Err(SxError::Config("no market configured".into()));
        }

        let mut market_ids = HashSet::new();
        for m in &self.markets {
            if !market_ids.insert(m.market_id.as_str()) {
                return Err(SxError::Config(format!("duplicate market '{}'", m.market_id)));
            }
            if m.caps().0 == 0 {
                return Err(SxError::Config(format!("market '{}' has no trade capability", m.market_id)));
            }
        }

        let mut strategy_ids = HashSet::new();
        for s in &self.strategies {
            if !strategy_ids.insert(s.identifier.as_str()) {
                return Err(SxError::Config(format!("duplicate strategy '{}'", s.identifier)));
            }
            let Some(market) = self.markets.iter().find(|m| m.market_id == s.market_id) else {
                return Err(SxError::Config(format!(
                    "strategy '{}' references unknown market '{}'",
                    s.identifier, s.market_id
                )));
            };
            if !market.build().supports(s.trade_type) {
                return Err(SxError::Config(format!(
                    "strategy '{}': market '{}' does not support {} trades",
                    s.identifier, s.market_id, s.trade_type
                )));
            }
        }

        Ok(())
    }

    /// Build the market registry from the `markets` section.
    pub fn market_registry(&self) -> MarketRegistry {
        let registry = MarketRegistry::new();
        for m in &self.markets {
            registry.insert(m.build());
        }
        registry
    }
}

/// Virtual account settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountConfig {
    /// Account currency (default: `"USDT"`).
    pub currency: Option<String>,
    /// Display precision of the currency (default: 2).
    pub precision: Option<u32>,
    /// Initial margin balance.
    pub balance: Option<f64>,
    /// Initial spot asset quantities.
    #[serde(default)]
    pub assets: BTreeMap<String, f64>,
}

impl AccountConfig {
    pub fn effective_currency(&self) -> String {
        self.currency.clone().unwrap_or_else(|| "USDT".to_owned())
    }

    pub fn effective_precision(&self) -> u32 {
        self.precision.unwrap_or(2)
    }

    pub fn effective_balance(&self) -> f64 {
        self.balance.unwrap_or(0.0)
    }
}

/// A single market configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub market_id: String,
    pub symbol: Option<String>,
    pub base: String,
    pub quote: String,

    /// Supported accounting models (`spot`, `margin`, `ind-margin`, `fifo`,
    /// `position`).
    pub trade: Vec<TradeCapability>,

    /// Allow independent positions per order (default: true for `position`).
    pub hedging: Option<bool>,
    pub contract_size: Option<f64>,
    pub margin_factor: Option<f64>,
    pub maker_fee: Option<Fee>,
    pub taker_fee: Option<Fee>,
    pub qty_filter: Option<QuantityFilter>,
}

impl MarketConfig {
    pub fn caps(&self) -> TradeCaps {
        self.trade.iter().fold(TradeCaps::default(), |caps, c| caps.with(c.bit()))
    }

    /// Build the runtime market (quote unset until the first tick).
    pub fn build(&self) -> Market {
        let caps = self.caps();
        let mut market = Market::new(&self.market_id, &self.base, &self.quote, caps)
            .with_fees(self.maker_fee.unwrap_or_default(), self.taker_fee.unwrap_or_default())
            .with_contract_size(self.contract_size.unwrap_or(1.0))
            .with_margin_factor(self.margin_factor.unwrap_or(1.0))
            .with_qty_filter(self.qty_filter.unwrap_or_default());
        if let Some(symbol) = &self.symbol {
            market.symbol = symbol.clone();
        }
        market.hedging = self.hedging.unwrap_or(caps.has(TradeCaps::POSITION));
        market
    }
}

/// One strategy instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub identifier: String,
    pub market_id: String,
    pub trade_type: TradeType,
    /// Timeframe in seconds the strategy trades on (default: 0, tick based).
    pub timeframe: Option<f64>,
    /// Entry timeout in seconds, `0` to disable.
    pub entry_timeout: Option<f64>,
}

impl StrategyConfig {
    pub fn effective_timeframe(&self) -> f64 {
        self.timeframe.unwrap_or(0.0)
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
