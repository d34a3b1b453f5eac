//! JSON file trade store.
//!
//! Keeps records in memory keyed by broker and market, and reads or writes
//! them as one JSON document:
//!
//! ```json
//! [ { "broker_id": "local", "market_id": "BTCUSDT", "strategy_id": "s1", "trade": { "variant": "position", ... } } ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sx_core::error::SxResult;

use crate::strategy::TradeDb;
use crate::trade::{TradeLifecycle, TradeRecord};

#[derive(Serialize, Deserialize)]
struct StoredTrade {
    broker_id: String,
    #[serde(flatten)]
    record: TradeRecord,
}

#[derive(Default)]
pub struct JsonTradeStore {
    trades: Mutex<BTreeMap<(String, String), Vec<TradeRecord>>>,
}

impl JsonTradeStore {
    /// Load a store file. A missing file gives an empty store.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let store = Self::default();
        if !path.exists() {
            return Ok(store);
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let stored: Vec<StoredTrade> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        {
            let mut trades = store.trades.lock();
            for s in stored {
                trades.entry((s.broker_id, s.record.market_id.clone())).or_default().push(s.record);
            }
        }
        Ok(store)
    }

    /// Write every record to `path`.
    pub fn flush(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let stored: Vec<StoredTrade> = self
            .trades
            .lock()
            .iter()
            .flat_map(|((broker, _), records)| {
                records.iter().map(|r| StoredTrade { broker_id: broker.clone(), record: r.clone() })
            })
            .collect();
        let text = serde_json::to_string_pretty(&stored)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.trades.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TradeDb for JsonTradeStore {
    fn store_trade(&self, broker_id: &str, market_id: &str, strategy_id: &str, record: &TradeRecord) -> SxResult<()> {
        let mut record = record.clone();
        record.market_id = market_id.to_owned();
        record.strategy_id = strategy_id.to_owned();
        let mut trades = self.trades.lock();
        let list = trades.entry((broker_id.to_owned(), market_id.to_owned())).or_default();
        let id = record.trade.id();
        match list.iter_mut().find(|r| r.strategy_id == strategy_id && r.trade.id() == id) {
            Some(existing) => *existing = record,
            None => list.push(record),
        }
        Ok(())
    }

    fn clear_trades(&self, broker_id: &str, market_id: &str, strategy_id: &str) -> SxResult<usize> {
        let mut trades = self.trades.lock();
        let Some(list) = trades.get_mut(&(broker_id.to_owned(), market_id.to_owned())) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|r| r.strategy_id != strategy_id);
        Ok(before - list.len())
    }

    fn fetch_trade_list(&self, broker_id: &str, market_id: &str) -> SxResult<Vec<TradeRecord>> {
        Ok(self
            .trades
            .lock()
            .get(&(broker_id.to_owned(), market_id.to_owned()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;
    use sx_core::types::TradeType;

    #[test]
    fn store_replaces_same_trade() {
        let fx = Fixture::new();
        let store = JsonTradeStore::default();
        let trade = fx.trade(TradeType::Position);
        let record = trade.dumps();
        store.store_trade("local", "BTCUSDT", "s1", &record).unwrap();
        store.store_trade("local", "BTCUSDT", "s1", &record).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch_trade_list("local", "BTCUSDT").unwrap()[0].strategy_id, "s1");
        assert!(store.fetch_trade_list("other", "BTCUSDT").unwrap().is_empty());
    }

    #[test]
    fn clear_drops_only_that_strategy() {
        let fx = Fixture::new();
        let store = JsonTradeStore::default();
        store.store_trade("local", "BTCUSDT", "s1", &fx.trade(TradeType::Position).dumps()).unwrap();
        store.store_trade("local", "BTCUSDT", "s2", &fx.trade(TradeType::Position).dumps()).unwrap();
        assert_eq!(store.clear_trades("local", "BTCUSDT", "s1").unwrap(), 1);
        assert_eq!(store.clear_trades("local", "ETHUSDT", "s1").unwrap(), 0);
        let list = store.fetch_trade_list("local", "BTCUSDT").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].strategy_id, "s2");
    }

    #[test]
    fn file_round_trip() {
        let fx = Fixture::new();
        let store = JsonTradeStore::default();
        for tt in [TradeType::Position, TradeType::Spot] {
            let record = fx.trade(tt).dumps();
            store.store_trade("local", "BTCUSDT", "s1", &record).unwrap();
        }
        let path = std::env::temp_dir().join(format!("sx-trade-store-{}.json", std::process::id()));
        store.flush(&path).unwrap();

        let loaded = JsonTradeStore::open(&path).unwrap();
        let list = loaded.fetch_trade_list("local", "BTCUSDT").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].trade.trade_type(), TradeType::Spot);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let store = JsonTradeStore::open("/nonexistent/sx-trades.json").unwrap();
        assert!(store.is_empty());
    }
}
