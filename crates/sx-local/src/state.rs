//! Book of the simulated exchange: pending orders, positions, assets and the
//! account, all behind the connector lock.

use std::collections::VecDeque;

use ahash::AHashMap;
use serde::Serialize;
use sx_core::config::AccountConfig;
use sx_core::types::{AssetSignal, Order, Position};

use crate::account::VirtualAccount;

/// A resting order with its arrival rank.
pub(crate) struct PendingOrder {
    pub seq: u64,
    pub order: Order,
    /// Quote quantity locked by a spot buy.
    pub locked: f64,
}

/// Quantity of a position attributed to one order reference.
#[derive(Debug, Clone, Serialize)]
pub struct Lot {
    pub ref_id: String,
    pub strategy_id: String,
    pub quantity: f64,
    pub price: f64,
}

/// An open position and the lots composing it, oldest first.
pub(crate) struct VirtualPosition {
    pub position: Position,
    pub lots: VecDeque<Lot>,
    /// Opened by the individual position backend.
    pub hedging: bool,
}

impl VirtualPosition {
    pub fn new(position: Position) -> Self {
        Self { position, lots: VecDeque::new(), hedging: false }
    }

    pub fn ref_quantity(&self, ref_id: &str) -> f64 {
        self.lots.iter().filter(|l| l.ref_id == ref_id).map(|l| l.quantity).sum()
    }

    pub fn ref_price(&self, ref_id: &str) -> f64 {
        let (qty, notional) = self
            .lots
            .iter()
            .filter(|l| l.ref_id == ref_id)
            .fold((0.0, 0.0), |(q, n), l| (q + l.quantity, n + l.quantity * l.price));
        if qty > 0.0 { notional / qty } else { 0.0 }
    }

    /// Reference of the oldest lot.
    pub fn main_ref(&self) -> Option<&str> {
        self.lots.front().map(|l| l.ref_id.as_str())
    }

    /// Recompute quantity and average price from the lots.
    pub fn refresh(&mut self) {
        let (qty, notional) =
            self.lots.iter().fold((0.0, 0.0), |(q, n), l| (q + l.quantity, n + l.quantity * l.price));
        self.position.quantity = qty;
        self.position.avg_price = if qty > 0.0 { notional / qty } else { 0.0 };
    }
}

/// Spot holding of one symbol.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VirtualAsset {
    pub symbol: String,
    pub free: f64,
    pub locked: f64,
    /// Average acquisition price in the quote currency.
    pub avg_price: f64,
}

impl VirtualAsset {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

pub(crate) struct LocalState {
    pub timestamp: f64,
    pub seq: u64,
    pub orders: AHashMap<String, PendingOrder>,
    pub positions: AHashMap<String, VirtualPosition>,
    pub assets: AHashMap<String, VirtualAsset>,
    pub account: VirtualAccount,
}

impl LocalState {
    pub fn new(config: &AccountConfig) -> Self {
        let assets = config
            .assets
            .iter()
            .map(|(symbol, qty)| {
                (symbol.clone(), VirtualAsset { symbol: symbol.clone(), free: *qty, ..VirtualAsset::default() })
            })
            .collect();
        Self {
            timestamp: 0.0,
            seq: 0,
            orders: AHashMap::new(),
            positions: AHashMap::new(),
            assets,
            account: VirtualAccount::new(config),
        }
    }

    pub fn asset_mut(&mut self, symbol: &str) -> &mut VirtualAsset {
        self.assets
            .entry(symbol.to_owned())
            .or_insert_with(|| VirtualAsset { symbol: symbol.to_owned(), ..VirtualAsset::default() })
    }

    pub fn free_asset(&self, symbol: &str) -> f64 {
        self.assets.get(symbol).map(|a| a.free).unwrap_or(0.0)
    }

    pub fn asset_signal(&self, symbol: &str) -> AssetSignal {
        let asset = self.assets.get(symbol);
        AssetSignal {
            symbol: symbol.to_owned(),
            free: asset.map(|a| a.free).unwrap_or(0.0),
            locked: asset.map(|a| a.locked).unwrap_or(0.0),
            price: asset.map(|a| a.avg_price).unwrap_or(0.0),
        }
    }
}
