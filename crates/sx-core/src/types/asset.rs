//! Asset balances.

use serde::{Deserialize, Serialize};

/// Quantity held of one asset, split into free and locked parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub free: f64,
    pub locked: f64,
}

impl Asset {
    pub fn new(symbol: &str) -> Self {
        Self { symbol: symbol.to_owned(), ..Self::default() }
    }

    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}
