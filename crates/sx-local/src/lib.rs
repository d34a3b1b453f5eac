//! # sx-local
//!
//! Simulated exchange implementing the [`Connector`](sx_trade::Connector)
//! trait for paper trading and backtests.
//!
//! | Module      | Role                                                        |
//! |-------------|-------------------------------------------------------------|
//! | `connector` | [`LocalConnector`]: request handling and market updates     |
//! | `trigger`   | Trigger rules and execution prices of pending orders        |
//! | `backend`   | Spot, indivisible margin, FIFO margin and position models   |
//! | `account`   | [`VirtualAccount`]: balance, margin, drawdown, day samples  |
//! | `state`     | Pending orders, lots and assets behind the connector lock   |

pub mod account;
pub(crate) mod backend;
pub mod connector;
pub mod state;
pub mod trigger;

pub use account::{AccountSample, VirtualAccount};
pub use connector::LocalConnector;
pub use state::{Lot, VirtualAsset};
