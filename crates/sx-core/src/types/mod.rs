//! Core data types: enums, orders and positions, markets, signals.

pub mod asset;
pub mod enums;
pub mod market;
pub mod signal;
pub mod trading;

pub use asset::*;
pub use enums::*;
pub use market::*;
pub use signal::*;
pub use trading::*;
