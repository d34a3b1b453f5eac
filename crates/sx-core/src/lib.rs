//! # sx-core
//!
//! Core crate of the trade execution runtime, providing:
//!
//! - **Types** (`types`): enums, orders/positions, markets, connector signals
//! - **Pool** (`pool`): slot arena for reusable trading objects
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `SxError` via thiserror
//! - **CPU affinity** (`cpu_affinity`): thread-to-core pinning
//! - **Time utilities** (`time_util`): epoch seconds and calendar days
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod pool;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
