//! Typed error definitions for the execution runtime.
//!
//! Ordinary trading outcomes (rejections, insufficient margin) are never
//! errors: they travel as [`ReturnCode`](crate::types::ReturnCode) values.
//! [`SxError`] covers the remaining categories: configuration mistakes caught
//! at startup, pool misuse, broken bookkeeping invariants, signals no trade
//! claims, and persistence. Routing misses are logged and dropped.

use thiserror::Error;

/// Domain-specific errors for the execution runtime.
#[derive(Debug, Error)]
pub enum SxError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Object pool misuse (double free, foreign slot).
    #[error("pool error: {0}")]
    Pool(String),

    /// A bookkeeping invariant was about to be broken (e.g. exit quantity
    /// exceeding entry quantity). The offending update is not applied.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A signal matched no held trade.
    #[error("routing error: {0}")]
    Routing(String),

    /// Trade store read/write error.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Convenience alias for results carrying an [`SxError`].
pub type SxResult<T> = Result<T, SxError>;
