//! Signal channel from connectors to the trader proxy.
//!
//! A connector posts every state change as a [`Signal`] on an unbounded
//! channel. The strategy thread drains it through
//! [`TraderProxy::dispatch_signals`](crate::TraderProxy::dispatch_signals), so
//! signals are applied in emission order and never while a connector lock is
//! held.

use sx_core::types::{AccountSignal, AssetSignal, MarketSignal, OrderSignal, PositionSignal, StatusSignal};

/// A typed event emitted by a [`Connector`](crate::Connector).
#[derive(Debug, Clone)]
pub enum Signal {
    /// An order state change (opened, traded, deleted, ...).
    Order(OrderSignal),

    /// A position state change.
    Position(PositionSignal),

    /// Account balance or margin update.
    Account(AccountSignal),

    /// Asset quantity update.
    Asset(AssetSignal),

    /// Market price or state update.
    Market(MarketSignal),

    /// Connectivity change.
    Status(StatusSignal),
}

/// Sender half of the signal channel.
pub type SignalSender = crossbeam_channel::Sender<Signal>;

/// Receiver half of the signal channel.
pub type SignalReceiver = crossbeam_channel::Receiver<Signal>;

/// Create an unbounded signal channel.
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    crossbeam_channel::unbounded()
}
