//! Enumerations shared by orders, positions, trades and connectors.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Side of an order, position or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    /// `+1.0` for long, `-1.0` for short.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Parse the `+1`/`-1` integer form used by strategies.
    pub fn from_sign(sign: i32) -> Option<Self> {
        match sign {
            1 => Some(Self::Long),
            -1 => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order kinds
// ---------------------------------------------------------------------------

/// How an order is executed by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderKind {
    /// Limit-type orders rest on the book and pay the maker fee.
    #[inline]
    pub fn is_limit_type(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit | Self::TakeProfitLimit)
    }

    #[inline]
    pub fn is_market(self) -> bool {
        self == Self::Market
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop-limit",
            Self::TakeProfit => "take-profit",
            Self::TakeProfitLimit => "take-profit-limit",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Trade types
// ---------------------------------------------------------------------------

/// Accounting model a trade runs under.
///
/// `Spot` trades are asset-style (buy then sell), every other type is
/// position-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeType {
    Spot,
    Margin,
    IndMargin,
    Position,
}

impl TradeType {
    pub const ALL: [TradeType; 4] = [Self::Spot, Self::Margin, Self::IndMargin, Self::Position];

    /// Dense index, used to address per-type pools.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Spot => 0,
            Self::Margin => 1,
            Self::IndMargin => 2,
            Self::Position => 3,
        }
    }
}

impl std::fmt::Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::IndMargin => "ind-margin",
            Self::Position => "position",
        };
        f.write_str(s)
    }
}

/// Bit set of the accounting models a market supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TradeCaps(pub u8);

impl TradeCaps {
    pub const SPOT: u8 = 1;
    pub const MARGIN: u8 = 2;
    pub const IND_MARGIN: u8 = 4;
    pub const FIFO: u8 = 8;
    pub const POSITION: u8 = 16;

    #[inline]
    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    #[inline]
    pub fn with(self, bit: u8) -> Self {
        Self(self.0 | bit)
    }
}

/// Capability names as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeCapability {
    Spot,
    Margin,
    IndMargin,
    Fifo,
    Position,
}

impl TradeCapability {
    pub fn bit(self) -> u8 {
        match self {
            Self::Spot => TradeCaps::SPOT,
            Self::Margin => TradeCaps::MARGIN,
            Self::IndMargin => TradeCaps::IND_MARGIN,
            Self::Fifo => TradeCaps::FIFO,
            Self::Position => TradeCaps::POSITION,
        }
    }
}

// ---------------------------------------------------------------------------
// Return codes
// ---------------------------------------------------------------------------

/// Synchronous outcome of every connector request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReturnCode {
    Accepted,
    Rejected,
    Error,
    InsufficientMargin,
    InsufficientFunds,
    NothingToDo,
    InvalidArgs,
    UnreachableService,
}

impl ReturnCode {
    #[inline]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::InsufficientMargin => "insufficient-margin",
            Self::InsufficientFunds => "insufficient-funds",
            Self::NothingToDo => "nothing-to-do",
            Self::InvalidArgs => "invalid-args",
            Self::UnreachableService => "unreachable-service",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Signal events
// ---------------------------------------------------------------------------

/// Order lifecycle notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderEvent {
    Opened,
    Updated,
    Traded,
    Deleted,
    Rejected,
    Canceled,
}

impl OrderEvent {
    /// Exactly one terminal event closes the life of an order.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Rejected | Self::Canceled)
    }
}

/// Position lifecycle notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionEvent {
    Opened,
    Updated,
    Amended,
    Deleted,
}

/// Connector connectivity notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusEvent {
    ConnectionAcquired,
    ConnectionLost,
}

// ---------------------------------------------------------------------------
// Trade states
// ---------------------------------------------------------------------------

/// State of one side (entry or exit) of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TradeState {
    #[default]
    Undefined,
    New,
    Opened,
    PartiallyFilled,
    Filled,
    Rejected,
    Canceled,
    Deleted,
    Error,
}

impl TradeState {
    /// Submitted and still able to fill.
    #[inline]
    pub fn is_working(self) -> bool {
        matches!(self, Self::New | Self::Opened | Self::PartiallyFilled)
    }

    /// Ended without (further) fills.
    #[inline]
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Rejected | Self::Canceled | Self::Deleted | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::New => "new",
            Self::Opened => "opened",
            Self::PartiallyFilled => "filling",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }
}

/// Why a trade was exited, kept for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    #[default]
    None,
    Unknown,
    CloseMarket,
    StopLossMarket,
    StopLossLimit,
    TakeProfitMarket,
    TakeProfitLimit,
    Canceled,
}

/// Where a stop-loss or take-profit modification is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ModifierType {
    /// Strategy-side trigger evaluated by `Trade::process`.
    #[default]
    Local,
    /// Pushed to the exchange as an order or position amendment.
    Distant,
    /// Whichever of the two was last used for that leg.
    Previous,
}
