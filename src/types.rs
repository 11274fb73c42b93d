// =============================================================================
// Shared primitive types used across the trading engine core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Coarse classification of an instrument's market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Future,
    Option,
    FX,
    Crypto,
    Unknown,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "Equity"),
            Self::Future => write!(f, "Future"),
            Self::Option => write!(f, "Option"),
            Self::FX => write!(f, "FX"),
            Self::Crypto => write!(f, "Crypto"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Trade / order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    /// Only valid on a `TradePrint` whose adapter did not report a side.
    Unknown,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Order type as reported on the originating `TradePrint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Unknown,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "Market"),
            Self::Limit => write!(f, "Limit"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Maker/taker classification reported on a `TradePrint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
    Unknown,
}

impl std::fmt::Display for Liquidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Maker => write!(f, "Maker"),
            Self::Taker => write!(f, "Taker"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Data provenance tag carried by candles and stored events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Live,
    Backtest,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Backtest => write!(f, "backtest"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "backtest" => Ok(Self::Backtest),
            other => Err(format!("unknown source tag: {other}")),
        }
    }
}

/// Order lifecycle status. Terminal statuses never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Working,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses (`Filled`, `Canceled`, `Rejected`) never transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Working => write!(f, "Working"),
            Self::PartiallyFilled => write!(f, "PartiallyFilled"),
            Self::Filled => write!(f, "Filled"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Working.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn source_round_trips_through_display_and_parse() {
        use std::str::FromStr;
        assert_eq!(Source::from_str("live").unwrap(), Source::Live);
        assert_eq!(Source::from_str("backtest").unwrap(), Source::Backtest);
        assert!(Source::from_str("replay").is_err());
        assert_eq!(Source::Live.to_string(), "live");
    }
}
