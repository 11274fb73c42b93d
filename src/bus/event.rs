// =============================================================================
// Event types carried by the bus
// =============================================================================
//
// The source bus (aurora-bot) moves type-erased payloads and casts them back
// at each handler; a handler registered against the wrong payload type fails
// at dispatch time. Here the payload is a single `Event` enum instead: every
// variant is known at compile time, `.topic()` maps a variant to the topic it
// belongs on, and `publish` rejects (logs, does not panic) an event handed to
// the wrong topic rather than a handler casting it wrong.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Liquidity, OrderStatus, OrderType, Side, Source};

/// A bus topic. Topics are a small, closed set known at compile time, so a
/// `&'static str` newtype is enough — no interning table is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

impl Topic {
    pub const TRADE_PRINT: Topic = Topic("TradePrint");
    pub const ORDER_PLACED: Topic = Topic("OrderPlaced");
    pub const ORDER_FILLED: Topic = Topic("OrderFilled");
    pub const ORDER_REJECTED: Topic = Topic("OrderRejected");
    pub const POSITION_UPDATED: Topic = Topic("PositionUpdated");
    pub const CANDLE_CLOSED: Topic = Topic("CandleClosed");
    pub const RUN_START: Topic = Topic("RunStart");
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized trade print from a market data adapter. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePrint {
    pub instrument_id: u64,
    pub symbol: String,
    pub price: f64,
    pub qty: f64,
    /// Monotonic-per-instrument timestamp, milliseconds.
    pub event_time: i64,
    pub side: Side,
    pub order_type: OrderType,
    pub liquidity: Liquidity,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A lifecycle event published when an order is accepted and its outcome is
/// not yet known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
    pub symbol: String,
    pub qty: f64,
    pub side: Side,
    pub limit_price: f64,
    pub event_time: i64,
}

/// A lifecycle event published when an order fills (fully or partially).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFilled {
    pub order_id: u64,
    pub symbol: String,
    pub filled_qty: f64,
    pub fill_price: f64,
    pub side: Side,
    pub status: OrderStatus,
    pub event_time: i64,
}

/// A lifecycle event published when an order is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejected {
    pub order_id: u64,
    pub symbol: String,
    pub qty: f64,
    pub side: Side,
    pub reason: String,
    pub event_time: i64,
}

/// A lifecycle event published whenever a fill changes a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdated {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
    pub event_time: i64,
}

/// A finalized OHLCV bucket handed from the aggregator to anyone listening
/// (the store consumes these directly via its own subscription, not only
/// through this event, but the event lets the query server push candles too).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleClosed {
    pub symbol: String,
    pub resolution_ms: i64,
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub source: Source,
}

/// Broadcast once at engine start, and again to every client on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStart {
    pub run_id: String,
    pub timestamp_iso: String,
    pub starting_balance: f64,
}

/// The tagged sum of every event that can cross the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TradePrint(TradePrint),
    OrderPlaced(OrderPlaced),
    OrderFilled(OrderFilled),
    OrderRejected(OrderRejected),
    PositionUpdated(PositionUpdated),
    CandleClosed(CandleClosed),
    RunStart(RunStart),
}

impl Event {
    /// The topic this variant is delivered on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::TradePrint(_) => Topic::TRADE_PRINT,
            Self::OrderPlaced(_) => Topic::ORDER_PLACED,
            Self::OrderFilled(_) => Topic::ORDER_FILLED,
            Self::OrderRejected(_) => Topic::ORDER_REJECTED,
            Self::PositionUpdated(_) => Topic::POSITION_UPDATED,
            Self::CandleClosed(_) => Topic::CANDLE_CLOSED,
            Self::RunStart(_) => Topic::RUN_START,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_variant_maps_to_its_own_topic() {
        let tp = Event::TradePrint(TradePrint {
            instrument_id: 1,
            symbol: "BTCUSD".into(),
            price: 100.0,
            qty: 1.0,
            event_time: 0,
            side: Side::Buy,
            order_type: OrderType::Market,
            liquidity: Liquidity::Taker,
            metadata: HashMap::new(),
        });
        assert_eq!(tp.topic(), Topic::TRADE_PRINT);

        let placed = Event::OrderPlaced(OrderPlaced {
            order_id: 1,
            symbol: "BTCUSD".into(),
            qty: 1.0,
            side: Side::Buy,
            limit_price: 100.0,
            event_time: 0,
        });
        assert_eq!(placed.topic(), Topic::ORDER_PLACED);
    }
}
