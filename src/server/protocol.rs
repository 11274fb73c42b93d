// =============================================================================
// Wire protocol to the external viewer
// =============================================================================
//
// One JSON message per line (TEXT frame). Every message carries `type`;
// requests and responses additionally carry `request_id`, which the server
// must preserve verbatim.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::aggregator::Candle;
use crate::broker::Position as BrokerPosition;

/// Every message the server can push unsolicited, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    RunStart {
        run_id: String,
        timestamp_iso: String,
        starting_balance: f64,
    },
    ProviderTick {
        symbol: String,
        price: f64,
        timestamp_iso: String,
    },
    OrderPlaced {
        order_id: u64,
        symbol: String,
        qty: f64,
        side: String,
        limit_price: f64,
        status: &'static str,
        timestamp_iso: String,
        ms: i64,
    },
    OrderFilled {
        order_id: u64,
        symbol: String,
        filled_qty: f64,
        fill_price: f64,
        side: String,
        status: &'static str,
        timestamp_iso: String,
        ms: i64,
    },
    OrderRejected {
        order_id: u64,
        symbol: String,
        qty: f64,
        side: String,
        reason: String,
        timestamp_iso: String,
        ms: i64,
    },
    PositionUpdated {
        symbol: String,
        qty: f64,
        avg_price: f64,
        timestamp_iso: String,
    },
}

/// A client request. `data` is parsed per `type` by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryCandlesData {
    pub symbol: String,
    #[serde(rename = "resolutionMs")]
    pub resolution_ms: i64,
    #[serde(rename = "startMs")]
    pub start_ms: i64,
    #[serde(rename = "endMs")]
    pub end_ms: i64,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryCandlesResponseData {
    pub symbol: String,
    #[serde(rename = "resolutionMs")]
    pub resolution_ms: i64,
    pub candles: Vec<Candle>,
    pub count: usize,
    #[serde(rename = "isTruncated")]
    pub is_truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryEventsData {
    pub symbol: String,
    #[serde(rename = "startMs")]
    pub start_ms: i64,
    #[serde(rename = "endMs")]
    pub end_ms: i64,
    #[serde(rename = "eventTypes")]
    pub event_types: Option<Vec<String>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryEventsResponseData {
    pub symbol: String,
    pub events: Vec<crate::store::StoredEvent>,
    pub count: usize,
    #[serde(rename = "isTruncated")]
    pub is_truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
}

impl PositionView {
    pub fn from_map(positions: &std::collections::HashMap<String, BrokerPosition>) -> Vec<Self> {
        positions
            .iter()
            .map(|(symbol, p)| Self {
                symbol: symbol.clone(),
                qty: p.qty,
                avg_price: p.avg_price,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultViewportData {
    pub symbol: String,
    #[serde(rename = "startMs")]
    pub start_ms: i64,
    #[serde(rename = "endMs")]
    pub end_ms: i64,
}

/// A response envelope. `data` carries the success payload; `error` an
/// error code string. Exactly one of the two is populated.
#[derive(Debug, Clone, Serialize)]
pub struct ServerResponse<T: Serialize> {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ServerResponse<T> {
    pub fn ok(kind: impl Into<String>, request_id: impl Into<String>, data: T) -> Self {
        Self {
            kind: kind.into(),
            request_id: request_id.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn err(kind: impl Into<String>, request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id: request_id.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}
