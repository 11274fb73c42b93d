// =============================================================================
// WsTradeAdapter — generic newline-JSON WebSocket trade adapter
// =============================================================================
//
// Connects to a WebSocket endpoint emitting one JSON trade object per TEXT
// frame, parses it into a `TradePrint`, and fans it out to every symbol
// handler registered via `subscribe_trades`. Not exchange-specific: the wire
// shape is `{symbol, price, qty, event_time_ms, side?}`. Reconnection on a
// dropped stream is left to the caller driving `start` in a loop; a single
// `start` call runs until the stream ends or `stop` is requested.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::bus::TradePrint;
use crate::provider::adapter::{Adapter, TradeHandler};
use crate::types::{Liquidity, OrderType, Side, Source};

#[derive(Debug, Deserialize)]
struct WireTrade {
    symbol: String,
    price: f64,
    qty: f64,
    event_time_ms: i64,
    #[serde(default)]
    side: Option<String>,
}

fn parse_side(raw: Option<&str>) -> Side {
    match raw {
        Some(s) if s.eq_ignore_ascii_case("buy") => Side::Buy,
        Some(s) if s.eq_ignore_ascii_case("sell") => Side::Sell,
        _ => Side::Unknown,
    }
}

/// A generic newline-JSON WebSocket trade adapter.
pub struct WsTradeAdapter {
    name: String,
    url: String,
    handlers: RwLock<HashMap<String, Vec<TradeHandler>>>,
    running: Arc<AtomicBool>,
}

impl WsTradeAdapter {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            handlers: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn dispatch(&self, trade: TradePrint) {
        let handlers = self.handlers.read();
        if let Some(hs) = handlers.get(&trade.symbol) {
            for handler in hs {
                handler(trade.clone());
            }
        }
    }
}

#[async_trait]
impl Adapter for WsTradeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> Source {
        Source::Live
    }

    fn subscribe_trades(&self, symbols: HashSet<String>, handler: TradeHandler) {
        let mut handlers = self.handlers.write();
        for symbol in symbols {
            handlers.entry(symbol).or_default().push(handler.clone());
        }
    }

    async fn start(&self, _duration_seconds: Option<u64>) -> anyhow::Result<()> {
        info!(url = %self.url, adapter = %self.name, "connecting to trade WebSocket");
        self.running.store(true, Ordering::SeqCst);

        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to {}: {e}", self.url))?;

        info!(adapter = %self.name, "trade WebSocket connected");
        let (_write, mut read) = ws_stream.split();

        while self.running.load(Ordering::SeqCst) {
            match read.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<WireTrade>(&text) {
                        Ok(wire) => {
                            // instrument_id is filled in by the Provider after
                            // instrument registration; 0 is a placeholder.
                            self.dispatch(TradePrint {
                                instrument_id: 0,
                                symbol: wire.symbol,
                                price: wire.price,
                                qty: wire.qty,
                                event_time: wire.event_time_ms,
                                side: parse_side(wire.side.as_deref()),
                                order_type: OrderType::Unknown,
                                liquidity: Liquidity::Unknown,
                                metadata: HashMap::new(),
                            });
                        }
                        Err(e) => warn!(adapter = %self.name, error = %e, "failed to parse trade message"),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(adapter = %self.name, error = %e, "trade WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!(adapter = %self.name, "trade WebSocket stream ended");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_side_accepts_case_insensitive() {
        assert_eq!(parse_side(Some("Buy")), Side::Buy);
        assert_eq!(parse_side(Some("SELL")), Side::Sell);
        assert_eq!(parse_side(Some("other")), Side::Unknown);
        assert_eq!(parse_side(None), Side::Unknown);
    }

    #[test]
    fn wire_trade_deserializes_minimal_shape() {
        let json = r#"{"symbol":"BTCUSD","price":100.0,"qty":1.0,"event_time_ms":0}"#;
        let wire: WireTrade = serde_json::from_str(json).unwrap();
        assert_eq!(wire.symbol, "BTCUSD");
        assert!(wire.side.is_none());
    }
}
