// =============================================================================
// ReplayAdapter — deterministic in-memory trade feed for tests and backtests
// =============================================================================
//
// Feeds a pre-built sequence of trades on `start`, in order, with no network
// I/O. Used to exercise the Provider/Aggregator/Broker pipeline
// deterministically; out-of-scope concrete exchange adapters are otherwise
// the only real source of trades.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::bus::TradePrint;
use crate::provider::adapter::{Adapter, TradeHandler};
use crate::types::Source;

/// Replays a fixed set of trades, in order, to every handler subscribed for
/// the trade's symbol.
pub struct ReplayAdapter {
    name: String,
    trades: Mutex<Vec<TradePrint>>,
    handlers: RwLock<HashMap<String, Vec<TradeHandler>>>,
    running: Arc<AtomicBool>,
}

impl ReplayAdapter {
    pub fn new(name: impl Into<String>, trades: Vec<TradePrint>) -> Self {
        Self {
            name: name.into(),
            trades: Mutex::new(trades),
            handlers: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Adapter for ReplayAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> Source {
        Source::Backtest
    }

    fn subscribe_trades(&self, symbols: HashSet<String>, handler: TradeHandler) {
        let mut handlers = self.handlers.write();
        for symbol in symbols {
            handlers.entry(symbol).or_default().push(handler.clone());
        }
    }

    async fn start(&self, _duration_seconds: Option<u64>) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let trades = self.trades.lock().clone();

        for trade in trades {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let handlers = self.handlers.read();
            if let Some(hs) = handlers.get(&trade.symbol) {
                for handler in hs {
                    handler(trade.clone());
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
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
    use crate::types::{Liquidity, OrderType, Side};

    fn trade(symbol: &str, price: f64) -> TradePrint {
        TradePrint {
            instrument_id: 1,
            symbol: symbol.to_string(),
            price,
            qty: 1.0,
            event_time: 0,
            side: Side::Buy,
            order_type: OrderType::Market,
            liquidity: Liquidity::Taker,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn replays_trades_in_order_to_subscribed_handler() {
        let trades = vec![trade("BTCUSD", 100.0), trade("BTCUSD", 101.0)];
        let adapter = ReplayAdapter::new("replay", trades);

        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let mut symbols = HashSet::new();
        symbols.insert("BTCUSD".to_string());
        adapter.subscribe_trades(symbols, Arc::new(move |t: TradePrint| seen2.lock().push(t.price)));

        adapter.start(None).await.unwrap();
        assert_eq!(*seen.lock(), vec![100.0, 101.0]);
    }

    #[tokio::test]
    async fn trades_for_unsubscribed_symbols_are_dropped() {
        let trades = vec![trade("ETHUSD", 200.0)];
        let adapter = ReplayAdapter::new("replay", trades);

        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let mut symbols = HashSet::new();
        symbols.insert("BTCUSD".to_string());
        adapter.subscribe_trades(symbols, Arc::new(move |t: TradePrint| seen2.lock().push(t.price)));

        adapter.start(None).await.unwrap();
        assert!(seen.lock().is_empty());
    }
}
