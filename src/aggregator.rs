// =============================================================================
// Candle Aggregator & Persister — trade -> OHLCV bucketing by event time
// =============================================================================
//
// Bucket emission is triggered by the arrival of a trade in a later bucket,
// never by wall-clock time: replaying the same trades at any speed produces
// the same candles. Grounded on the ring-buffer "replace in-progress, else
// append and trim" shape of a kline buffer, re-derived here for event-time
// bucket rollover instead of wall-clock passthrough.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{CandleClosed, Event, EventBus, Topic, TradePrint};
use crate::types::Source;

/// A finalized OHLCV bucket. Identity is `(symbol, resolution_ms, open_time_ms, source)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
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

/// In-flight accumulation state for one (symbol, resolution) pair.
#[derive(Debug, Clone)]
struct Bucket {
    current_bucket_key: Option<i64>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    has_data: bool,
}

impl Bucket {
    fn empty() -> Self {
        Self {
            current_bucket_key: None,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
            has_data: false,
        }
    }

    fn finalize(&self, symbol: &str, resolution_ms: i64, source: Source) -> Option<Candle> {
        if !self.has_data {
            return None;
        }
        Some(Candle {
            symbol: symbol.to_string(),
            resolution_ms,
            open_time_ms: self.current_bucket_key.expect("has_data implies a bucket key"),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            source,
        })
    }
}

/// Bucket key for `event_time_ms` at `resolution_ms`.
pub fn bucket_key(event_time_ms: i64, resolution_ms: i64) -> i64 {
    (event_time_ms.div_euclid(resolution_ms)) * resolution_ms
}

/// Trade -> OHLCV aggregator. One instance covers every configured
/// resolution for every symbol it sees.
pub struct Aggregator {
    bus: Arc<EventBus>,
    resolutions_ms: Vec<i64>,
    source: Source,
    // Keyed by (symbol, resolution_ms).
    buckets: Mutex<HashMap<(String, i64), Bucket>>,
    on_finalized: Mutex<Vec<Box<dyn Fn(&Candle) + Send + Sync>>>,
}

impl Aggregator {
    pub fn new(bus: Arc<EventBus>, resolutions_ms: Vec<i64>, source: Source) -> Arc<Self> {
        let aggregator = Arc::new(Self {
            bus: bus.clone(),
            resolutions_ms,
            source,
            buckets: Mutex::new(HashMap::new()),
            on_finalized: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&aggregator);
        bus.subscribe(Topic::TRADE_PRINT, move |event| {
            if let (Some(agg), Event::TradePrint(trade)) = (weak.upgrade(), event) {
                agg.on_trade(trade);
            }
        });

        aggregator
    }

    /// Register a callback invoked with every finalized candle, in addition
    /// to the `CandleClosed` event published on the bus. The store uses this
    /// to persist candles without round-tripping through bus dispatch.
    pub fn on_finalized<F>(&self, callback: F)
    where
        F: Fn(&Candle) + Send + Sync + 'static,
    {
        self.on_finalized.lock().push(Box::new(callback));
    }

    fn on_trade(&self, trade: &TradePrint) {
        for &resolution_ms in &self.resolutions_ms {
            self.ingest(&trade.symbol, trade.price, trade.qty, trade.event_time, resolution_ms);
        }
    }

    fn ingest(&self, symbol: &str, price: f64, qty: f64, event_time_ms: i64, resolution_ms: i64) {
        let key = bucket_key(event_time_ms, resolution_ms);
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((symbol.to_string(), resolution_ms))
            .or_insert_with(Bucket::empty);

        if let Some(prior_key) = bucket.current_bucket_key {
            if prior_key != key {
                if let Some(finalized) = bucket.finalize(symbol, resolution_ms, self.source) {
                    self.emit(finalized);
                }
                *bucket = Bucket::empty();
            }
        }

        bucket.current_bucket_key = Some(key);
        if !bucket.has_data {
            bucket.open = price;
            bucket.high = price;
            bucket.low = price;
            bucket.close = price;
            bucket.volume = qty;
            bucket.has_data = true;
        } else {
            bucket.high = bucket.high.max(price);
            bucket.low = bucket.low.min(price);
            bucket.close = price;
            bucket.volume += qty;
        }
    }

    fn emit(&self, candle: Candle) {
        debug!(
            symbol = %candle.symbol,
            resolution_ms = candle.resolution_ms,
            open_time_ms = candle.open_time_ms,
            volume = candle.volume,
            "candle finalized"
        );

        for callback in self.on_finalized.lock().iter() {
            callback(&candle);
        }

        self.bus.publish(Event::CandleClosed(CandleClosed {
            symbol: candle.symbol.clone(),
            resolution_ms: candle.resolution_ms,
            open_time_ms: candle.open_time_ms,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            source: candle.source,
        }));
    }

    /// The data provenance tag this aggregator stamps on every candle it emits.
    pub fn source_tag(&self) -> Source {
        self.source
    }

    /// Emit every symbol's current in-flight bucket as a finalized candle.
    /// Idempotent: a bucket already emitted (and therefore reset to empty)
    /// produces nothing on a second call.
    pub fn flush_pending_data(&self) {
        let mut buckets = self.buckets.lock();
        for ((symbol, resolution_ms), bucket) in buckets.iter_mut() {
            if let Some(finalized) = bucket.finalize(symbol, *resolution_ms, self.source) {
                self.emit(finalized);
            }
            *bucket = Bucket::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Liquidity, OrderType, Side};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn trade(symbol: &str, price: f64, qty: f64, event_time: i64) -> TradePrint {
        TradePrint {
            instrument_id: 1,
            symbol: symbol.to_string(),
            price,
            qty,
            event_time,
            side: Side::Buy,
            order_type: OrderType::Market,
            liquidity: Liquidity::Taker,
            metadata: Default::default(),
        }
    }

    #[test]
    fn bucket_key_floors_to_resolution_boundary() {
        assert_eq!(bucket_key(0, 1000), 0);
        assert_eq!(bucket_key(400, 1000), 0);
        assert_eq!(bucket_key(999, 1000), 0);
        assert_eq!(bucket_key(1000, 1000), 1000);
        assert_eq!(bucket_key(1999, 1000), 1000);
    }

    #[test]
    fn e4_candle_aggregation_correctness() {
        let bus = Arc::new(EventBus::new());
        let aggregator = Aggregator::new(bus.clone(), vec![1000], Source::Backtest);

        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted2 = emitted.clone();
        aggregator.on_finalized(move |c| emitted2.lock().push(c.clone()));

        bus.publish(Event::TradePrint(trade("BTCUSD", 100.0, 1.0, 0)));
        bus.publish(Event::TradePrint(trade("BTCUSD", 105.0, 2.0, 400)));
        bus.publish(Event::TradePrint(trade("BTCUSD", 95.0, 1.0, 900)));
        bus.publish(Event::TradePrint(trade("BTCUSD", 110.0, 1.0, 1000)));

        let done = emitted.lock();
        assert_eq!(done.len(), 1);
        let c = &done[0];
        assert_eq!(c.open_time_ms, 0);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 105.0);
        assert_eq!(c.low, 95.0);
        assert_eq!(c.close, 95.0);
        assert_eq!(c.volume, 4.0);
    }

    #[test]
    fn flush_emits_second_bucket() {
        let bus = Arc::new(EventBus::new());
        let aggregator = Aggregator::new(bus.clone(), vec![1000], Source::Backtest);

        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted2 = emitted.clone();
        aggregator.on_finalized(move |c| emitted2.lock().push(c.clone()));

        bus.publish(Event::TradePrint(trade("BTCUSD", 100.0, 1.0, 0)));
        bus.publish(Event::TradePrint(trade("BTCUSD", 110.0, 1.0, 1000)));
        aggregator.flush_pending_data();

        let done = emitted.lock();
        assert_eq!(done.len(), 2);
        assert_eq!(done[1].open_time_ms, 1000);
        assert_eq!(done[1].open, 110.0);
        assert_eq!(done[1].volume, 1.0);
    }

    #[test]
    fn flush_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let aggregator = Aggregator::new(bus.clone(), vec![1000], Source::Backtest);

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        aggregator.on_finalized(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::TradePrint(trade("BTCUSD", 100.0, 1.0, 0)));
        aggregator.flush_pending_data();
        aggregator.flush_pending_data();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
