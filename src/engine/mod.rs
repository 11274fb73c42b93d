// =============================================================================
// Engine Orchestrator — wires components, drives the per-tick strategy loop
// =============================================================================
//
// Owns every component's `Arc` and the run's shutdown flag — the only
// legitimate process-wide state. Subscribes to `TradePrint` on the
// strategy's behalf; for each trade: forward to strategy, poll for a trade
// action, submit a limit order at the tick price if the strategy wants one,
// notify the strategy of the fill. Shutdown is cooperative: the flag is
// polled at a bounded interval by the run loop and by adapters.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::broker::Broker;
use crate::bus::{Event, EventBus, RunStart, Topic};
use crate::config::RuntimeConfig;
use crate::instrument::InstrumentRegistry;
use crate::provider::Provider;
use crate::store::{Store, StoredEvent};
use crate::strategy::{PriceTick, Strategy, TradeAction};
use crate::types::Side;

/// One start-to-stop lifecycle of the engine, identified by `run_id`.
pub struct Run {
    pub run_id: String,
    pub started_at_ms: i64,
}

/// Wires bus, provider, broker, aggregator, store and strategy together and
/// drives the engine for the configured duration or until shutdown.
pub struct Engine {
    pub bus: Arc<EventBus>,
    pub registry: Arc<InstrumentRegistry>,
    pub provider: Arc<Provider>,
    pub broker: Arc<Broker>,
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<Store>,
    strategy: Arc<Mutex<dyn Strategy>>,
    config: RuntimeConfig,
    shutdown: Arc<AtomicBool>,
    run: Mutex<Option<Run>>,
}

impl Engine {
    pub fn new(
        config: RuntimeConfig,
        strategy: Arc<Mutex<dyn Strategy>>,
        source: crate::types::Source,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(InstrumentRegistry::new());
        let provider = Provider::new(bus.clone(), registry.clone());
        let broker = Broker::new(bus.clone(), config.starting_balance);
        let aggregator = Aggregator::new(bus.clone(), config.candle_resolutions_ms.clone(), source);
        let store = Store::open(
            &config.db_path,
            config.candle_buffer_size,
            config.event_buffer_size,
            config.candle_cache_size,
            config.event_cache_size,
            config.flush_interval_secs,
        )
        .expect("store must open at engine construction; a failure here is fatal");

        aggregator.on_finalized({
            let store = store.clone();
            move |candle| store.add_candle(candle.clone())
        });

        let engine = Arc::new(Self {
            bus: bus.clone(),
            registry,
            provider,
            broker,
            aggregator,
            store,
            strategy,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            run: Mutex::new(None),
        });

        engine.wire_lifecycle_persistence();
        engine.wire_strategy_loop();
        engine
    }

    fn wire_lifecycle_persistence(self: &Arc<Self>) {
        let store = self.store.clone();
        let source = self.aggregator_source();
        for topic in [
            Topic::ORDER_PLACED,
            Topic::ORDER_FILLED,
            Topic::ORDER_REJECTED,
            Topic::POSITION_UPDATED,
        ] {
            let store = store.clone();
            self.bus.subscribe(topic, move |event| {
                if let Some(stored) = to_stored_event(event, source) {
                    store.add_event(stored);
                }
            });
        }
    }

    fn aggregator_source(&self) -> crate::types::Source {
        // The aggregator is the single source of truth for which data
        // provenance this run tags everything with.
        self.aggregator.source_tag()
    }

    fn wire_strategy_loop(self: &Arc<Self>) {
        let engine = self.clone();
        self.bus.subscribe(Topic::TRADE_PRINT, move |event| {
            if let Event::TradePrint(trade) = event {
                engine.on_trade(trade);
            }
        });
    }

    fn on_trade(self: &Arc<Self>, trade: &crate::bus::TradePrint) {
        let action = {
            let mut strategy = self.strategy.lock();
            strategy.on_price_tick(
                &trade.symbol,
                PriceTick {
                    price: trade.price,
                    event_time: trade.event_time,
                },
            );
            strategy.get_trade_action(&trade.symbol)
        };

        let side = match action {
            TradeAction::None => return,
            TradeAction::Buy => Side::Buy,
            TradeAction::Sell => Side::Sell,
        };

        let filled_qty = self.broker.place_limit_order(
            &trade.symbol,
            self.config.order_qty,
            side,
            trade.price,
            trade.event_time,
        );

        if filled_qty > 0.0 {
            let mut strategy = self.strategy.lock();
            strategy.on_order_fill(&trade.symbol, filled_qty, trade.price, side);
        }
    }

    /// Start a run: mint a `run_id`, broadcast `RunStart`, attach the
    /// configured symbols to the provider, and start every adapter.
    pub async fn start(self: &Arc<Self>) {
        let run_id = Uuid::new_v4().to_string();
        let started_at_ms = chrono::Utc::now().timestamp_millis();

        info!(run_id = %run_id, starting_balance = self.config.starting_balance, "engine run starting");

        self.bus.publish(Event::RunStart(RunStart {
            run_id: run_id.clone(),
            timestamp_iso: chrono::Utc::now().to_rfc3339(),
            starting_balance: self.config.starting_balance,
        }));

        *self.run.lock() = Some(Run { run_id, started_at_ms });

        self.store.spawn_flusher();

        let symbols: std::collections::HashSet<String> = self.config.symbols.iter().cloned().collect();
        self.provider.subscribe_trades(symbols);
        self.provider.start_all(None).await;
    }

    /// Current run identity, if a run has started.
    pub fn run_id(&self) -> Option<String> {
        self.run.lock().as_ref().map(|r| r.run_id.clone())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Flip the shutdown flag; the run loop observes it at bounded intervals.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown sequence: stop adapters, flush the aggregator,
    /// flush the store.
    pub async fn shutdown(&self) {
        info!("engine shutdown sequence starting");
        self.provider.stop().await;
        self.aggregator.flush_pending_data();
        self.store.flush_all();
        info!("engine shutdown sequence complete");
    }

    /// Poll the shutdown flag at the configured cadence until it is set.
    pub async fn wait_for_shutdown(&self) {
        let poll = Duration::from_millis(self.config.shutdown_poll_ms);
        while !self.is_shutting_down() {
            tokio::time::sleep(poll).await;
        }
    }
}

fn to_stored_event(event: &Event, source: crate::types::Source) -> Option<StoredEvent> {
    let (event_type, event_time_ms, symbol, payload) = match event {
        Event::OrderPlaced(e) => (
            "OrderPlaced",
            e.event_time,
            e.symbol.clone(),
            serde_json::to_value(e).ok()?,
        ),
        Event::OrderFilled(e) => (
            "OrderFilled",
            e.event_time,
            e.symbol.clone(),
            serde_json::to_value(e).ok()?,
        ),
        Event::OrderRejected(e) => (
            "OrderRejected",
            e.event_time,
            e.symbol.clone(),
            serde_json::to_value(e).ok()?,
        ),
        Event::PositionUpdated(e) => (
            "PositionUpdated",
            e.event_time,
            e.symbol.clone(),
            serde_json::to_value(e).ok()?,
        ),
        _ => return None,
    };

    Some(StoredEvent {
        event_type: event_type.to_string(),
        event_time_ms,
        symbol,
        source,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ReplayAdapter;
    use crate::strategy::ReferenceStrategy;
    use crate::types::{Liquidity, OrderType};

    fn trade(symbol: &str, price: f64, event_time: i64) -> crate::bus::TradePrint {
        crate::bus::TradePrint {
            instrument_id: 0,
            symbol: symbol.to_string(),
            price,
            qty: 1.0,
            event_time,
            side: Side::Buy,
            order_type: OrderType::Market,
            liquidity: Liquidity::Taker,
            metadata: Default::default(),
        }
    }

    fn test_config() -> RuntimeConfig {
        let mut cfg = RuntimeConfig::default();
        cfg.symbols = vec!["BTCUSD".to_string()];
        cfg.order_qty = 1.0;
        cfg.db_path = std::env::temp_dir()
            .join(format!("meridian-engine-test-{}.sqlite3", uuid::Uuid::new_v4()))
            .to_str()
            .unwrap()
            .to_string();
        cfg
    }

    #[tokio::test]
    async fn strategy_buys_then_sells_across_a_replayed_run() {
        let engine = Engine::new(
            test_config(),
            Arc::new(Mutex::new(ReferenceStrategy::new())),
            crate::types::Source::Backtest,
        );

        let trades = vec![trade("BTCUSD", 100.0, 0), trade("BTCUSD", 90.0, 1)];
        let adapter = Arc::new(ReplayAdapter::new("replay", trades));
        engine.provider.attach(adapter);

        engine.start().await;

        let position = engine.broker.get_positions().get("BTCUSD").copied().unwrap_or_default();
        assert!(position.is_flat());
        let orders = engine.broker.get_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[1].side, Side::Sell);
    }

    #[tokio::test]
    async fn run_start_mints_a_run_id() {
        let engine = Engine::new(
            test_config(),
            Arc::new(Mutex::new(ReferenceStrategy::new())),
            crate::types::Source::Backtest,
        );
        assert!(engine.run_id().is_none());
        engine.start().await;
        assert!(engine.run_id().is_some());
    }
}
