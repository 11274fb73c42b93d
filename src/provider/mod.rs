// =============================================================================
// Market Data Provider — fans N adapters into a single bus stream
// =============================================================================
//
// On `attach`, the Provider takes exclusive ownership of the adapter. On
// `subscribe_trades`, the subscription is forwarded to every attached
// adapter; their streams merge by calling the same handler. `start_all`
// starts every adapter; `stop` stops them in reverse attach order. Every
// trade an adapter emits is published onto the bus as `TradePrint`, after the
// instrument has been registered (or looked up) so the trade carries a real
// `instrument_id`.
//
// No deduplication, no reordering: adapters are trusted to emit per-instrument
// monotonic event-time trades. Cross-adapter ordering is not guaranteed.
// =============================================================================

pub mod adapter;
pub mod replay_adapter;
pub mod ws_adapter;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

pub use adapter::{Adapter, TradeHandler};
pub use replay_adapter::ReplayAdapter;
pub use ws_adapter::WsTradeAdapter;

use crate::bus::{Event, EventBus, TradePrint};
use crate::instrument::InstrumentRegistry;
use crate::types::AssetClass;

/// Aggregates N adapters into a single `TradePrint` stream on the bus.
pub struct Provider {
    bus: Arc<EventBus>,
    registry: Arc<InstrumentRegistry>,
    adapters: RwLock<Vec<Arc<dyn Adapter>>>,
}

impl Provider {
    pub fn new(bus: Arc<EventBus>, registry: Arc<InstrumentRegistry>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            adapters: RwLock::new(Vec::new()),
        })
    }

    /// Take exclusive ownership of `adapter`.
    pub fn attach(&self, adapter: Arc<dyn Adapter>) {
        info!(adapter = adapter.name(), "adapter attached");
        self.adapters.write().push(adapter);
    }

    /// Forward a symbol subscription to every attached adapter. Trades from
    /// every adapter are merged by publishing onto the bus as `TradePrint`.
    pub fn subscribe_trades(self: &Arc<Self>, symbols: HashSet<String>) {
        let handler: TradeHandler = {
            let provider = self.clone();
            Arc::new(move |trade: TradePrint| provider.publish_trade(trade))
        };

        for adapter in self.adapters.read().iter() {
            adapter.subscribe_trades(symbols.clone(), handler.clone());
        }
    }

    fn publish_trade(&self, mut trade: TradePrint) {
        let instrument_id = self.registry.register(
            &trade.symbol,
            AssetClass::Crypto,
            "SIM",
            "USD",
            1.0,
        );
        trade.instrument_id = instrument_id;
        self.bus.publish(Event::TradePrint(trade));
    }

    /// Start every attached adapter concurrently.
    pub async fn start_all(&self, duration_seconds: Option<u64>) {
        let adapters: Vec<_> = self.adapters.read().clone();
        let mut handles = Vec::new();

        for adapter in adapters {
            handles.push(tokio::spawn(async move {
                if let Err(e) = adapter.start(duration_seconds).await {
                    error!(adapter = adapter.name(), error = %e, "adapter failed, continuing with remaining adapters");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Stop every attached adapter, in reverse attach order.
    pub async fn stop(&self) {
        let adapters: Vec<_> = self.adapters.read().iter().rev().cloned().collect();
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                error!(adapter = adapter.name(), error = %e, "adapter failed to stop cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Liquidity, OrderType, Side};
    use parking_lot::Mutex;

    fn trade(symbol: &str, price: f64) -> TradePrint {
        TradePrint {
            instrument_id: 0,
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
    async fn attached_adapter_trades_reach_bus_with_registered_instrument_id() {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(InstrumentRegistry::new());
        let provider = Provider::new(bus.clone(), registry.clone());

        let adapter = Arc::new(ReplayAdapter::new("replay", vec![trade("BTCUSD", 100.0)]));
        provider.attach(adapter);

        let mut symbols = HashSet::new();
        symbols.insert("BTCUSD".to_string());
        provider.subscribe_trades(symbols);

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(crate::bus::Topic::TRADE_PRINT, move |event| {
            if let Event::TradePrint(t) = event {
                received2.lock().push(t.clone());
            }
        });

        provider.start_all(None).await;

        let got = received.lock();
        assert_eq!(got.len(), 1);
        assert_ne!(got[0].instrument_id, 0);
        assert_eq!(registry.get_by_symbol("BTCUSD").unwrap().id, got[0].instrument_id);
    }
}
