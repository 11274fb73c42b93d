// =============================================================================
// ReferenceStrategy — deterministic buy-once-then-sell-on-reversal strategy
// =============================================================================
//
// Exists to exercise the Engine -> Broker loop end to end without depending
// on concrete strategy logic (out of scope for the core). On the first tick
// for a symbol it is flat on, it buys; once long, it sells on the first tick
// where price drops below the average entry price. Deterministic and
// side-effect-free beyond its own bookkeeping, so it is safe to drive from
// integration tests.
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use crate::strategy::{PriceTick, Strategy, TradeAction};
use crate::types::Side;

#[derive(Debug, Clone, Copy, Default)]
struct SymbolState {
    net_position: f64,
    avg_entry: f64,
    last_price: f64,
}

#[derive(Debug, Default)]
pub struct ReferenceStrategy {
    state: HashMap<String, SymbolState>,
}

impl ReferenceStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for ReferenceStrategy {
    fn on_price_tick(&mut self, symbol: &str, tick: PriceTick) {
        let entry = self.state.entry(symbol.to_string()).or_default();
        entry.last_price = tick.price;
    }

    fn get_trade_action(&mut self, symbol: &str) -> TradeAction {
        let Some(state) = self.state.get(symbol) else {
            return TradeAction::None;
        };

        if state.net_position <= 0.0 {
            TradeAction::Buy
        } else if state.last_price < state.avg_entry {
            TradeAction::Sell
        } else {
            TradeAction::None
        }
    }

    fn on_order_fill(&mut self, symbol: &str, filled_qty: f64, fill_price: f64, side: Side) {
        let state = self.state.entry(symbol.to_string()).or_default();
        match side {
            Side::Buy => {
                let new_qty = state.net_position + filled_qty;
                state.avg_entry = if new_qty == 0.0 {
                    0.0
                } else {
                    (state.net_position * state.avg_entry + filled_qty * fill_price) / new_qty
                };
                state.net_position = new_qty;
            }
            Side::Sell => {
                state.net_position = 0.0;
                state.avg_entry = 0.0;
            }
            Side::Unknown => {}
        }

        debug!(symbol, net_position = state.net_position, avg_entry = state.avg_entry, "strategy position updated on fill");
    }

    fn get_net_position(&self, symbol: &str) -> f64 {
        self.state.get(symbol).map(|s| s.net_position).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buys_when_flat_then_holds() {
        let mut strategy = ReferenceStrategy::new();
        strategy.on_price_tick("BTCUSD", PriceTick { price: 100.0, event_time: 0 });
        assert_eq!(strategy.get_trade_action("BTCUSD"), TradeAction::Buy);

        strategy.on_order_fill("BTCUSD", 1.0, 100.0, Side::Buy);
        assert_eq!(strategy.get_net_position("BTCUSD"), 1.0);

        strategy.on_price_tick("BTCUSD", PriceTick { price: 110.0, event_time: 1 });
        assert_eq!(strategy.get_trade_action("BTCUSD"), TradeAction::None);
    }

    #[test]
    fn sells_on_price_drop_below_entry() {
        let mut strategy = ReferenceStrategy::new();
        strategy.on_price_tick("BTCUSD", PriceTick { price: 100.0, event_time: 0 });
        strategy.on_order_fill("BTCUSD", 1.0, 100.0, Side::Buy);

        strategy.on_price_tick("BTCUSD", PriceTick { price: 90.0, event_time: 1 });
        assert_eq!(strategy.get_trade_action("BTCUSD"), TradeAction::Sell);

        strategy.on_order_fill("BTCUSD", 1.0, 90.0, Side::Sell);
        assert_eq!(strategy.get_net_position("BTCUSD"), 0.0);
    }

    #[test]
    fn unknown_symbol_with_no_tick_yields_no_action() {
        let mut strategy = ReferenceStrategy::new();
        assert_eq!(strategy.get_trade_action("NOPE"), TradeAction::None);
    }
}
