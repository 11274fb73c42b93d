// =============================================================================
// Strategy — pluggable trading logic consumed by the Engine
// =============================================================================
//
// Single-threaded from the Engine's perspective: the Engine never calls these
// methods concurrently. `on_price_tick` and `get_trade_action` are always
// called back-to-back for the same tick.
// =============================================================================

pub mod reference;

pub use reference::ReferenceStrategy;

/// A trade decision produced in response to one price tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    None,
    Buy,
    Sell,
}

/// One normalized price observation handed to the strategy.
#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub price: f64,
    pub event_time: i64,
}

/// Pluggable decision logic. The Engine owns exactly one strategy instance
/// per run and drives it from the dispatch thread only.
pub trait Strategy: Send {
    /// Called once per trade; the strategy updates any internal state.
    fn on_price_tick(&mut self, symbol: &str, tick: PriceTick);

    /// Called immediately after `on_price_tick` for the same event.
    fn get_trade_action(&mut self, symbol: &str) -> TradeAction;

    /// Called after a non-zero fill.
    fn on_order_fill(&mut self, symbol: &str, filled_qty: f64, fill_price: f64, side: crate::types::Side);

    /// Net position the strategy believes it holds. Optional; default 0.
    fn get_net_position(&self, _symbol: &str) -> f64 {
        0.0
    }
}
