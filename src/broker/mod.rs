// =============================================================================
// Broker / Order State Machine
// =============================================================================
//
// Owns cash, per-symbol positions, and the next order id. All state mutation
// for a single submission happens under one lock acquisition so that
// `OrderPlaced` publishes strictly before `OrderFilled`/`OrderRejected` for
// that order, and so concurrent submissions never interleave their effects.
//
// The broker's price source is the latest `TradePrint` observed per symbol,
// via its own bus subscription — this realizes `market = limit_price` for
// the reference implementation: a limit submitted at the prevailing trade
// price fills deterministically on the same call.
// =============================================================================

pub mod position;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use position::Position;

use crate::bus::{
    Event, EventBus, OrderFilled, OrderPlaced, OrderRejected, PositionUpdated, Topic,
};
use crate::types::{OrderStatus, Side};

/// An order submitted to the broker. `id` is assigned at submission and is
/// unique and monotonically increasing within a run. Terminal statuses
/// (`Filled`, `Canceled`, `Rejected`) never transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub qty: f64,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub fill_price: f64,
    pub rejection_reason: Option<String>,
    pub submission_time: i64,
    pub event_time: i64,
}

const INSUFFICIENT_BALANCE: &str = "Insufficient balance";
const NO_POSITION_TO_SELL: &str = "No position to sell";

/// Cash, positions, and order history for one run.
pub struct Broker {
    bus: Arc<EventBus>,
    balance: RwLock<f64>,
    positions: RwLock<HashMap<String, Position>>,
    orders: RwLock<Vec<Order>>,
    next_order_id: AtomicU64,
    last_price: RwLock<HashMap<String, f64>>,
}

impl Broker {
    pub fn new(bus: Arc<EventBus>, starting_balance: f64) -> Arc<Self> {
        let broker = Arc::new(Self {
            bus: bus.clone(),
            balance: RwLock::new(starting_balance),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            last_price: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&broker);
        bus.subscribe(Topic::TRADE_PRINT, move |event| {
            if let (Some(broker), Event::TradePrint(trade)) = (weak.upgrade(), event) {
                broker
                    .last_price
                    .write()
                    .insert(trade.symbol.clone(), trade.price);
            }
        });

        broker
    }

    fn market_price(&self, symbol: &str) -> Option<f64> {
        self.last_price.read().get(symbol).copied()
    }

    /// Execute at the broker's current market price. Deterministic same-call
    /// completion: returns the quantity actually filled.
    pub fn place_market_order(&self, symbol: &str, qty: f64, side: Side, event_time: i64) -> f64 {
        let price = self.market_price(symbol).unwrap_or(0.0);
        self.submit(symbol, qty, side, price, event_time)
    }

    /// Execute iff `(Buy && market <= limit) || (Sell && market >= limit)`.
    /// The reference implementation treats `market = limit_price`, so every
    /// in-budget submission fills on this call.
    pub fn place_limit_order(
        &self,
        symbol: &str,
        qty: f64,
        side: Side,
        limit_price: f64,
        event_time: i64,
    ) -> f64 {
        self.submit(symbol, qty, side, limit_price, event_time)
    }

    fn submit(&self, symbol: &str, qty: f64, side: Side, price: f64, event_time: i64) -> f64 {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);

        let mut order = Order {
            id,
            symbol: symbol.to_string(),
            qty,
            side,
            status: OrderStatus::Working,
            filled_qty: 0.0,
            fill_price: 0.0,
            rejection_reason: None,
            submission_time: event_time,
            event_time,
        };

        self.bus.publish(Event::OrderPlaced(OrderPlaced {
            order_id: id,
            symbol: symbol.to_string(),
            qty,
            side,
            limit_price: price,
            event_time,
        }));

        let filled_qty = match side {
            Side::Buy => self.execute_buy(&mut order, price, event_time),
            Side::Sell => self.execute_sell(&mut order, price, event_time),
            Side::Unknown => {
                order.status = OrderStatus::Rejected;
                order.rejection_reason = Some("Unknown side".to_string());
                self.publish_rejected(&order, event_time);
                0.0
            }
        };

        self.orders.write().push(order);
        filled_qty
    }

    fn execute_buy(&self, order: &mut Order, price: f64, event_time: i64) -> f64 {
        let cost = order.qty * price;
        let mut balance = self.balance.write();

        if *balance < cost {
            order.status = OrderStatus::Rejected;
            order.rejection_reason = Some(INSUFFICIENT_BALANCE.to_string());
            drop(balance);
            self.publish_rejected(order, event_time);
            return 0.0;
        }

        *balance -= cost;
        drop(balance);

        let mut positions = self.positions.write();
        let entry = positions.entry(order.symbol.clone()).or_default();
        *entry = entry.apply_buy_fill(order.qty, price);
        let updated = *entry;
        drop(positions);

        order.status = OrderStatus::Filled;
        order.filled_qty = order.qty;
        order.fill_price = price;

        self.publish_filled(order, event_time);
        self.publish_position_updated(&order.symbol, updated, event_time);

        info!(order_id = order.id, symbol = %order.symbol, qty = order.qty, price, "buy order filled");
        order.qty
    }

    fn execute_sell(&self, order: &mut Order, price: f64, event_time: i64) -> f64 {
        let mut positions = self.positions.write();
        let current = positions.get(&order.symbol).copied().unwrap_or_default();

        if current.qty <= 0.0 {
            drop(positions);
            order.status = OrderStatus::Rejected;
            order.rejection_reason = Some(NO_POSITION_TO_SELL.to_string());
            self.publish_rejected(order, event_time);
            return 0.0;
        }

        let qty_to_fill = current.qty;
        let closed = current.apply_full_sell_fill();
        positions.insert(order.symbol.clone(), closed);
        drop(positions);

        *self.balance.write() += qty_to_fill * price;

        order.status = OrderStatus::Filled;
        order.filled_qty = qty_to_fill;
        order.fill_price = price;

        self.publish_filled(order, event_time);
        self.publish_position_updated(&order.symbol, closed, event_time);

        info!(order_id = order.id, symbol = %order.symbol, qty = qty_to_fill, price, "sell order filled");
        qty_to_fill
    }

    fn publish_filled(&self, order: &Order, event_time: i64) {
        self.bus.publish(Event::OrderFilled(OrderFilled {
            order_id: order.id,
            symbol: order.symbol.clone(),
            filled_qty: order.filled_qty,
            fill_price: order.fill_price,
            side: order.side,
            status: order.status,
            event_time,
        }));
    }

    fn publish_rejected(&self, order: &Order, event_time: i64) {
        warn!(order_id = order.id, symbol = %order.symbol, reason = ?order.rejection_reason, "order rejected");
        self.bus.publish(Event::OrderRejected(OrderRejected {
            order_id: order.id,
            symbol: order.symbol.clone(),
            qty: order.qty,
            side: order.side,
            reason: order
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            event_time,
        }));
    }

    fn publish_position_updated(&self, symbol: &str, position: Position, event_time: i64) {
        self.bus.publish(Event::PositionUpdated(PositionUpdated {
            symbol: symbol.to_string(),
            qty: position.qty,
            avg_price: position.avg_price,
            event_time,
        }));
    }

    pub fn get_balance(&self) -> f64 {
        *self.balance.read()
    }

    pub fn get_positions(&self) -> HashMap<String, Position> {
        self.positions.read().clone()
    }

    pub fn get_orders(&self) -> Vec<Order> {
        self.orders.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(starting_balance: f64) -> Arc<Broker> {
        Broker::new(Arc::new(EventBus::new()), starting_balance)
    }

    #[test]
    fn e1_buy_fill_happy_path() {
        let b = broker(1_000_000.0);
        let filled = b.place_limit_order("BTCUSD", 0.01, Side::Buy, 600.0, 0);

        assert_eq!(filled, 0.01);
        assert!((b.get_balance() - 999_994.00).abs() < 1e-9);
        let pos = b.get_positions().get("BTCUSD").copied().unwrap();
        assert_eq!(pos.qty, 0.01);
        assert_eq!(pos.avg_price, 600.0);

        let orders = b.get_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
    }

    #[test]
    fn e2_insufficient_balance_rejection() {
        let b = broker(100.0);
        let filled = b.place_limit_order("BTCUSD", 1.0, Side::Buy, 50_000.0, 0);

        assert_eq!(filled, 0.0);
        assert_eq!(b.get_balance(), 100.0);
        assert!(b.get_positions().get("BTCUSD").is_none());

        let orders = b.get_orders();
        assert_eq!(orders[0].status, OrderStatus::Rejected);
        assert_eq!(orders[0].rejection_reason.as_deref(), Some(INSUFFICIENT_BALANCE));
    }

    #[test]
    fn e3_sell_with_no_position_rejection() {
        let b = broker(1_000_000.0);
        let filled = b.place_limit_order("BTCUSD", 1.0, Side::Sell, 50_000.0, 0);

        assert_eq!(filled, 0.0);
        let orders = b.get_orders();
        assert_eq!(orders[0].status, OrderStatus::Rejected);
        assert_eq!(orders[0].rejection_reason.as_deref(), Some(NO_POSITION_TO_SELL));
    }

    #[test]
    fn sell_liquidates_entire_long_at_once() {
        let b = broker(1_000_000.0);
        b.place_limit_order("BTCUSD", 1.0, Side::Buy, 100.0, 0);
        let filled = b.place_limit_order("BTCUSD", 0.4, Side::Sell, 110.0, 1);

        // The entire long liquidates regardless of the requested sell qty.
        assert_eq!(filled, 1.0);
        let pos = b.get_positions().get("BTCUSD").copied().unwrap();
        assert!(pos.is_flat());
        assert!((b.get_balance() - (1_000_000.0 - 100.0 + 110.0)).abs() < 1e-9);
    }

    #[test]
    fn order_placed_precedes_filled_or_rejected() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order2 = order.clone();
        bus.subscribe(Topic::ORDER_PLACED, move |_| order2.lock().push("Placed"));
        let order3 = order.clone();
        bus.subscribe(Topic::ORDER_FILLED, move |_| order3.lock().push("Filled"));
        let order4 = order.clone();
        bus.subscribe(Topic::ORDER_REJECTED, move |_| order4.lock().push("Rejected"));

        let broker = Broker::new(bus, 1_000_000.0);
        broker.place_limit_order("BTCUSD", 0.01, Side::Buy, 600.0, 0);

        assert_eq!(*order.lock(), vec!["Placed", "Filled"]);
    }

    #[test]
    fn order_ids_are_monotonically_increasing() {
        let b = broker(1_000_000.0);
        b.place_limit_order("BTCUSD", 0.01, Side::Buy, 600.0, 0);
        b.place_limit_order("BTCUSD", 0.01, Side::Buy, 600.0, 1);

        let orders = b.get_orders();
        assert_eq!(orders[0].id, 1);
        assert_eq!(orders[1].id, 2);
    }
}
