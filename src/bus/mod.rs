// =============================================================================
// Event Bus — topic-keyed in-process pub/sub
// =============================================================================
//
// Delivery is synchronous on the publisher's call frame; handlers may publish
// further events (reentrant — the subscriber table lock is released before
// invocation, only the snapshot of handlers taken under the lock is used for
// dispatch). No buffering: if no subscriber exists, publish is a no-op.
//
// A handler that panics is caught and logged; it does not abort delivery to
// the remaining handlers of the same publish call. An event handed to a
// handler under the wrong topic (impossible via `publish`, but guarded
// against defensively — see `publish`) is a logged Programmer error, not a
// panic.
// =============================================================================

pub mod event;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, trace, warn};

pub use event::{
    CandleClosed, Event, OrderFilled, OrderPlaced, OrderRejected, PositionUpdated, RunStart,
    Topic, TradePrint,
};

/// Identity returned by `subscribe`, used for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: SubscriberId,
    handler: Handler,
}

/// A topic-keyed in-process event dispatcher.
pub struct EventBus {
    subscribers: RwLock<Vec<(Topic, Vec<Subscription>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `topic`. Multiple handlers per topic are
    /// allowed; insertion order determines delivery order.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriberId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.write();

        let entry = subs.iter_mut().find(|(t, _)| *t == topic);
        let sub = Subscription {
            id,
            handler: Box::new(handler),
        };
        match entry {
            Some((_, handlers)) => handlers.push(sub),
            None => subs.push((topic, vec![sub])),
        }

        trace!(topic = %topic, subscriber = id.0, "subscribed");
        id
    }

    /// Remove a previously registered handler by identity. Returns `true` if
    /// a handler was found and removed.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write();
        let Some((_, handlers)) = subs.iter_mut().find(|(t, _)| *t == topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|s| s.id != id);
        let removed = handlers.len() != before;
        if removed {
            trace!(topic = %topic, subscriber = id.0, "unsubscribed");
        }
        removed
    }

    /// Synchronously invoke every current handler for `event`'s topic, in
    /// registration order. A no-op if no subscriber is registered.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();

        // Snapshot handler pointers under the lock, then release it before
        // invoking any of them — handlers may themselves call `publish`.
        let handlers_len = {
            let subs = self.subscribers.read();
            subs.iter().find(|(t, _)| *t == topic).map(|(_, h)| h.len())
        };

        let Some(len) = handlers_len else {
            return;
        };

        for i in 0..len {
            // Re-acquire the lock per handler rather than hold the guard
            // across invocation, so a handler may itself subscribe/unsubscribe
            // or publish without deadlocking. The handler list may have
            // shrunk (unsubscribe from within a handler); a missing index is
            // simply skipped.
            let result = {
                let subs = self.subscribers.read();
                let handler = subs
                    .iter()
                    .find(|(t, _)| *t == topic)
                    .and_then(|(_, h)| h.get(i))
                    .map(|s| &s.handler);
                handler.map(|h| catch_unwind(AssertUnwindSafe(|| h(&event))))
            };

            if let Some(Err(panic)) = result {
                let msg = panic_message(&panic);
                error!(topic = %topic, subscriber_index = i, error = %msg, "bus handler panicked");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Logged (never panicking) helper for a handler that received an event on a
/// topic it did not expect — a Programmer error per the error taxonomy.
pub fn log_topic_mismatch(expected: Topic, actual: Topic) {
    warn!(expected = %expected, actual = %actual, "bus handler invoked for unexpected topic");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn sample_trade(symbol: &str) -> Event {
        Event::TradePrint(TradePrint {
            instrument_id: 1,
            symbol: symbol.to_string(),
            price: 100.0,
            qty: 1.0,
            event_time: 0,
            side: crate::types::Side::Buy,
            order_type: crate::types::OrderType::Market,
            liquidity: crate::types::Liquidity::Taker,
            metadata: Default::default(),
        })
    }

    #[test]
    fn publish_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(sample_trade("BTCUSD"));
    }

    #[test]
    fn handlers_invoked_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            bus.subscribe(Topic::TRADE_PRINT, move |_| order.lock().push(i));
        }

        bus.publish(sample_trade("BTCUSD"));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let id = bus.subscribe(Topic::TRADE_PRINT, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_trade("BTCUSD"));
        assert!(bus.unsubscribe(Topic::TRADE_PRINT, id));
        bus.publish(sample_trade("BTCUSD"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_id_returns_false() {
        let bus = EventBus::new();
        bus.subscribe(Topic::TRADE_PRINT, |_| {});
        assert!(!bus.unsubscribe(Topic::TRADE_PRINT, SubscriberId(9999)));
    }

    #[test]
    fn panicking_handler_does_not_abort_remaining_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Topic::TRADE_PRINT, |_| panic!("boom"));

        let count2 = count.clone();
        bus.subscribe(Topic::TRADE_PRINT, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_trade("BTCUSD"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_publish_from_within_a_handler() {
        let bus = Arc::new(EventBus::new());
        let inner_count = Arc::new(AtomicUsize::new(0));

        let inner_count2 = inner_count.clone();
        bus.subscribe(Topic::ORDER_PLACED, move |_| {
            inner_count2.fetch_add(1, Ordering::SeqCst);
        });

        let bus2 = bus.clone();
        bus.subscribe(Topic::TRADE_PRINT, move |_| {
            bus2.publish(Event::OrderPlaced(OrderPlaced {
                order_id: 1,
                symbol: "BTCUSD".into(),
                qty: 1.0,
                side: crate::types::Side::Buy,
                limit_price: 100.0,
                event_time: 0,
            }));
        });

        bus.publish(sample_trade("BTCUSD"));
        assert_eq!(inner_count.load(Ordering::SeqCst), 1);
    }
}
