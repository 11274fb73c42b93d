// =============================================================================
// Instrument Registry — bidirectional symbol <-> id mapping
// =============================================================================
//
// `register` is idempotent on symbol: calling it twice for the same symbol
// returns the existing id rather than minting a new one. Lookups never fail
// the caller — a miss returns `None`, not an error. id and symbol are
// immutable once assigned; only the metadata map may be updated post-hoc.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::AssetClass;

/// A registered tradable instrument. `id` and `symbol` never change after
/// creation; `metadata` may be updated post-hoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: u64,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub exchange: String,
    pub currency: String,
    pub multiplier: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Process-wide symbol registry, owned by the Provider.
pub struct InstrumentRegistry {
    by_id: RwLock<HashMap<u64, Instrument>>,
    by_symbol: RwLock<HashMap<String, u64>>,
    next_id: AtomicU64,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_symbol: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `symbol`, returning its id. Idempotent: a symbol already
    /// known returns the existing id unchanged, ignoring the new metadata.
    pub fn register(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        exchange: &str,
        currency: &str,
        multiplier: f64,
    ) -> u64 {
        if let Some(&id) = self.by_symbol.read().get(symbol) {
            return id;
        }

        let mut by_symbol = self.by_symbol.write();
        // Re-check under the write lock: another thread may have registered
        // the same symbol between the read-lock miss above and this lock.
        if let Some(&id) = by_symbol.get(symbol) {
            return id;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let instrument = Instrument {
            id,
            symbol: symbol.to_string(),
            asset_class,
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            multiplier,
            metadata: HashMap::new(),
        };

        by_symbol.insert(symbol.to_string(), id);
        self.by_id.write().insert(id, instrument);

        info!(id, symbol, %asset_class, exchange, currency, "instrument registered");
        id
    }

    /// Look up an instrument by id. Returns `None` on a miss.
    pub fn get_by_id(&self, id: u64) -> Option<Instrument> {
        self.by_id.read().get(&id).cloned()
    }

    /// Look up an instrument by symbol. Returns `None` on a miss.
    pub fn get_by_symbol(&self, symbol: &str) -> Option<Instrument> {
        let id = *self.by_symbol.read().get(symbol)?;
        self.get_by_id(id)
    }

    /// Resolve a symbol to its id without fetching the full instrument.
    pub fn id_of(&self, symbol: &str) -> Option<u64> {
        self.by_symbol.read().get(symbol).copied()
    }

    /// Merge `entries` into an instrument's metadata. No-op on a miss.
    pub fn update_metadata(&self, id: u64, entries: HashMap<String, String>) {
        if let Some(instrument) = self.by_id.write().get_mut(&id) {
            instrument.metadata.extend(entries);
        }
    }

    /// Snapshot of every registered instrument.
    pub fn all(&self) -> Vec<Instrument> {
        self.by_id.read().values().cloned().collect()
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InstrumentRegistry {
        InstrumentRegistry::new()
    }

    #[test]
    fn register_is_idempotent_on_symbol() {
        let reg = registry();
        let id1 = reg.register("BTCUSD", AssetClass::Crypto, "SIM", "USD", 1.0);
        let id2 = reg.register("BTCUSD", AssetClass::Crypto, "SIM", "USD", 1.0);
        assert_eq!(id1, id2);
        assert_eq!(reg.all().len(), 1);
    }

    #[test]
    fn distinct_symbols_get_distinct_ids() {
        let reg = registry();
        let btc = reg.register("BTCUSD", AssetClass::Crypto, "SIM", "USD", 1.0);
        let eth = reg.register("ETHUSD", AssetClass::Crypto, "SIM", "USD", 1.0);
        assert_ne!(btc, eth);
    }

    #[test]
    fn lookup_miss_returns_none_not_error() {
        let reg = registry();
        assert!(reg.get_by_id(999).is_none());
        assert!(reg.get_by_symbol("NOPE").is_none());
    }

    #[test]
    fn metadata_updates_post_hoc_without_touching_identity() {
        let reg = registry();
        let id = reg.register("BTCUSD", AssetClass::Crypto, "SIM", "USD", 1.0);

        let mut extra = HashMap::new();
        extra.insert("tier".to_string(), "major".to_string());
        reg.update_metadata(id, extra);

        let instrument = reg.get_by_symbol("BTCUSD").unwrap();
        assert_eq!(instrument.id, id);
        assert_eq!(instrument.symbol, "BTCUSD");
        assert_eq!(instrument.metadata.get("tier").unwrap(), "major");
    }
}
