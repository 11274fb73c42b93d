// =============================================================================
// Adapter — capability set consumed by the Provider
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::TradePrint;
use crate::types::Source;

/// A handler invoked by an adapter for each normalized trade it produces.
pub type TradeHandler = Arc<dyn Fn(TradePrint) + Send + Sync>;

/// A source of market data the Provider can attach.
///
/// Adapters may throw on connect/parse; the Provider logs and continues with
/// its remaining adapters rather than aborting the whole attach.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// The source tag this adapter stamps on every trade it emits.
    fn source(&self) -> Source;

    /// Register for a set of symbols; multiple calls accumulate.
    fn subscribe_trades(&self, symbols: HashSet<String>, handler: TradeHandler);

    /// Start emitting previously subscribed trades. `duration_seconds` is an
    /// optional run bound; `None` runs until `stop` is called.
    async fn start(&self, duration_seconds: Option<u64>) -> anyhow::Result<()>;

    /// Stop emitting trades.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Historical candles, if the adapter can supply them. Default: empty.
    async fn get_hist_candles(
        &self,
        _symbol: &str,
        _interval_ms: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<crate::aggregator::Candle>> {
        Ok(Vec::new())
    }
}
