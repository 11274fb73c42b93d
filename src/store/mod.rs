// =============================================================================
// Candle / Event Store — durable writes with buffering and an LRU read cache
// =============================================================================
//
// Write path: `add_candle` / `add_event` push into an in-memory buffer under
// `buffer_mutex`. A buffer crossing its configured threshold, an explicit
// `flush`, or more than the configured flush interval elapsed since the last
// flush with at least one item pending, drains the buffer in a single
// transaction under `store_mutex`. On failure the transaction is rolled back
// and the batch is retried once inline; persistent failure is fatal.
//
// Read path: `query_candles` / `query_events` consult the LRU cache under
// `cache_mutex` first; on miss, the relevant slice is loaded from durable
// storage, the cache is populated, and the filtered subset is returned.
//
// Lock acquisition order is always `buffer -> db -> cache`, matching the
// concurrency model this store implements.
// =============================================================================

pub mod cache;
pub mod schema;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::aggregator::Candle;
use crate::error::{EngineError, Result as EngineResult};
use crate::types::Source;
use cache::LruCache;

/// An append-only lifecycle event persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_type: String,
    pub event_time_ms: i64,
    pub symbol: String,
    pub source: Source,
    pub payload: serde_json::Value,
}

struct Buffers {
    candles: Vec<Candle>,
    events: Vec<StoredEvent>,
    last_flush: Instant,
}

struct Caches {
    // (symbol, resolution_ms) -> every candle for that pair, ascending time.
    candles: LruCache<(String, i64), Arc<Vec<Candle>>>,
    // (symbol, start_ms, end_ms) -> the matching events.
    events: LruCache<(String, i64, i64), Arc<Vec<StoredEvent>>>,
}

pub struct Store {
    conn: Mutex<Connection>,
    buffers: Mutex<Buffers>,
    caches: Mutex<Caches>,
    candle_buffer_size: usize,
    event_buffer_size: usize,
    flush_interval: Duration,
}

impl Store {
    pub fn open(
        db_path: &str,
        candle_buffer_size: usize,
        event_buffer_size: usize,
        candle_cache_size: usize,
        event_cache_size: usize,
        flush_interval_secs: u64,
    ) -> EngineResult<Arc<Self>> {
        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Fatal(format!("failed to open store database {db_path}: {e}")))?;
        schema::ensure_schema(&conn)
            .map_err(|e| EngineError::Fatal(format!("failed to migrate store schema: {e}")))?;

        info!(db_path, "store opened");

        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            buffers: Mutex::new(Buffers {
                candles: Vec::new(),
                events: Vec::new(),
                last_flush: Instant::now(),
            }),
            caches: Mutex::new(Caches {
                candles: LruCache::new(candle_cache_size),
                events: LruCache::new(event_cache_size),
            }),
            candle_buffer_size,
            event_buffer_size,
            flush_interval: Duration::from_secs(flush_interval_secs),
        }))
    }

    /// Queue a candle for durable persistence.
    pub fn add_candle(&self, candle: Candle) {
        let due = {
            let mut buffers = self.buffers.lock();
            buffers.candles.push(candle);
            buffers.candles.len() >= self.candle_buffer_size
        };
        if due {
            self.flush_candles();
        }
    }

    /// Queue an event for durable persistence.
    pub fn add_event(&self, event: StoredEvent) {
        let due = {
            let mut buffers = self.buffers.lock();
            buffers.events.push(event);
            buffers.events.len() >= self.event_buffer_size
        };
        if due {
            self.flush_events();
        }
    }

    /// Flush both buffers unconditionally.
    pub fn flush_all(&self) {
        self.flush_candles();
        self.flush_events();
    }

    /// Called by the flusher loop: flush whichever buffers have pending data
    /// and have not been flushed within the configured flush interval.
    pub fn flush_if_due(&self) {
        let due = {
            let buffers = self.buffers.lock();
            (!buffers.candles.is_empty() || !buffers.events.is_empty())
                && buffers.last_flush.elapsed() >= self.flush_interval
        };
        if due {
            self.flush_all();
        }
    }

    fn flush_candles(&self) {
        let batch = {
            let mut buffers = self.buffers.lock();
            if buffers.candles.is_empty() {
                return;
            }
            std::mem::take(&mut buffers.candles)
        };

        match self.write_candles(&batch) {
            Ok(()) => {
                let mut buffers = self.buffers.lock();
                buffers.last_flush = Instant::now();
                self.invalidate_candle_cache(&batch);
            }
            Err(e) => {
                warn!(error = %e, count = batch.len(), "candle batch write failed, retrying once");
                if let Err(e2) = self.write_candles(&batch) {
                    error!(error = %e2, count = batch.len(), "candle batch write failed on retry, preserving in buffer");
                    let mut buffers = self.buffers.lock();
                    let mut restored = batch;
                    restored.append(&mut buffers.candles);
                    buffers.candles = restored;
                } else {
                    let mut buffers = self.buffers.lock();
                    buffers.last_flush = Instant::now();
                    self.invalidate_candle_cache(&batch);
                }
            }
        }
    }

    fn flush_events(&self) {
        let batch = {
            let mut buffers = self.buffers.lock();
            if buffers.events.is_empty() {
                return;
            }
            std::mem::take(&mut buffers.events)
        };

        match self.write_events(&batch) {
            Ok(()) => {
                let mut buffers = self.buffers.lock();
                buffers.last_flush = Instant::now();
                self.invalidate_event_cache();
            }
            Err(e) => {
                warn!(error = %e, count = batch.len(), "event batch write failed, retrying once");
                if let Err(e2) = self.write_events(&batch) {
                    error!(error = %e2, count = batch.len(), "event batch write failed on retry, preserving in buffer");
                    let mut buffers = self.buffers.lock();
                    let mut restored = batch;
                    restored.append(&mut buffers.events);
                    buffers.events = restored;
                } else {
                    let mut buffers = self.buffers.lock();
                    buffers.last_flush = Instant::now();
                    self.invalidate_event_cache();
                }
            }
        }
    }

    fn write_candles(&self, batch: &[Candle]) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_ms();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO candles
                    (symbol, resolution_ms, open_time_ms, source, open, high, low, close, volume, trade_count, ingestion_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
                 ON CONFLICT(symbol, resolution_ms, open_time_ms, source) DO UPDATE SET
                    open=excluded.open, high=excluded.high, low=excluded.low,
                    close=excluded.close, volume=excluded.volume, ingestion_time=excluded.ingestion_time",
            )?;
            for c in batch {
                stmt.execute(params![
                    c.symbol,
                    c.resolution_ms,
                    c.open_time_ms,
                    c.source.to_string(),
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                    now,
                ])?;
            }
        }
        tx.commit()
    }

    fn write_events(&self, batch: &[StoredEvent]) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_ms();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (event_type, timestamp_ms, symbol, source, data_json, ingestion_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in batch {
                stmt.execute(params![
                    e.event_type,
                    e.event_time_ms,
                    e.symbol,
                    e.source.to_string(),
                    e.payload.to_string(),
                    now,
                ])?;
            }
        }
        tx.commit()
    }

    /// Candles with `open_time_ms in [start_ms, end_ms]`, ascending.
    pub fn query_candles(
        &self,
        symbol: &str,
        resolution_ms: i64,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<Candle> {
        let key = (symbol.to_string(), resolution_ms);

        let full: Arc<Vec<Candle>> = {
            let mut caches = self.caches.lock();
            if let Some(hit) = caches.candles.get(&key) {
                hit
            } else {
                drop(caches);
                let loaded = Arc::new(self.load_candles(symbol, resolution_ms));
                let mut caches = self.caches.lock();
                caches.candles.put(key, loaded.clone());
                loaded
            }
        };

        full.iter()
            .filter(|c| c.open_time_ms >= start_ms && c.open_time_ms <= end_ms)
            .cloned()
            .collect()
    }

    fn load_candles(&self, symbol: &str, resolution_ms: i64) -> Vec<Candle> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(
            "SELECT symbol, resolution_ms, open_time_ms, source, open, high, low, close, volume
             FROM candles WHERE symbol = ?1 AND resolution_ms = ?2 ORDER BY open_time_ms ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to prepare candle query");
                return Vec::new();
            }
        };

        let rows = stmt.query_map(params![symbol, resolution_ms], |row| {
            let source_str: String = row.get(3)?;
            Ok(Candle {
                symbol: row.get(0)?,
                resolution_ms: row.get(1)?,
                open_time_ms: row.get(2)?,
                source: source_str.parse().unwrap_or(Source::Backtest),
                open: row.get(4)?,
                high: row.get(5)?,
                low: row.get(6)?,
                close: row.get(7)?,
                volume: row.get(8)?,
            })
        });

        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(e) => {
                error!(error = %e, "failed to run candle query");
                Vec::new()
            }
        }
    }

    /// Events in `[start_ms, end_ms]`, optionally filtered by type, ascending.
    pub fn query_events(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        types: Option<&[String]>,
    ) -> Vec<StoredEvent> {
        let key = (symbol.to_string(), start_ms, end_ms);

        let full: Arc<Vec<StoredEvent>> = {
            let mut caches = self.caches.lock();
            if let Some(hit) = caches.events.get(&key) {
                hit
            } else {
                drop(caches);
                let loaded = Arc::new(self.load_events(symbol, start_ms, end_ms));
                let mut caches = self.caches.lock();
                caches.events.put(key, loaded.clone());
                loaded
            }
        };

        full.iter()
            .filter(|e| match types {
                Some(allowed) => allowed.iter().any(|t| t == &e.event_type),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn load_events(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Vec<StoredEvent> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(
            "SELECT event_type, timestamp_ms, symbol, source, data_json
             FROM events WHERE symbol = ?1 AND timestamp_ms BETWEEN ?2 AND ?3
             ORDER BY timestamp_ms ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to prepare event query");
                return Vec::new();
            }
        };

        let rows = stmt.query_map(params![symbol, start_ms, end_ms], |row| {
            let source_str: String = row.get(3)?;
            let data_json: String = row.get(4)?;
            Ok(StoredEvent {
                event_type: row.get(0)?,
                event_time_ms: row.get(1)?,
                symbol: row.get(2)?,
                source: source_str.parse().unwrap_or(Source::Backtest),
                payload: serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null),
            })
        });

        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(e) => {
                error!(error = %e, "failed to run event query");
                Vec::new()
            }
        }
    }

    /// Most recent timestamp across candles and events stored for `symbol`,
    /// or `None` if neither table has a row for it.
    pub fn max_event_time_ms(&self, symbol: &str) -> Option<i64> {
        let conn = self.conn.lock();

        let max_candle: Option<i64> = conn
            .query_row(
                "SELECT MAX(open_time_ms) FROM candles WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .unwrap_or(None);

        let max_event: Option<i64> = conn
            .query_row(
                "SELECT MAX(timestamp_ms) FROM events WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .unwrap_or(None);

        match (max_candle, max_event) {
            (Some(c), Some(e)) => Some(c.max(e)),
            (Some(c), None) => Some(c),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }

    fn invalidate_candle_cache(&self, _batch: &[Candle]) {
        // Clearing the whole cache (rather than patching affected keys) keeps
        // this correct without re-entering the db lock while holding the
        // cache lock; candle flushes are infrequent relative to reads.
        self.caches.lock().candles.clear();
    }

    fn invalidate_event_cache(&self) {
        self.caches.lock().events.clear();
    }

    /// Drop all buffered and cached state and delete all durable rows.
    pub fn clear_all(&self) {
        {
            let mut buffers = self.buffers.lock();
            buffers.candles.clear();
            buffers.events.clear();
        }
        {
            let conn = self.conn.lock();
            let _ = conn.execute("DELETE FROM candles", []);
            let _ = conn.execute("DELETE FROM events", []);
        }
        {
            let mut caches = self.caches.lock();
            caches.candles.clear();
            caches.events.clear();
        }
    }

    /// Spawn the background timer that flushes buffers every configured
    /// flush interval when there is pending data. Optional: an explicit
    /// threshold crossing or `flush_all` call flushes inline regardless of
    /// this loop.
    pub fn spawn_flusher(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let flush_interval = self.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(store) => store.flush_if_due(),
                    None => break,
                }
            }
        });
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
