// =============================================================================
// Schema & migrations
// =============================================================================
//
// A single-row `schema_version` table governs migrations. Startup ensures the
// schema is at or above `CURRENT_VERSION`, creating tables/indexes if absent.
// Migrations are additive only.
// =============================================================================

use rusqlite::Connection;

pub const CURRENT_VERSION: i64 = 1;

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();

    match version {
        None => {
            create_v1(conn)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [CURRENT_VERSION])?;
        }
        Some(v) if v < CURRENT_VERSION => {
            // Additive-only migrations would be applied here in ascending
            // order; there is only one version so far.
            conn.execute("UPDATE schema_version SET version = ?1", [CURRENT_VERSION])?;
        }
        _ => {}
    }

    Ok(())
}

fn create_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS candles (
            symbol TEXT NOT NULL,
            resolution_ms INTEGER NOT NULL,
            open_time_ms INTEGER NOT NULL,
            source TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            trade_count INTEGER NOT NULL DEFAULT 0,
            ingestion_time INTEGER NOT NULL,
            PRIMARY KEY (symbol, resolution_ms, open_time_ms, source)
        );
        CREATE INDEX IF NOT EXISTS idx_candles_symbol_resolution_time
            ON candles (symbol, resolution_ms, open_time_ms);

        CREATE TABLE IF NOT EXISTS events (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            source TEXT NOT NULL,
            data_json TEXT NOT NULL,
            ingestion_time INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_symbol_time ON events (symbol, timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_events_type_symbol ON events (event_type, symbol);
        ",
    )
}
