use crate::models::{Direction, StockChangeRecord};
use anyhow::{anyhow, Context, Result};
use duckdb::{params, Connection};
use std::path::Path;
use tracing::{debug, info, trace, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

pub const STOCK_CHANGES: &str = "StockChanges";

const DDL: &str = r#"
CREATE TABLE StockChanges (
    "Date"      VARCHAR NOT NULL,   -- YYYY-MM-DD HH:MM:SS, one per run
    "Symbol"    VARCHAR NOT NULL,
    "UpDown"    INTEGER NOT NULL,   -- 1 up, -1 down, 0 flat
    "Change"    VARCHAR NOT NULL,   -- raw text, e.g. +1.23%
    PRIMARY KEY ("Date", "Symbol", "UpDown", "Change")
);
"#;

// ── Store ─────────────────────────────────────────────────────────────────────

/// Append-only store of change records.
///
/// Holding a `RecordStore` means the connection is open and the schema is in
/// place. The connection is released by [`RecordStore::close`] or, on any
/// other exit path, when the value is dropped.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Connect to the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Could not create dir {:?}", parent))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        debug!("Opened store at {:?}", path);

        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.initialize()?;
        Ok(store)
    }

    /// Create `StockChanges` unless it is already there.
    ///
    /// A table that exists up front, or that appears while we were creating it,
    /// is logged and accepted.
    pub fn initialize(&self) -> Result<()> {
        if self.exists(STOCK_CHANGES)? {
            info!("Table {} already exists", STOCK_CHANGES);
            return Ok(());
        }

        match self.conn.execute_batch(DDL) {
            Ok(()) => {
                info!("Created table {}", STOCK_CHANGES);
                Ok(())
            }
            Err(e) if self.exists(STOCK_CHANGES).unwrap_or(false) => {
                warn!("Table {} created concurrently: {}", STOCK_CHANGES, e);
                Ok(())
            }
            Err(e) => Err(e).context("DDL failed"),
        }
    }

    /// Whether a table called `table_name` is present (case-insensitive).
    pub fn exists(&self, table_name: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT COUNT(*) FROM information_schema.tables WHERE lower(table_name) = lower(?)",
        )?;
        let n: i64 = stmt.query_row(params![table_name], |r| r.get(0))?;
        Ok(n > 0)
    }

    /// Insert one record; a record with the same key is silently kept as is.
    ///
    /// Runs in autocommit mode, so the row is durable when this returns.
    /// Returns `true` if a new row was written.
    pub fn insert(&self, record: &StockChangeRecord) -> Result<bool> {
        let n = self
            .conn
            .execute(
                r#"INSERT OR IGNORE INTO StockChanges ("Date", "Symbol", "UpDown", "Change")
                   VALUES (?, ?, ?, ?)"#,
                params![
                    record.date,
                    record.symbol,
                    record.direction.as_i32(),
                    record.change,
                ],
            )
            .with_context(|| format!("insert {} {}", record.symbol, record.date))?;

        if n == 0 {
            trace!("{} {}: already stored", record.symbol, record.date);
        }
        Ok(n > 0)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM StockChanges")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn records(&self) -> Result<Vec<StockChangeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT "Date", "Symbol", "UpDown", "Change" FROM StockChanges
               ORDER BY "Date", "Symbol""#,
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i32>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(date, symbol, up_down, change)| {
                let direction = Direction::try_from(up_down)
                    .map_err(|v| anyhow!("bad UpDown {} for {} {}", v, symbol, date))?;
                Ok(StockChangeRecord { date, symbol, direction, change })
            })
            .collect()
    }

    pub fn symbols(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(r#"SELECT DISTINCT "Symbol" FROM StockChanges ORDER BY "Symbol""#)?;
        let syms = stmt
            .query_map([], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(syms)
    }

    pub fn date_range(&self) -> Result<(Option<String>, Option<String>)> {
        let mut s = self
            .conn
            .prepare(r#"SELECT MIN("Date"), MAX("Date") FROM StockChanges"#)?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    /// Release the connection now and surface any error doing so.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow!(e))
            .context("Failed to close DuckDB")?;
        debug!("Store closed");
        Ok(())
    }
}
