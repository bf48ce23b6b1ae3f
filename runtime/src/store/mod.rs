//! SQLite persistence for raw acquisitions and the normalized tables.
//!
//! One connection guarded by a mutex. Callers that need atomicity across
//! several statements go through [`Database::transaction`]; everything else
//! uses [`Database::with_conn`]. The lock is never held across an `.await`.

pub mod dimensions;
pub mod facts;
pub mod records;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS source_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    data_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    date_code TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    fetched_at TEXT NOT NULL,
    raw_content TEXT NOT NULL DEFAULT '',
    processing_log TEXT NOT NULL DEFAULT '',
    retries INTEGER NOT NULL DEFAULT 0,
    fetch_failed INTEGER NOT NULL DEFAULT 0,
    request_method TEXT NOT NULL DEFAULT '',
    request_url TEXT NOT NULL DEFAULT '',
    request_params TEXT NOT NULL DEFAULT '',
    request_headers TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_source_records_type_status
    ON source_records (data_type, status);
CREATE INDEX IF NOT EXISTS idx_source_records_entity
    ON source_records (entity_id, data_type, fetched_at);

CREATE TABLE IF NOT EXISTS videos (
    aweme_id TEXT PRIMARY KEY,
    aweme_desc TEXT NOT NULL DEFAULT '',
    aweme_cover_url TEXT NOT NULL DEFAULT '',
    aweme_share_url TEXT NOT NULL DEFAULT '',
    aweme_detail_url TEXT NOT NULL DEFAULT '',
    aweme_pub_time TEXT,
    duration_str TEXT NOT NULL DEFAULT '',
    score_str TEXT NOT NULL DEFAULT '',
    blogger_id INTEGER NOT NULL DEFAULT 0,
    goods_id TEXT NOT NULL DEFAULT '',
    play_count_str TEXT NOT NULL DEFAULT '',
    like_count_str TEXT NOT NULL DEFAULT '',
    comment_count_str TEXT NOT NULL DEFAULT '',
    share_count_str TEXT NOT NULL DEFAULT '',
    collect_count_str TEXT NOT NULL DEFAULT '',
    interaction_rate_str TEXT NOT NULL DEFAULT '',
    like_comment_rate_str TEXT NOT NULL DEFAULT '',
    sales_gmv_str TEXT NOT NULL DEFAULT '',
    sales_count_str TEXT NOT NULL DEFAULT '',
    goods_count_str TEXT NOT NULL DEFAULT '',
    gpm_str TEXT NOT NULL DEFAULT '',
    aweme_type INTEGER NOT NULL DEFAULT 0,
    summary_updated_at TEXT,
    trend_updated_at TEXT,
    collection_status INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_videos_pub_time ON videos (aweme_pub_time);

CREATE TABLE IF NOT EXISTS bloggers (
    blogger_id INTEGER PRIMARY KEY,
    blogger_uid TEXT NOT NULL DEFAULT '',
    blogger_name TEXT NOT NULL DEFAULT '',
    blogger_avatar TEXT NOT NULL DEFAULT '',
    fans_num INTEGER NOT NULL DEFAULT 0,
    tag TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    goods_id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    cover_url TEXT NOT NULL DEFAULT '',
    price_range TEXT NOT NULL DEFAULT '',
    price REAL NOT NULL DEFAULT 0,
    cos_ratio TEXT NOT NULL DEFAULT '',
    commission_price TEXT NOT NULL DEFAULT '',
    shop_name TEXT NOT NULL DEFAULT '',
    brand_name TEXT NOT NULL DEFAULT '',
    category_names TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rank_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aweme_id TEXT NOT NULL,
    period_type TEXT NOT NULL,
    rank_date TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    rank_num INTEGER NOT NULL,
    blogger_id INTEGER NOT NULL DEFAULT 0,
    goods_id TEXT NOT NULL DEFAULT '',
    sales_count_str TEXT NOT NULL DEFAULT '',
    total_sales_str TEXT NOT NULL DEFAULT '',
    like_count_inc_str TEXT NOT NULL DEFAULT '',
    play_count_inc_str TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    UNIQUE (aweme_id, period_type, rank_date)
);

CREATE TABLE IF NOT EXISTS trend_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aweme_id TEXT NOT NULL,
    date_code INTEGER NOT NULL,
    like_count INTEGER NOT NULL DEFAULT 0,
    like_count_str TEXT NOT NULL DEFAULT '',
    share_count INTEGER NOT NULL DEFAULT 0,
    share_count_str TEXT NOT NULL DEFAULT '',
    comment_count INTEGER NOT NULL DEFAULT 0,
    comment_count_str TEXT NOT NULL DEFAULT '',
    collect_count INTEGER NOT NULL DEFAULT 0,
    collect_count_str TEXT NOT NULL DEFAULT '',
    interaction_rate REAL NOT NULL DEFAULT 0,
    interaction_rate_str TEXT NOT NULL DEFAULT '',
    sales_count INTEGER NOT NULL DEFAULT 0,
    sales_count_str TEXT NOT NULL DEFAULT '',
    sales_gmv REAL NOT NULL DEFAULT 0,
    sales_gmv_str TEXT NOT NULL DEFAULT '',
    fans INTEGER NOT NULL DEFAULT 0,
    fans_str TEXT NOT NULL DEFAULT '',
    gpm REAL NOT NULL DEFAULT 0,
    gpm_str TEXT NOT NULL DEFAULT '',
    inc_like_count INTEGER NOT NULL DEFAULT 0,
    inc_share_count INTEGER NOT NULL DEFAULT 0,
    inc_comment_count INTEGER NOT NULL DEFAULT 0,
    inc_collect_count INTEGER NOT NULL DEFAULT 0,
    inc_sales_count INTEGER NOT NULL DEFAULT 0,
    inc_sales_gmv REAL NOT NULL DEFAULT 0,
    inc_fans INTEGER NOT NULL DEFAULT 0,
    list_time_str TEXT NOT NULL DEFAULT '',
    time_stamp INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
-- Deliberately not UNIQUE: writers replace rows via delete-then-insert.
CREATE INDEX IF NOT EXISTS idx_trend_facts_key ON trend_facts (aweme_id, date_code);
";

/// Fixed-width UTC timestamp so lexical order equals time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Shared SQLite handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open in-memory database")?)
    }

    /// Default location: `~/.rankharvest/harvest.db`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".rankharvest")
            .join("harvest.db")
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to apply schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Run `f` inside one transaction; commits only when `f` succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("failed to begin transaction")?;
        let out = f(&tx)?;
        tx.commit().context("failed to commit transaction")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harvest.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        let tables: i64 = db
            .with_conn(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO bloggers (blogger_id, created_at, updated_at) VALUES (1, 'x', 'x')",
                [],
            )?;
            anyhow::bail!("abort");
        });
        assert!(result.is_err());
        let count: i64 = db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM bloggers", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = timestamp(DateTime::parse_from_rfc3339("2025-07-15T09:00:00Z").unwrap().into());
        let b = timestamp(DateTime::parse_from_rfc3339("2025-07-15T10:00:00.5Z").unwrap().into());
        assert!(a < b);
        assert_eq!(a, "2025-07-15T09:00:00.000Z");
        assert_eq!(parse_timestamp(&a).map(timestamp), Some(a));
    }
}
