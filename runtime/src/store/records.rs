//! Raw acquisition records.
//!
//! Every fetch attempt lands here, successful or not. A record starts
//! `Unprocessed` and is closed exactly once by the ETL layer; updates are
//! guarded by `status = 0` so a terminal record can never be rewritten.

use super::{parse_timestamp, timestamp, Database};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provider tag written on every record.
pub const PROVIDER: &str = "FEIGUA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Unprocessed,
    Processed,
    Error,
    Filtered,
}

impl RecordStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Unprocessed => 0,
            Self::Processed => 1,
            Self::Error => -1,
            Self::Filtered => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unprocessed),
            1 => Some(Self::Processed),
            -1 => Some(Self::Error),
            2 => Some(Self::Filtered),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Unprocessed
    }
}

/// What was sent upstream, kept so a failed fetch can be replayed by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    /// URL-encoded query string.
    pub params: String,
    /// JSON object of request headers.
    pub headers: String,
}

/// A record about to be written.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub data_type: String,
    pub entity_id: String,
    pub date_code: String,
    pub status: RecordStatus,
    pub raw_content: String,
    pub processing_log: String,
    pub fetched_at: DateTime<Utc>,
    /// The acquisition itself failed; `raw_content` holds the error text.
    pub fetch_failed: bool,
    pub request: RequestSnapshot,
}

impl NewRecord {
    pub fn fetched(
        data_type: impl Into<String>,
        entity_id: impl Into<String>,
        date_code: impl Into<String>,
        raw_content: impl Into<String>,
        request: RequestSnapshot,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            entity_id: entity_id.into(),
            date_code: date_code.into(),
            status: RecordStatus::Unprocessed,
            raw_content: raw_content.into(),
            processing_log: String::new(),
            fetched_at: Utc::now(),
            fetch_failed: false,
            request,
        }
    }

    /// A failed attempt: closed as `Error` with the error text as payload.
    pub fn failed(
        data_type: impl Into<String>,
        entity_id: impl Into<String>,
        date_code: impl Into<String>,
        error: impl Into<String>,
        request: RequestSnapshot,
    ) -> Self {
        let error = error.into();
        Self {
            status: RecordStatus::Error,
            processing_log: format!("fetch failed: {error}"),
            fetch_failed: true,
            ..Self::fetched(data_type, entity_id, date_code, error, request)
        }
    }

    pub fn at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: i64,
    pub provider: String,
    pub data_type: String,
    pub entity_id: String,
    pub date_code: String,
    pub status: RecordStatus,
    pub fetched_at: DateTime<Utc>,
    pub raw_content: String,
    pub processing_log: String,
    pub retries: u32,
    pub fetch_failed: bool,
    pub request: RequestSnapshot,
}

const RECORD_COLUMNS: &str = "id, provider, data_type, entity_id, date_code, status, fetched_at, \
     raw_content, processing_log, retries, fetch_failed, request_method, request_url, \
     request_params, request_headers";

fn read_record(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    let status: i64 = row.get(5)?;
    let fetched_at: String = row.get(6)?;
    Ok(SourceRecord {
        id: row.get(0)?,
        provider: row.get(1)?,
        data_type: row.get(2)?,
        entity_id: row.get(3)?,
        date_code: row.get(4)?,
        status: RecordStatus::from_code(status).unwrap_or(RecordStatus::Error),
        fetched_at: parse_timestamp(&fetched_at).unwrap_or_default(),
        raw_content: row.get(7)?,
        processing_log: row.get(8)?,
        retries: row.get(9)?,
        fetch_failed: row.get(10)?,
        request: RequestSnapshot {
            method: row.get(11)?,
            url: row.get(12)?,
            params: row.get(13)?,
            headers: row.get(14)?,
        },
    })
}

fn placeholders(n: usize, first: usize) -> String {
    (first..first + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw record store.
#[derive(Clone)]
pub struct IngestionStore {
    db: Arc<Database>,
}

impl IngestionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Insert unconditionally; returns the new record id.
    pub fn save(&self, record: &NewRecord) -> Result<i64> {
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO source_records (provider, data_type, entity_id, date_code, status,
                     fetched_at, raw_content, processing_log, fetch_failed, request_method,
                     request_url, request_params, request_headers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    PROVIDER,
                    record.data_type,
                    record.entity_id,
                    record.date_code,
                    record.status.code(),
                    timestamp(record.fetched_at),
                    record.raw_content,
                    record.processing_log,
                    record.fetch_failed,
                    record.request.method,
                    record.request.url,
                    record.request.params,
                    record.request.headers,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<SourceRecord>> {
        self.db.with_conn(|c| {
            c.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM source_records WHERE id = ?1"),
                params![id],
                read_record,
            )
            .optional()
        })
    }

    /// All `Unprocessed` records of one type, oldest first.
    pub fn find_unprocessed(&self, data_type: &str) -> Result<Vec<SourceRecord>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM source_records
                 WHERE data_type = ?1 AND status = 0
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![data_type], read_record)?;
            rows.collect()
        })
    }

    /// Close a record. Returns `false` if it was already terminal.
    pub fn update_status(&self, id: i64, status: RecordStatus) -> Result<bool> {
        if !status.is_terminal() {
            bail!("record {id}: cannot transition back to Unprocessed");
        }
        let changed = self.db.with_conn(|c| {
            c.execute(
                "UPDATE source_records SET status = ?2 WHERE id = ?1 AND status = 0",
                params![id, status.code()],
            )
        })?;
        Ok(changed == 1)
    }

    /// Close a record and replace its processing log in one statement.
    pub fn update_status_and_log(&self, id: i64, status: RecordStatus, log: &str) -> Result<bool> {
        if !status.is_terminal() {
            bail!("record {id}: cannot transition back to Unprocessed");
        }
        let changed = self.db.with_conn(|c| {
            c.execute(
                "UPDATE source_records SET status = ?2, processing_log = ?3
                 WHERE id = ?1 AND status = 0",
                params![id, status.code(), log],
            )
        })?;
        Ok(changed == 1)
    }

    /// Count one failed processing attempt on an open record.
    pub fn bump_retries(&self, id: i64, log: &str) -> Result<u32> {
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE source_records SET retries = retries + 1, processing_log = ?2
                 WHERE id = ?1 AND status = 0",
                params![id, log],
            )?;
            c.query_row(
                "SELECT retries FROM source_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
        })
    }

    /// Most recent acquired record of a type for one entity, whatever its
    /// processing status.
    pub fn find_latest(&self, data_type: &str, entity_id: &str) -> Result<Option<SourceRecord>> {
        self.db.with_conn(|c| {
            c.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM source_records
                     WHERE data_type = ?1 AND entity_id = ?2 AND fetch_failed = 0
                     ORDER BY fetched_at DESC, id DESC
                     LIMIT 1"
                ),
                params![data_type, entity_id],
                read_record,
            )
            .optional()
        })
    }

    /// Entities with exactly one of `required_types` fetched inside `window`.
    /// Failed acquisitions do not count as collected.
    pub fn find_partially_collected(
        &self,
        window: Duration,
        required_types: &[&str],
    ) -> Result<Vec<String>> {
        if required_types.is_empty() {
            return Ok(Vec::new());
        }
        let since = timestamp(Utc::now() - window);
        self.db.with_conn(|c| {
            let sql = format!(
                "SELECT entity_id FROM source_records
                 WHERE fetched_at > ?1 AND fetch_failed = 0 AND data_type IN ({})
                 GROUP BY entity_id
                 HAVING COUNT(DISTINCT data_type) = 1
                 ORDER BY entity_id",
                placeholders(required_types.len(), 2)
            );
            let mut stmt = c.prepare(&sql)?;
            let args = std::iter::once(since.as_str()).chain(required_types.iter().copied());
            let rows = stmt.query_map(params_from_iter(args), |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Which of `types` have a record for `entity_id` fetched after `since`.
    pub fn collected_types_since(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
        types: &[&str],
    ) -> Result<Vec<String>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let since = timestamp(since);
        self.db.with_conn(|c| {
            let sql = format!(
                "SELECT DISTINCT data_type FROM source_records
                 WHERE entity_id = ?1 AND fetched_at > ?2 AND fetch_failed = 0
                     AND data_type IN ({})
                 ORDER BY data_type",
                placeholders(types.len(), 3)
            );
            let mut stmt = c.prepare(&sql)?;
            let args = [entity_id, since.as_str()]
                .into_iter()
                .chain(types.iter().copied());
            let rows = stmt.query_map(params_from_iter(args), |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Every entity id with at least one successful fetch under `types`.
    /// Failed fetches do not count, so a video whose capture delivered
    /// nothing stays eligible for first collection.
    pub fn list_all_collected_entity_ids(&self, types: &[&str]) -> Result<Vec<String>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|c| {
            let sql = format!(
                "SELECT DISTINCT entity_id FROM source_records
                 WHERE fetch_failed = 0 AND data_type IN ({})
                 ORDER BY entity_id",
                placeholders(types.len(), 1)
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(types.iter()), |row| row.get(0))?;
            rows.collect()
        })
    }

    pub fn count_by_status(&self, data_type: &str, status: RecordStatus) -> Result<i64> {
        self.db.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM source_records WHERE data_type = ?1 AND status = ?2",
                params![data_type, status.code()],
                |row| row.get(0),
            )
        })
    }
}
