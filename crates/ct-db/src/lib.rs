//! Storage layer for call correlation.
//!
//! Provides persistence for the outgoing-call marker and a local call-record
//! table using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The engine needs its stores to be shareable across threads, so [`SharedDatabase`]
//! puts one connection behind a `Mutex` and implements the `ct-core` store traits
//! on top of it.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). Every writer goes through the same
//! formatter, so lexicographic ordering matches chronological ordering.
//!
//! ## Marker Storage
//!
//! The outgoing marker is two rows of the `kv` table, `last_outgoing_number` and
//! `last_outgoing_ts`. Both are written and cleared in one transaction; a marker
//! with only one of the two keys present reads as absent.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use ct_core::{
    CallLogRow, CallLogStore, CallType, MarkerPersistence, OutgoingMarker, StoreError,
};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

const KEY_LAST_OUTGOING: &str = "last_outgoing_number";
const KEY_LAST_OUTGOING_TS: &str = "last_outgoing_ts";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {key}: {timestamp}")]
    TimestampParse {
        key: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A call-log row carries a type string we do not know.
    #[error("invalid call type for call log row {id}: {source}")]
    InvalidCallType {
        id: i64,
        #[source]
        source: ct_core::UnknownCallType,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Small durable key-value slots (outgoing marker)
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Call records, newest-first queries by timestamp
            -- timestamp: ISO 8601 format (e.g., '2024-01-15T10:30:00.000Z')
            -- type: call type name (e.g., 'outgoing', 'missed')
            CREATE TABLE IF NOT EXISTS call_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT,
                type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_call_log_timestamp ON call_log(timestamp);
            ",
        )?;
        Ok(())
    }

    /// Reads the stored outgoing marker, regardless of its age.
    pub fn outgoing_marker(&self) -> Result<Option<OutgoingMarker>, DbError> {
        let number = self.kv_get(KEY_LAST_OUTGOING)?;
        let timestamp = self.kv_get(KEY_LAST_OUTGOING_TS)?;
        let (Some(number), Some(timestamp)) = (number, timestamp) else {
            return Ok(None);
        };
        let placed_at = parse_timestamp(&timestamp, KEY_LAST_OUTGOING_TS)?;
        Ok(Some(OutgoingMarker { number, placed_at }))
    }

    /// Overwrites the outgoing marker slot.
    pub fn set_outgoing_marker(&mut self, marker: &OutgoingMarker) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO kv (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
            )?;
            stmt.execute(params![KEY_LAST_OUTGOING, marker.number])?;
            stmt.execute(params![
                KEY_LAST_OUTGOING_TS,
                format_timestamp(marker.placed_at)
            ])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes the outgoing marker.
    pub fn clear_outgoing_marker(&mut self) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM kv WHERE key IN (?, ?)",
            params![KEY_LAST_OUTGOING, KEY_LAST_OUTGOING_TS],
        )?;
        Ok(())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, DbError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Appends a call record and returns its row ID.
    pub fn insert_call_log(&mut self, row: &CallLogRow) -> Result<i64, DbError> {
        self.conn.execute(
            "
            INSERT INTO call_log (number, type, timestamp, duration_seconds)
            VALUES (?, ?, ?, ?)
            ",
            params![
                row.number,
                row.call_type.to_string(),
                format_timestamp(row.timestamp),
                row.duration_seconds,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Lists call records with `timestamp >= since`, newest first.
    ///
    /// Rows that fail to parse are logged and skipped so one bad record
    /// cannot hide the rest.
    pub fn recent_calls(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallLogRow>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, number, type, timestamp, duration_seconds
            FROM call_log
            WHERE timestamp >= ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map(params![format_timestamp(since), limit], |row| {
            Ok(RawCallLogRow {
                id: row.get(0)?,
                number: row.get(1)?,
                call_type: row.get(2)?,
                timestamp: row.get(3)?,
                duration_seconds: row.get(4)?,
            })
        })?;
        let mut calls = Vec::new();
        for row in rows {
            let raw = row?;
            let id = raw.id;
            match raw.parse() {
                Ok(call) => calls.push(call),
                Err(err) => tracing::warn!(id, error = %err, "skipping unreadable call log row"),
            }
        }
        Ok(calls)
    }

    /// Counts all stored call records.
    pub fn call_log_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM call_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

struct RawCallLogRow {
    id: i64,
    number: Option<String>,
    call_type: String,
    timestamp: String,
    duration_seconds: i64,
}

impl RawCallLogRow {
    fn parse(self) -> Result<CallLogRow, DbError> {
        let call_type: CallType = self
            .call_type
            .parse()
            .map_err(|source| DbError::InvalidCallType {
                id: self.id,
                source,
            })?;
        let timestamp = parse_timestamp(&self.timestamp, &format!("call_log:{}", self.id))?;
        Ok(CallLogRow {
            number: self.number,
            call_type,
            timestamp,
            duration_seconds: self.duration_seconds,
        })
    }
}

fn parse_timestamp(timestamp: &str, key: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            key: key.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A [`Database`] shared behind a mutex, usable as both engine stores.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Locks the underlying database.
    pub fn lock(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("database mutex poisoned".to_string()))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl MarkerPersistence for SharedDatabase {
    fn get(&self) -> Result<Option<OutgoingMarker>, StoreError> {
        Ok(self.lock()?.outgoing_marker()?)
    }

    fn set(&self, marker: &OutgoingMarker) -> Result<(), StoreError> {
        Ok(self.lock()?.set_outgoing_marker(marker)?)
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(self.lock()?.clear_outgoing_marker()?)
    }
}

impl CallLogStore for SharedDatabase {
    fn query_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallLogRow>, StoreError> {
        Ok(self.lock()?.recent_calls(since, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn call(number: &str, call_type: CallType, timestamp: &str, duration: i64) -> CallLogRow {
        CallLogRow {
            number: Some(number.to_string()),
            call_type,
            timestamp: ts(timestamp),
            duration_seconds: duration,
        }
    }

    #[test]
    fn marker_is_absent_on_fresh_database() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert_eq!(db.outgoing_marker().unwrap(), None);
    }

    #[test]
    fn set_marker_overwrites_previous_marker() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let first = OutgoingMarker {
            number: "+15550000001".to_string(),
            placed_at: ts("2025-01-01T00:00:00Z"),
        };
        let second = OutgoingMarker {
            number: "+15550000002".to_string(),
            placed_at: ts("2025-01-01T00:00:05.250Z"),
        };
        db.set_outgoing_marker(&first).unwrap();
        db.set_outgoing_marker(&second).unwrap();

        assert_eq!(db.outgoing_marker().unwrap(), Some(second));
    }

    #[test]
    fn clear_marker_removes_both_keys() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        db.set_outgoing_marker(&OutgoingMarker {
            number: "+15550000001".to_string(),
            placed_at: ts("2025-01-01T00:00:00Z"),
        })
        .unwrap();
        db.clear_outgoing_marker().unwrap();

        assert_eq!(db.outgoing_marker().unwrap(), None);
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn marker_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("calltrace.db");
        let marker = OutgoingMarker {
            number: "+15551234567".to_string(),
            placed_at: ts("2025-01-01T12:00:00Z"),
        };
        {
            let mut db = Database::open(&path).unwrap();
            db.set_outgoing_marker(&marker).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.outgoing_marker().unwrap(), Some(marker));
    }

    #[test]
    fn recent_calls_are_newest_first_and_bounded() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        db.insert_call_log(&call("111", CallType::Incoming, "2025-01-01T00:00:00Z", 10))
            .unwrap();
        db.insert_call_log(&call("222", CallType::Outgoing, "2025-01-01T00:02:00Z", 20))
            .unwrap();
        db.insert_call_log(&call("333", CallType::Missed, "2025-01-01T00:01:00Z", 0))
            .unwrap();

        let calls = db.recent_calls(ts("2025-01-01T00:00:30Z"), 20).unwrap();
        let numbers: Vec<_> = calls.iter().filter_map(|c| c.number.as_deref()).collect();
        assert_eq!(numbers, ["222", "333"]);

        let limited = db.recent_calls(ts("2024-12-31T00:00:00Z"), 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].number.as_deref(), Some("222"));
        assert_eq!(limited[0].call_type, CallType::Outgoing);
    }

    #[test]
    fn unreadable_rows_are_skipped() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        db.insert_call_log(&call("111", CallType::Incoming, "2025-01-01T00:00:00Z", 10))
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO call_log (number, type, timestamp) VALUES ('222', 'teleport', '2025-01-01T00:00:01.000Z')",
                [],
            )
            .unwrap();

        let calls = db.recent_calls(ts("2024-12-31T00:00:00Z"), 20).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(db.call_log_count().unwrap(), 2);
    }

    #[test]
    fn shared_database_implements_store_traits() {
        let shared = SharedDatabase::new(Database::open_in_memory().unwrap());
        let marker = OutgoingMarker {
            number: "+15551234567".to_string(),
            placed_at: ts("2025-01-01T00:00:00Z"),
        };
        MarkerPersistence::set(&shared, &marker).unwrap();
        assert_eq!(MarkerPersistence::get(&shared).unwrap(), Some(marker));
        MarkerPersistence::clear(&shared).unwrap();
        assert_eq!(MarkerPersistence::get(&shared).unwrap(), None);

        shared
            .lock()
            .unwrap()
            .insert_call_log(&call("555", CallType::Rejected, "2025-01-01T00:00:00Z", 0))
            .unwrap();
        let rows = shared.query_recent(ts("2024-01-01T00:00:00Z"), 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].call_type, CallType::Rejected);
    }
}
