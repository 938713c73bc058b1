//! SQLite-backed attendance collaborator.
//!
//! Owns the two capabilities the core needs from the outside world: identity
//! records by id, and attendance event persistence with a last-event-time
//! read. The core never sees SQL; it talks through the
//! [`AttendanceStore`] seam.

use std::path::Path;

use chrono::{DateTime, Utc};
use rollcall_core::{AttendanceEvent, AttendanceStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Display attributes for an enrolled identity — opaque to the core, shown
/// to the operator alongside an admitted attempt.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub cohort: String,
    pub year: u32,
    pub total_attendance: u32,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the attendance database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create data dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS identities (
                    id               TEXT PRIMARY KEY,
                    name             TEXT NOT NULL,
                    cohort           TEXT NOT NULL DEFAULT '',
                    year             INTEGER NOT NULL DEFAULT 0,
                    total_attendance INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS attendance_events (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    identity_id TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_events_identity
                    ON attendance_events (identity_id, recorded_at);",
            )
            .map_err(|e| StoreError::Unavailable(format!("init schema: {e}")))
    }

    /// Fetch an identity's display record.
    pub fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, cohort, year, total_attendance
                 FROM identities WHERE id = ?1",
                params![id],
                |row| {
                    Ok(IdentityRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        cohort: row.get(2)?,
                        year: row.get(3)?,
                        total_attendance: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("get identity: {e}")))
    }

    /// Insert or update an identity's display record.
    pub fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO identities (id, name, cohort, year, total_attendance)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     cohort = excluded.cohort,
                     year = excluded.year",
                params![
                    record.id,
                    record.name,
                    record.cohort,
                    record.year,
                    record.total_attendance
                ],
            )
            .map_err(|e| StoreError::Unavailable(format!("upsert identity: {e}")))?;
        Ok(())
    }
}

impl AttendanceStore for SqliteStore {
    fn last_event_time(
        &mut self,
        identity_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let recorded: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(recorded_at) FROM attendance_events WHERE identity_id = ?1",
                params![identity_id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Unavailable(format!("last event time: {e}")))?;

        recorded
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp {s}: {e}")))
            })
            .transpose()
    }

    fn record_event(&mut self, event: &AttendanceEvent) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(format!("begin transaction: {e}")))?;

        tx.execute(
            "INSERT INTO attendance_events (identity_id, recorded_at) VALUES (?1, ?2)",
            params![event.identity_id, event.timestamp.to_rfc3339()],
        )
        .map_err(|e| StoreError::Unavailable(format!("insert event: {e}")))?;

        tx.execute(
            "UPDATE identities SET total_attendance = total_attendance + 1 WHERE id = ?1",
            params![event.identity_id],
        )
        .map_err(|e| StoreError::Unavailable(format!("bump attendance counter: {e}")))?;

        tx.commit()
            .map_err(|e| StoreError::Unavailable(format!("commit event: {e}")))?;

        tracing::debug!(identity_id = %event.identity_id, at = %event.timestamp, "attendance event recorded");
        Ok(())
    }
}
