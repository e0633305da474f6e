//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use lineflow_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus, StreamName};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS source_cursors (
    pipeline TEXT NOT NULL,
    stream TEXT NOT NULL,
    cursor_value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (pipeline, stream)
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_in INTEGER DEFAULT 0,
    records_out INTEGER DEFAULT 0,
    records_dropped INTEGER DEFAULT 0,
    restarts INTEGER DEFAULT 0,
    error_message TEXT
);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't be
    /// initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }
}

#[allow(clippy::cast_sign_loss)]
fn counter(value: i64) -> u64 {
    value.max(0) as u64
}

#[allow(clippy::cast_possible_wrap)]
fn column(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}

impl StateBackend for SqliteStateBackend {
    fn get_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT cursor_value, updated_at FROM source_cursors \
                 WHERE pipeline = ?1 AND stream = ?2",
                rusqlite::params![pipeline.as_str(), stream.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(value, updated_at)| CursorState {
            value,
            updated_at: Self::sqlite_to_iso8601(&updated_at),
        }))
    }

    fn set_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        value: &str,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO source_cursors (pipeline, stream, cursor_value, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(pipeline, stream) \
             DO UPDATE SET cursor_value = ?3, updated_at = ?4",
            rusqlite::params![
                pipeline.as_str(),
                stream.as_str(),
                value,
                Self::now_sqlite()
            ],
        )?;
        Ok(())
    }

    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline, status) VALUES (?1, ?2)",
            rusqlite::params![pipeline.as_str(), RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = ?2, \
             records_in = ?3, records_out = ?4, records_dropped = ?5, restarts = ?6, \
             error_message = ?7 WHERE id = ?8",
            rusqlite::params![
                status.as_str(),
                Self::now_sqlite(),
                column(stats.records_in),
                column(stats.records_out),
                column(stats.records_dropped),
                column(stats.restarts),
                stats.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> error::Result<Option<RunRecord>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT pipeline, status, started_at, finished_at, records_in, records_out, \
                 records_dropped, restarts, error_message FROM pipeline_runs WHERE id = ?1",
                [run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((pipeline, status, started_at, finished_at, rin, rout, dropped, restarts, err)) =
            row
        else {
            return Ok(None);
        };
        let status = RunStatus::parse(&status)
            .ok_or_else(|| StateError::Corrupt(format!("unknown run status '{status}'")))?;

        Ok(Some(RunRecord {
            id: run_id,
            pipeline: PipelineId::new(pipeline),
            status,
            stats: RunStats {
                records_in: counter(rin),
                records_out: counter(rout),
                records_dropped: counter(dropped),
                restarts: counter(restarts),
                error_message: err,
            },
            started_at: Self::sqlite_to_iso8601(&started_at),
            finished_at: finished_at.as_deref().map(Self::sqlite_to_iso8601),
        }))
    }
}
