//! Durable offset store backed by a single SQLite file.
//!
//! One row per thermostat, timestamps stored as RFC 3339 strings:
//!
//! ```sql
//! offset_tracking(thermostat_id TEXT PRIMARY KEY,
//!                 last_runtime_time TEXT,
//!                 last_snapshot_time TEXT,
//!                 updated_at TEXT NOT NULL)
//! ```

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use snafu::ResultExt;

use crate::error::{
    InitSchemaSnafu, OffsetError, OpenDatabaseSnafu, QuerySnafu, TimestampParseSnafu, UpsertSnafu,
};
use crate::model::OffsetStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS offset_tracking (
        thermostat_id TEXT PRIMARY KEY,
        last_runtime_time TEXT,
        last_snapshot_time TEXT,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_updated_at ON offset_tracking(updated_at);
";

/// SQLite-backed [`OffsetStore`]. Offsets survive process restarts, so a
/// rebooted reader resumes from its last successful write instead of
/// re-backfilling.
pub struct SqliteOffsetStore {
    // Offset traffic is a handful of point reads/writes per poll cycle, so a
    // single serialized connection is plenty.
    conn: Mutex<Connection>,
}

impl SqliteOffsetStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OffsetError> {
        let path = path.as_ref();
        let conn = Connection::open(path).context(OpenDatabaseSnafu {
            path: path.display().to_string(),
        })?;
        conn.execute_batch(SCHEMA).context(InitSchemaSnafu)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_time(
        &self,
        column: &'static str,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError> {
        let conn = self.conn.lock().expect("offset db lock poisoned");
        let query = format!("SELECT {column} FROM offset_tracking WHERE thermostat_id = ?1");

        let stored: Option<Option<String>> = conn
            .query_row(&query, [thermostat_id], |row| row.get(0))
            .optional()
            .context(QuerySnafu {
                column,
                thermostat_id,
            })?;

        match stored.flatten() {
            None => Ok(None),
            Some(value) if value.is_empty() => Ok(None),
            Some(value) => {
                let parsed = DateTime::parse_from_rfc3339(&value)
                    .context(TimestampParseSnafu { value })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
        }
    }

    fn set_time(
        &self,
        column: &'static str,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError> {
        let conn = self.conn.lock().expect("offset db lock poisoned");
        let query = format!(
            "INSERT INTO offset_tracking (thermostat_id, {column}, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(thermostat_id) DO UPDATE SET
                 {column} = excluded.{column},
                 updated_at = excluded.updated_at"
        );

        conn.execute(
            &query,
            rusqlite::params![
                thermostat_id,
                timestamp.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context(UpsertSnafu {
            column,
            thermostat_id,
        })?;

        Ok(())
    }
}

#[async_trait]
impl OffsetStore for SqliteOffsetStore {
    async fn last_runtime_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError> {
        self.get_time("last_runtime_time", thermostat_id)
    }

    async fn set_last_runtime_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError> {
        self.set_time("last_runtime_time", thermostat_id, timestamp)
    }

    async fn last_snapshot_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError> {
        self.get_time("last_snapshot_time", thermostat_id)
    }

    async fn set_last_snapshot_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError> {
        self.set_time("last_snapshot_time", thermostat_id, timestamp)
    }
}
