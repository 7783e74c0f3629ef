//! [`EventLog`] – bounded, append-only audit trail.
//!
//! Every significant action of the agent (policy changes, heartbeats, DMS
//! transitions, accepted and rejected commands) is recorded here so the user
//! can review what happened while the device was unattended.
//!
//! # Storage layout
//!
//! | column   | type    | description                            |
//! |----------|---------|----------------------------------------|
//! | id       | INTEGER | monotonically increasing row id        |
//! | ts       | TEXT    | RFC-3339 timestamp (UTC)               |
//! | category | TEXT    | `AGENT`, `SAFETY` or `COMMAND`         |
//! | message  | TEXT    | free-form description                  |
//!
//! When the table grows past its capacity the oldest half is dropped, so the
//! log never grows without bound on a device that stays armed for weeks.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lifeline_types::{LogCategory, LogEntry};
use rusqlite::{Connection, params};
use tracing::warn;

use crate::StoreError;

/// Default number of entries kept before trimming.
pub const MAX_ENTRIES: usize = 2000;

pub struct EventLog {
    conn: Mutex<Connection>,
    capacity: usize,
}

impl EventLog {
    /// Open (or create) a persistent log at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?, MAX_ENTRIES)
    }

    /// Open a temporary in-memory log (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, MAX_ENTRIES)
    }

    /// Override the trimming threshold.  A capacity below 2 is raised to 2.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(2);
        self
    }

    fn from_connection(conn: Connection, capacity: usize) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_log (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                ts       TEXT NOT NULL,
                category TEXT NOT NULL,
                message  TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            capacity,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry stamped with the current time.
    pub fn append(&self, category: LogCategory, message: &str) -> Result<(), StoreError> {
        self.append_at(Utc::now(), category, message)
    }

    /// Append an entry with an explicit timestamp.
    pub fn append_at(
        &self,
        at: DateTime<Utc>,
        category: LogCategory,
        message: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_log (ts, category, message) VALUES (?1, ?2, ?3)",
            params![at.to_rfc3339(), category.as_str(), message],
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM agent_log", [], |row| row.get(0))?;
        if count as usize > self.capacity {
            let keep = (self.capacity / 2) as i64;
            conn.execute(
                "DELETE FROM agent_log WHERE id NOT IN
                    (SELECT id FROM agent_log ORDER BY id DESC LIMIT ?1)",
                params![keep],
            )?;
        }
        Ok(())
    }

    /// Fire-and-forget variant of [`append`](Self::append).  A failing audit
    /// write must never interrupt the safety path, so errors are only traced.
    pub fn record(&self, category: LogCategory, message: &str) {
        if let Err(e) = self.append(category, message) {
            warn!(category = %category, error = %e, "failed to write event log entry");
        }
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ts, category, message FROM agent_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], read_row)?;
        collect_entries(rows)
    }

    /// The `limit` most recent entries whose category is in `categories`,
    /// newest first.
    pub fn recent_in(
        &self,
        categories: &[LogCategory],
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let all = self.recent(self.capacity)?;
        Ok(all
            .into_iter()
            .filter(|entry| categories.contains(&entry.category))
            .take(limit)
            .collect())
    }

    /// Every entry as newline-delimited JSON, oldest first.
    pub fn export_ndjson(&self) -> Result<String, StoreError> {
        let mut entries = self.recent(self.capacity)?;
        entries.reverse();
        let mut out = String::new();
        for entry in &entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM agent_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn().execute("DELETE FROM agent_log", [])?;
        Ok(())
    }
}

type RawRow = (String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn collect_entries(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<LogEntry>, StoreError> {
    let mut entries = Vec::new();
    for row in rows {
        let (ts, category, message) = row?;
        let Ok(timestamp) = DateTime::parse_from_rfc3339(&ts) else {
            warn!(ts = %ts, "skipping event log row with malformed timestamp");
            continue;
        };
        let Ok(category) = category.parse::<LogCategory>() else {
            warn!(category = %category, "skipping event log row with unknown category");
            continue;
        };
        entries.push(LogEntry {
            timestamp: timestamp.with_timezone(&Utc),
            category,
            message,
        });
    }
    Ok(entries)
}
