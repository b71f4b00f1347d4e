//! SQLite-backed local queue of finalized outreach events
//!
//! The queue keeps only the most recent `capacity` events. Reads return
//! newest first.

use crate::event::{OutreachEvent, OutreachKind, OutreachStatus};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default number of events retained
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Durable event queue
pub struct EventQueue {
    conn: Connection,
    capacity: usize,
}

impl EventQueue {
    /// Open or create the queue at the given path
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let queue = Self { conn, capacity };
        queue.init_schema()?;
        Ok(queue)
    }

    /// Open an in-memory queue (for testing)
    pub fn open_in_memory(capacity: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let queue = Self { conn, capacity };
        queue.init_schema()?;
        Ok(queue)
    }

    /// Default on-disk location
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("outreach-tracker")
            .join("events.db")
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS outreach_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_outreach_events_kind ON outreach_events(kind);
            "#,
        )?;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an event at the head of the queue and drop anything past capacity
    pub fn push(&mut self, event: &OutreachEvent) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO outreach_events (ts, url, name, kind, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.ts,
                event.url,
                event.name,
                event.kind.as_str(),
                event.status.as_str()
            ],
        )?;

        let trimmed = tx.execute(
            "DELETE FROM outreach_events WHERE id NOT IN (
                SELECT id FROM outreach_events ORDER BY id DESC LIMIT ?1
             )",
            params![self.capacity as i64],
        )?;

        tx.commit()?;

        if trimmed > 0 {
            debug!("Trimmed {} events past capacity {}", trimmed, self.capacity);
        }
        Ok(())
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<OutreachEvent>, StoreError> {
        self.select(
            "SELECT ts, url, name, kind, status FROM outreach_events
             ORDER BY id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    /// Most recent events of one kind, newest first
    pub fn recent_of_kind(&self, kind: OutreachKind, limit: usize) -> Result<Vec<OutreachEvent>, StoreError> {
        self.select(
            "SELECT ts, url, name, kind, status FROM outreach_events
             WHERE kind = ?1 ORDER BY id DESC LIMIT ?2",
            params![kind.as_str(), limit as i64],
        )
    }

    fn select<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<OutreachEvent>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;

        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (ts, url, name, kind, status) = row?;
            events.push(OutreachEvent {
                ts,
                url,
                name,
                kind: kind.parse::<OutreachKind>().map_err(StoreError::InvalidValue)?,
                status: status
                    .parse::<OutreachStatus>()
                    .map_err(StoreError::InvalidValue)?,
            });
        }
        Ok(events)
    }

    /// All retained events, newest first
    pub fn all(&self) -> Result<Vec<OutreachEvent>, StoreError> {
        self.recent(self.capacity)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outreach_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Counts per kind and outcome
    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, status, COUNT(*) FROM outreach_events GROUP BY kind, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (kind, status, count) = row?;
            let count = count as usize;
            stats.total += count;
            match kind.parse::<OutreachKind>().map_err(StoreError::InvalidValue)? {
                OutreachKind::Connect => stats.connect += count,
                OutreachKind::Message => stats.message += count,
            }
            if status.parse::<OutreachStatus>().map_err(StoreError::InvalidValue)?
                == OutreachStatus::Confirmed
            {
                stats.confirmed += count;
            }
        }
        Ok(stats)
    }

    /// Remove every event
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM outreach_events", [])?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub connect: usize,
    pub message: usize,
    pub confirmed: usize,
}
