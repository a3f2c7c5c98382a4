use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use crate::alert::AlertRecord;
use crate::open_db_connection;

/// Default page size for recent-alert queries.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Upper bound on a single query page.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Append-only alert log.
///
/// `append` commits a fully built record in one step; a failed append leaves
/// no partial row behind.
pub trait AlertStore: Send + Sync {
    /// Append a record, returning its store-assigned id.
    fn append(&self, record: &AlertRecord) -> Result<i64>;

    /// Most recent records first (by timestamp, then insertion order).
    fn query(&self, limit: usize) -> Result<Vec<AlertRecord>>;
}

pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
}

impl SqliteAlertStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("alert store connection lock poisoned"))
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS alerts (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          source TEXT NOT NULL,
          timestamp_ms INTEGER NOT NULL,
          danger INTEGER NOT NULL,
          reason TEXT NOT NULL,
          notify TEXT NOT NULL,
          payload_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_alerts_source ON alerts(source, timestamp_ms);
        "#,
    )?;
    Ok(())
}

impl AlertStore for SqliteAlertStore {
    fn append(&self, record: &AlertRecord) -> Result<i64> {
        let timestamp_ms = i64::try_from(record.timestamp_ms)
            .map_err(|_| anyhow!("alert timestamp exceeds i64 range"))?;
        let payload = AlertRecord {
            id: None,
            ..record.clone()
        };
        let payload_json = serde_json::to_string(&payload)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO alerts(source, timestamp_ms, danger, reason, notify, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.source,
                timestamp_ms,
                record.danger,
                record.reason.as_str(),
                record.notify.to_string(),
                payload_json
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let limit = limit.min(MAX_QUERY_LIMIT) as i64;
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, payload_json FROM alerts ORDER BY timestamp_ms DESC, id DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let payload: String = row.get(1)?;
                out.push((id, payload));
            }
            out
        };

        let mut out = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            let record: AlertRecord = serde_json::from_str(&payload)
                .map_err(|e| anyhow!("corrupt alert row {}: {}", id, e))?;
            out.push(record.with_id(id));
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    records: Mutex<Vec<AlertRecord>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in append order.
    pub fn records(&self) -> Vec<AlertRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertStore for InMemoryAlertStore {
    fn append(&self, record: &AlertRecord) -> Result<i64> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        let id = records.len() as i64 + 1;
        records.push(record.with_id(id));
        Ok(id)
    }

    fn query(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        let mut out: Vec<AlertRecord> = records.clone();
        out.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        out.truncate(limit.min(MAX_QUERY_LIMIT));
        Ok(out)
    }
}
