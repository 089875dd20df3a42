// src/store.rs

use crate::manager::DownloadManager;
use crate::models::WorkItem;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted entry of the desired pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub url: String,
    pub caption: String,
    pub priority: i32,
}

impl From<&WorkItem> for QueueRecord {
    fn from(item: &WorkItem) -> Self {
        Self {
            url: item.url.clone(),
            caption: item.caption.clone(),
            priority: item.priority,
        }
    }
}

/// Keeps the pending queue across restarts in an SQLite file.
///
/// This sits outside the manager: the manager never reads or writes it. The
/// caller saves whatever is pending at shutdown and feeds the records back
/// through `enqueue` at startup.
pub struct QueueStore {
    conn: Connection,
}

impl QueueStore {
    /// Opens (creating if needed) the database at `db_path`.
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(db_path).await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS pending (
                        position        INTEGER PRIMARY KEY,
                        url             TEXT NOT NULL,
                        caption         TEXT NOT NULL,
                        priority        INTEGER NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Replaces the stored list with `records`, keeping their order.
    pub async fn save_records(&self, records: Vec<QueueRecord>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM pending", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO pending (position, url, caption, priority)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (position, record) in records.iter().enumerate() {
                        stmt.execute(params![
                            position as i64,
                            record.url,
                            record.caption,
                            record.priority
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Loads the stored list in saved order.
    pub async fn load_records(&self) -> Result<Vec<QueueRecord>, StoreError> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT url, caption, priority FROM pending ORDER BY position")?;
                let rows = stmt.query_map([], |row| {
                    Ok(QueueRecord {
                        url: row.get(0)?,
                        caption: row.get(1)?,
                        priority: row.get(2)?,
                    })
                })?;
                let records = rows.collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Enqueues every stored record. Returns how many were restored.
    pub async fn restore_into(&self, manager: &DownloadManager) -> Result<usize, StoreError> {
        let records = self.load_records().await?;
        let count = records.len();
        for record in records {
            manager.enqueue(record.url, record.caption, record.priority).await;
        }
        if count > 0 {
            tracing::info!(count, "restored pending downloads");
        }
        Ok(count)
    }

    /// Saves the manager's current pending list.
    pub async fn snapshot_from(&self, manager: &DownloadManager) -> Result<usize, StoreError> {
        let records: Vec<QueueRecord> =
            manager.list_pending().await.iter().map(QueueRecord::from).collect();
        let count = records.len();
        self.save_records(records).await?;
        Ok(count)
    }
}
