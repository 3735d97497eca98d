//! Pooled SQLite connection shared across the core's components.
//!
//! Grounded on `vault::vault_db::VaultDb`: a single `rusqlite::Connection`
//! guarded by a `tokio::sync::Mutex`, opened with WAL + NORMAL synchronous
//! pragmas. Blocking SQLite calls run on the async mutex directly rather than
//! via `spawn_blocking`, matching the teacher's choice — callers serialize on
//! the same mutex anyway (predictions and staging share this connection), so
//! a blocking-pool hop would only add latency without adding concurrency.

use super::schema::init_schema;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open store db at {db_path}"))?;
        init_schema(&conn).context("initialize schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store db")?;
        init_schema(&conn).context("initialize schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the underlying connection. Every
    /// store module (lock, lines, slate, staging, consolidate, grade,
    /// healing) goes through this one entry point rather than holding its
    /// own connection, so there is exactly one writer at a time — the same
    /// guarantee SQLite's own locking would give, made explicit at the type
    /// level instead of relying on convention.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }

    pub async fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_initializes_schema() {
        let store = Store::open_in_memory().unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'predictions'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn opens_an_on_disk_file_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propline.sqlite3");
        let path_str = path.to_str().unwrap();

        {
            let store = Store::open(path_str).unwrap();
            store
                .with_conn(|conn| {
                    Ok(conn.execute(
                        "INSERT INTO predictions \
                         (prediction_id, game_id, player, system_id, game_date, \
                          predicted_points, recommendation, is_active, line_source, \
                          created_at, updated_at) \
                         VALUES ('p1', 'g1', 'lebron-james', 'sys1', '2026-01-25', \
                          27.0, 'OVER', 1, 'ACTUAL_PROP', '2026-01-25T00:00:00Z', \
                          '2026-01-25T00:00:00Z')",
                        [],
                    )?)
                })
                .await
                .unwrap();
        }

        // Reopening the same file must not re-run schema creation over
        // existing data (CREATE TABLE IF NOT EXISTS) and must see the row
        // the first handle wrote.
        let reopened = Store::open(path_str).unwrap();
        let count: i64 = reopened
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
