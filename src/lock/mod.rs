//! Lease-based distributed lock on `(lock_type, game_date)`.
//!
//! Protocol grounded on `SPEC_FULL.md` §4.1 and the behavior demonstrated by
//! `test_distributed_lock.py`: conditional create, stale-lease reclamation,
//! retry-with-delay up to a bounded budget, and release-on-drop (including on
//! panic/early-return), mirrored here as an RAII guard in the style of the
//! teacher's `parking_lot`/`tokio::sync` guard usage. SQLite's single-writer
//! transaction serialization gives the conditional-create step the same
//! atomicity Firestore's document transactions provide the original.

use crate::config::LockConfig;
use crate::store::schema::{init_lock_table, lock_table_name};
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Consolidation,
    Grading,
}

impl LockType {
    pub fn as_str(self) -> &'static str {
        match self {
            LockType::Consolidation => "consolidation",
            LockType::Grading => "grading",
        }
    }
}

#[derive(Debug)]
pub struct LockAcquisitionError {
    pub lock_type: LockType,
    pub game_date: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl fmt::Display for LockAcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to acquire {} lock for {} after {} attempts ({:.1}s)",
            self.lock_type.as_str(),
            self.game_date,
            self.attempts,
            self.elapsed.as_secs_f64()
        )
    }
}

impl std::error::Error for LockAcquisitionError {}

/// RAII handle: releasing drops it, deleting the lease document. Released
/// early via an explicit `release()` call, or implicitly on `Drop` — so a
/// panic or a `?`-propagated error mid-critical-section still releases.
pub struct LockHandle {
    store: Store,
    lock_type: LockType,
    game_date: String,
    released: bool,
}

impl LockHandle {
    /// Best-effort explicit release. Prefer this when you want to observe
    /// release failures; `Drop` still runs the same cleanup if skipped.
    pub async fn release(mut self) {
        self.release_inner().await;
    }

    async fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let table = lock_table_name(self.lock_type.as_str());
        let game_date = self.game_date.clone();
        let result = self
            .store
            .with_conn(move |conn| {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE game_date = ?1"),
                    params![game_date],
                )?;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(
                lock_type = self.lock_type.as_str(),
                game_date = %self.game_date,
                error = %e,
                "lock release failed; lease will expire on its own"
            );
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Dropped without an explicit async release (panic, early return).
        // Spawn the cleanup so it still runs; best-effort, matching the
        // "log but do not raise" release semantics in SPEC_FULL §4.1.
        let store = self.store.clone();
        let lock_type = self.lock_type;
        let game_date = self.game_date.clone();
        self.released = true;
        tokio::spawn(async move {
            let table = lock_table_name(lock_type.as_str());
            let result = store
                .with_conn(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE game_date = ?1"),
                        params![game_date],
                    )?;
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "lock release-on-drop failed");
            }
        });
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Store,
    config: LockConfig,
    instance_id: String,
}

impl DistributedLock {
    pub fn new(store: Store, config: LockConfig) -> Self {
        Self {
            store,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn acquire(
        &self,
        lock_type: LockType,
        game_date: &str,
        operation_id: &str,
    ) -> Result<LockHandle, LockAcquisitionError> {
        self.store
            .with_conn(|conn| init_lock_table(conn, lock_type.as_str()).map_err(Into::into))
            .await
            .map_err(|_| LockAcquisitionError {
                lock_type,
                game_date: game_date.to_string(),
                attempts: 0,
                elapsed: Duration::ZERO,
            })?;

        let started = Instant::now();
        let max_wait = Duration::from_secs_f64(self.config.max_wait_secs);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.try_create(lock_type, game_date, operation_id).await {
                Ok(true) => {
                    return Ok(LockHandle {
                        store: self.store.clone(),
                        lock_type,
                        game_date: game_date.to_string(),
                        released: false,
                    });
                }
                Ok(false) => {
                    self.reclaim_if_stale(lock_type, game_date).await.ok();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "lock store error during acquisition attempt");
                }
            }

            if attempts >= self.config.max_attempts || started.elapsed() >= max_wait {
                return Err(LockAcquisitionError {
                    lock_type,
                    game_date: game_date.to_string(),
                    attempts,
                    elapsed: started.elapsed(),
                });
            }

            let jitter_ms = rand::thread_rng().gen_range(0..250);
            let delay = Duration::from_secs_f64(self.config.retry_delay_secs)
                + Duration::from_millis(jitter_ms);
            tokio::time::sleep(delay).await;
        }
    }

    /// Attempt the conditional create; `Ok(true)` means this call acquired
    /// the lock, `Ok(false)` means a live lease already exists.
    async fn try_create(
        &self,
        lock_type: LockType,
        game_date: &str,
        operation_id: &str,
    ) -> Result<bool> {
        let table = lock_table_name(lock_type.as_str());
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.config.lease_secs);
        let game_date = game_date.to_string();
        let operation_id = operation_id.to_string();
        let instance_id = self.instance_id.clone();

        self.store
            .with_conn(move |conn| {
                let rows = conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {table} \
                         (game_date, acquired_at, expires_at, operation_id, holder_instance_id) \
                         VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        game_date,
                        now.to_rfc3339(),
                        expires_at.to_rfc3339(),
                        operation_id,
                        instance_id,
                    ],
                )?;
                Ok(rows > 0)
            })
            .await
            .context("conditional create for lock")
    }

    /// Delete the lease document if its `expires_at` has already passed.
    async fn reclaim_if_stale(&self, lock_type: LockType, game_date: &str) -> Result<()> {
        let table = lock_table_name(lock_type.as_str());
        let game_date = game_date.to_string();

        self.store
            .with_conn(move |conn| {
                let expires_at: Option<String> = conn
                    .query_row(
                        &format!("SELECT expires_at FROM {table} WHERE game_date = ?1"),
                        params![game_date],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(expires_at) = expires_at else {
                    return Ok(());
                };
                let Ok(expires_at) = DateTime::parse_from_rfc3339(&expires_at) else {
                    return Ok(());
                };
                if expires_at.with_timezone(&Utc) < Utc::now() {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE game_date = ?1"),
                        params![game_date],
                    )?;
                }
                Ok(())
            })
            .await
    }
}
