//! Batch consolidation: lift all staging tables for a batch into the main
//! predictions table, exactly once.
//!
//! Grounded on `predictions/shared/batch_staging_writer.py::BatchConsolidator`.
//! BigQuery's `MERGE ... ROW_NUMBER() OVER (PARTITION BY ...)` becomes a
//! SQLite `INSERT ... SELECT ... WHERE row_num = 1 ON CONFLICT DO UPDATE`
//! upsert: SQLite has no MERGE statement, but the upsert covers the same
//! matched/unmatched cases since the business key is unique. Per the open
//! question recorded in `DESIGN.md`, the deactivation pass runs inside the
//! same transaction as the upsert, closing the crash window the original
//! leaves open between its MERGE and its separate `_deactivate_older_predictions`
//! call.

use crate::lock::{DistributedLock, LockType};
use crate::store::Store;
use anyhow::{Context, Result};
use rusqlite::Connection;

#[derive(Debug, Clone, Default)]
pub struct ConsolidationResult {
    pub rows_affected: usize,
    pub staging_tables_merged: usize,
    pub staging_tables_cleaned: usize,
    pub success: bool,
    pub duplicate_count: usize,
}

pub struct Consolidator {
    store: Store,
    lock: DistributedLock,
    dataset_prefix: String,
}

impl Consolidator {
    pub fn new(store: Store, lock: DistributedLock, dataset_prefix: impl Into<String>) -> Self {
        Self {
            store,
            lock,
            dataset_prefix: dataset_prefix.into(),
        }
    }

    pub async fn consolidate(
        &self,
        batch_id: &str,
        game_date: &str,
    ) -> Result<ConsolidationResult> {
        // Lock acquisition failure is survivable here: proceed without it,
        // loudly, and lean on the post-write duplicate check as the safety
        // net (SPEC_FULL §7, scenario 4 in §8).
        let handle = match self
            .lock
            .acquire(LockType::Consolidation, game_date, batch_id)
            .await
        {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    batch_id,
                    game_date,
                    "consolidation lock unavailable; proceeding WITHOUT lock, relying on post-write validation"
                );
                None
            }
        };

        let result = self.consolidate_inner(batch_id, game_date).await;

        if let Some(handle) = handle {
            handle.release().await;
        }

        result
    }

    async fn consolidate_inner(
        &self,
        batch_id: &str,
        game_date: &str,
    ) -> Result<ConsolidationResult> {
        let prefix = format!(
            "{}_staging_{}_",
            if self.dataset_prefix.is_empty() {
                String::new()
            } else {
                format!("{}_", sanitize(&self.dataset_prefix))
            },
            sanitize(batch_id)
        );
        let prefix_for_list = prefix.clone();

        let staging_tables: Vec<String> = self
            .store
            .with_conn(move |conn| list_staging_tables(conn, &prefix_for_list))
            .await?;

        if staging_tables.is_empty() {
            return Ok(ConsolidationResult {
                success: true,
                ..Default::default()
            });
        }

        let game_date = game_date.to_string();
        let tables_for_merge = staging_tables.clone();
        let merge_outcome: (usize, usize) = self
            .store
            .with_conn_mut(move |conn| {
                let tx = conn.transaction()?;
                let rows_affected = run_merge(&tx, &tables_for_merge)?;
                let deactivated = deactivate_older_predictions(&tx, &game_date)?;
                tx.commit()?;
                Ok((rows_affected, deactivated))
            })
            .await
            .context("consolidation transaction")?;

        let (rows_affected, _deactivated) = merge_outcome;

        if rows_affected == 0 {
            tracing::error!(batch_id, "merge affected 0 rows with nonempty staging tables");
            return Ok(ConsolidationResult {
                rows_affected: 0,
                staging_tables_merged: staging_tables.len(),
                staging_tables_cleaned: 0,
                success: false,
                duplicate_count: 0,
            });
        }

        let game_date_for_validate = game_date.clone();
        let duplicate_count: usize = self
            .store
            .with_conn(move |conn| count_duplicate_business_keys(conn, &game_date_for_validate))
            .await?;

        if duplicate_count > 0 {
            tracing::error!(
                batch_id,
                duplicate_count,
                "post-write validation found duplicate business keys; staging tables retained for forensics"
            );
            return Ok(ConsolidationResult {
                rows_affected,
                staging_tables_merged: staging_tables.len(),
                staging_tables_cleaned: 0,
                success: false,
                duplicate_count,
            });
        }

        let tables_for_cleanup = staging_tables.clone();
        self.store
            .with_conn(move |conn| {
                for table in &tables_for_cleanup {
                    conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
                }
                Ok(())
            })
            .await?;

        Ok(ConsolidationResult {
            rows_affected,
            staging_tables_merged: staging_tables.len(),
            staging_tables_cleaned: staging_tables.len(),
            success: true,
            duplicate_count: 0,
        })
    }

    /// Sweep staging tables orphaned by a crashed or skipped consolidation,
    /// older than `max_age_hours`.
    pub async fn cleanup_orphaned_staging_tables(&self, max_age_hours: i64) -> Result<usize> {
        let prefix = "_staging_".to_string();
        self.store
            .with_conn(move |conn| {
                let tables = list_staging_tables(conn, &prefix)?;
                let mut cleaned = 0;
                for table in tables {
                    let is_old: bool = conn
                        .query_row(
                            &format!(
                                "SELECT (julianday('now') - julianday(MIN(created_at))) * 24 > ?1 \
                                 FROM {table}"
                            ),
                            [max_age_hours as f64],
                            |row| row.get(0),
                        )
                        .unwrap_or(false);
                    if is_old {
                        conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
                        cleaned += 1;
                    }
                }
                Ok(cleaned)
            })
            .await
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn list_staging_tables(conn: &Connection, prefix: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1",
    )?;
    let pattern = format!("{prefix}%");
    let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

const COMMON_COLUMNS: &str = "prediction_id, game_id, player, system_id, game_date, team, opponent, \
     home_game, current_points_line, predicted_points, confidence_score, recommendation, is_active, \
     line_source, line_source_api, sportsbook, line_minutes_before_game, was_line_fallback, \
     estimated_line_value, model_version, feature_quality_score, injury_status_at_prediction, \
     created_at, updated_at";

/// Upsert every staging table's newest-per-business-key row into the main
/// table in one statement, returning the number of rows affected.
fn run_merge(tx: &rusqlite::Transaction<'_>, staging_tables: &[String]) -> Result<usize> {
    let union_all = staging_tables
        .iter()
        .map(|t| format!("SELECT {COMMON_COLUMNS} FROM {t}"))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    let sql = format!(
        "INSERT INTO predictions ({COMMON_COLUMNS})
         SELECT {COMMON_COLUMNS} FROM (
             SELECT *, ROW_NUMBER() OVER (
                 PARTITION BY game_id, player, system_id, COALESCE(current_points_line, -1)
                 ORDER BY created_at DESC
             ) AS row_num
             FROM ({union_all})
         )
         WHERE row_num = 1
         ON CONFLICT(game_id, player, system_id, COALESCE(current_points_line, -1)) DO UPDATE SET
             team = excluded.team,
             opponent = excluded.opponent,
             home_game = excluded.home_game,
             predicted_points = excluded.predicted_points,
             confidence_score = excluded.confidence_score,
             recommendation = excluded.recommendation,
             is_active = excluded.is_active,
             line_source = excluded.line_source,
             line_source_api = excluded.line_source_api,
             sportsbook = excluded.sportsbook,
             line_minutes_before_game = excluded.line_minutes_before_game,
             was_line_fallback = excluded.was_line_fallback,
             estimated_line_value = excluded.estimated_line_value,
             model_version = excluded.model_version,
             feature_quality_score = excluded.feature_quality_score,
             injury_status_at_prediction = excluded.injury_status_at_prediction,
             updated_at = excluded.updated_at"
    );

    let rows = tx.execute(&sql, [])?;
    Ok(rows)
}

/// Mark every row but the newest (by `created_at`) within each
/// `(game_id, player, system_id)` partition for this date as inactive (I2).
fn deactivate_older_predictions(tx: &rusqlite::Transaction<'_>, game_date: &str) -> Result<usize> {
    let rows = tx.execute(
        "UPDATE predictions SET is_active = 0
         WHERE game_date = ?1 AND prediction_id IN (
             SELECT prediction_id FROM (
                 SELECT prediction_id, ROW_NUMBER() OVER (
                     PARTITION BY game_id, player, system_id
                     ORDER BY created_at DESC
                 ) AS row_num
                 FROM predictions
                 WHERE game_date = ?1
             )
             WHERE row_num > 1
         )",
        [game_date],
    )?;
    Ok(rows)
}

fn count_duplicate_business_keys(conn: &Connection, game_date: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT game_id, player, system_id, COALESCE(current_points_line, -1)
            FROM predictions
            WHERE game_date = ?1
            GROUP BY game_id, player, system_id, COALESCE(current_points_line, -1)
            HAVING COUNT(*) > 1
        )",
        [game_date],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::domain::prediction::{LineProvenance, LineSource, Recommendation};
    use crate::staging::StagingWriter;
    use crate::config::RetryConfig;
    use chrono::{NaiveDate, Utc};

    fn sample_record(prediction_id: &str, created_at_offset_secs: i64) -> crate::domain::prediction::PredictionRecord {
        let created_at = Utc::now() + chrono::Duration::seconds(created_at_offset_secs);
        crate::domain::prediction::PredictionRecord {
            prediction_id: prediction_id.to_string(),
            game_id: "g1".to_string(),
            player: "lebron-james".to_string(),
            system_id: "sys1".to_string(),
            game_date: NaiveDate::from_ymd_opt(2026, 1, 25).unwrap(),
            team: Some("LAL".to_string()),
            opponent: Some("BOS".to_string()),
            home_game: Some(true),
            current_points_line: Some(24.5),
            predicted_points: 27.0,
            confidence_score: Some(0.7),
            recommendation: Recommendation::Over,
            is_active: true,
            line_source: LineSource::ActualProp,
            provenance: LineProvenance::default(),
            estimated_line_value: Some(24.0),
            model_version: Some("v1".to_string()),
            feature_quality_score: Some(0.9),
            injury_status_at_prediction: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn lock_config() -> LockConfig {
        LockConfig {
            lease_secs: 300,
            retry_delay_secs: 0.01,
            max_attempts: 5,
            max_wait_secs: 1.0,
        }
    }

    #[tokio::test]
    async fn merges_one_worker_staging_table_into_main() {
        let store = Store::open_in_memory().unwrap();
        let writer = StagingWriter::new(store.clone(), RetryConfig::default(), "");
        writer
            .write(&[sample_record("pr1", 0)], "batch-1", "worker-1")
            .await
            .unwrap();

        let lock = DistributedLock::new(store.clone(), lock_config());
        let consolidator = Consolidator::new(store.clone(), lock, "");
        let result = consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();

        assert!(result.success);
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.staging_tables_cleaned, 1);

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn second_consolidation_of_same_batch_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let writer = StagingWriter::new(store.clone(), RetryConfig::default(), "");
        writer
            .write(&[sample_record("pr1", 0)], "batch-1", "worker-1")
            .await
            .unwrap();

        let lock = DistributedLock::new(store.clone(), lock_config());
        let consolidator = Consolidator::new(store.clone(), lock, "");
        consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();
        let second = consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();

        assert!(second.success);
        assert_eq!(second.rows_affected, 0);
        assert_eq!(second.staging_tables_merged, 0);
    }

    #[tokio::test]
    async fn keeps_only_newest_row_active_per_partition() {
        let store = Store::open_in_memory().unwrap();
        let writer = StagingWriter::new(store.clone(), RetryConfig::default(), "");
        writer
            .write(&[sample_record("pr1", -100)], "batch-1", "worker-1")
            .await
            .unwrap();
        writer
            .write(
                &[{
                    let mut r = sample_record("pr2", 0);
                    r.current_points_line = Some(26.0);
                    r
                }],
                "batch-1",
                "worker-2",
            )
            .await
            .unwrap();

        let lock = DistributedLock::new(store.clone(), lock_config());
        let consolidator = Consolidator::new(store.clone(), lock, "");
        consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();

        let active_count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM predictions WHERE is_active = 1 AND player = 'lebron-james'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(active_count, 1);
    }
}
