//! Per-worker staging writes: schema cloned from the main table,
//! append-only, never DML.
//!
//! Grounded on `predictions/shared/batch_staging_writer.py::BatchStagingWriter`.
//! `WRITE_APPEND` there lets multiple workers write to distinct staging
//! tables with no contention; the SQLite realization is a freshly-created
//! table per `(batch, worker)`, so there is likewise nothing to contend on.

use crate::domain::prediction::PredictionRecord;
use crate::retry::retry_with_backoff;
use crate::config::RetryConfig;
use crate::store::schema::staging_table_name;
use crate::store::sanitize::{sanitize_f64, sanitize_text};
use crate::store::Store;
use anyhow::Result;
use rusqlite::params;

#[derive(Debug, Clone)]
pub struct StagingWriteResult {
    pub staging_table_name: String,
    pub rows_written: usize,
    pub success: bool,
}

pub struct StagingWriter {
    store: Store,
    retry: RetryConfig,
    dataset_prefix: String,
}

impl StagingWriter {
    pub fn new(store: Store, retry: RetryConfig, dataset_prefix: impl Into<String>) -> Self {
        Self {
            store,
            retry,
            dataset_prefix: dataset_prefix.into(),
        }
    }

    pub async fn write(
        &self,
        records: &[PredictionRecord],
        batch_id: &str,
        worker_id: &str,
    ) -> Result<StagingWriteResult> {
        let table = staging_table_name(&self.dataset_prefix, batch_id, worker_id);
        let table_for_create = table.clone();

        retry_with_backoff(&self.retry, || {
            let table = table_for_create.clone();
            async move {
                self.store
                    .with_conn(move |conn| {
                        create_staging_table(conn, &table)?;
                        Ok(())
                    })
                    .await
            }
        })
        .await?;

        let records: Vec<PredictionRecord> = records.to_vec_sanitized();
        let table_for_write = table.clone();
        let rows_written = retry_with_backoff(&self.retry, || {
            let table = table_for_write.clone();
            let records = records.clone();
            async move {
                self.store
                    .with_conn_mut(move |conn| {
                        let tx = conn.transaction()?;
                        {
                            let sql = format!(
                                "INSERT INTO {table} \
                                 (prediction_id, game_id, player, system_id, game_date, team, opponent, \
                                  home_game, current_points_line, predicted_points, confidence_score, \
                                  recommendation, is_active, line_source, line_source_api, sportsbook, \
                                  line_minutes_before_game, was_line_fallback, estimated_line_value, \
                                  model_version, feature_quality_score, injury_status_at_prediction, \
                                  created_at, updated_at) \
                                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)"
                            );
                            let mut stmt = tx.prepare(&sql)?;
                            for r in &records {
                                stmt.execute(params![
                                    r.prediction_id,
                                    r.game_id,
                                    sanitize_text(&r.player),
                                    r.system_id,
                                    r.game_date.format("%Y-%m-%d").to_string(),
                                    r.team.as_deref().map(sanitize_text),
                                    r.opponent.as_deref().map(sanitize_text),
                                    r.home_game.map(|b| b as i64),
                                    r.current_points_line,
                                    r.predicted_points,
                                    r.confidence_score,
                                    sanitize_text(r.recommendation.as_str()),
                                    r.is_active as i64,
                                    sanitize_text(r.line_source.as_str()),
                                    r.provenance.line_source_api.as_deref().map(sanitize_text),
                                    r.provenance.sportsbook.as_deref().map(sanitize_text),
                                    r.provenance.line_minutes_before_game,
                                    r.provenance.was_line_fallback as i64,
                                    r.estimated_line_value,
                                    r.model_version.as_deref().map(sanitize_text),
                                    r.feature_quality_score,
                                    r.injury_status_at_prediction.as_deref().map(sanitize_text),
                                    r.created_at.to_rfc3339(),
                                    r.updated_at.to_rfc3339(),
                                ])?;
                            }
                        }
                        tx.commit()?;
                        Ok(records.len())
                    })
                    .await
            }
        })
        .await?;

        Ok(StagingWriteResult {
            staging_table_name: table,
            rows_written,
            success: true,
        })
    }
}

fn create_staging_table(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                prediction_id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                player TEXT NOT NULL,
                system_id TEXT NOT NULL,
                game_date TEXT NOT NULL,
                team TEXT,
                opponent TEXT,
                home_game INTEGER,
                current_points_line REAL,
                predicted_points REAL NOT NULL,
                confidence_score REAL,
                recommendation TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                line_source TEXT NOT NULL,
                line_source_api TEXT,
                sportsbook TEXT,
                line_minutes_before_game INTEGER,
                was_line_fallback INTEGER NOT NULL DEFAULT 0,
                estimated_line_value REAL,
                model_version TEXT,
                feature_quality_score REAL,
                injury_status_at_prediction TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ),
        [],
    )?;
    Ok(())
}

/// Route every numeric field through the centralized sanitizer before it's
/// eligible for a bound parameter.
trait SanitizeVec {
    fn to_vec_sanitized(&self) -> Vec<PredictionRecord>;
}

impl SanitizeVec for [PredictionRecord] {
    fn to_vec_sanitized(&self) -> Vec<PredictionRecord> {
        self.iter()
            .cloned()
            .map(|mut r| {
                r.predicted_points = sanitize_f64(r.predicted_points).unwrap_or(0.0);
                r.confidence_score = r.confidence_score.and_then(sanitize_f64);
                r.current_points_line = r.current_points_line.and_then(sanitize_f64);
                r.estimated_line_value = r.estimated_line_value.and_then(sanitize_f64);
                r.feature_quality_score = r.feature_quality_score.and_then(sanitize_f64);
                r
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::{LineProvenance, LineSource, Recommendation};
    use chrono::{NaiveDate, Utc};

    fn sample_record() -> PredictionRecord {
        PredictionRecord {
            prediction_id: "pr1".to_string(),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_records_to_a_fresh_staging_table() {
        let store = Store::open_in_memory().unwrap();
        let writer = StagingWriter::new(store.clone(), RetryConfig::default(), "");
        let result = writer
            .write(&[sample_record()], "batch-1", "worker-1")
            .await
            .unwrap();

        assert_eq!(result.rows_written, 1);
        assert!(result.success);

        let count: i64 = store
            .with_conn({
                let table = result.staging_table_name.clone();
                move |conn| {
                    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?)
                }
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn nan_confidence_is_sanitized_to_null() {
        let store = Store::open_in_memory().unwrap();
        let writer = StagingWriter::new(store.clone(), RetryConfig::default(), "");
        let mut record = sample_record();
        record.confidence_score = Some(f64::NAN);
        let result = writer.write(&[record], "batch-2", "worker-1").await.unwrap();

        let confidence: Option<f64> = store
            .with_conn({
                let table = result.staging_table_name.clone();
                move |conn| {
                    Ok(conn.query_row(
                        &format!("SELECT confidence_score FROM {table} LIMIT 1"),
                        [],
                        |row| row.get(0),
                    )?)
                }
            })
            .await
            .unwrap();
        assert_eq!(confidence, None);
    }
}
