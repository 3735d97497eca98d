//! Grade active predictions against actual box-score outcomes.
//!
//! Grounded on `data_processors/grading/prediction_accuracy/prediction_accuracy_processor.py`.
//! Per the open question recorded in `DESIGN.md`, the per-date DELETE and
//! batch INSERT run inside a single transaction rather than as two
//! independent statements, so a crash mid-write rolls back to the
//! pre-DELETE state instead of losing a date's accuracy data.

use crate::domain::grading::{
    classify_void_reason, confidence_decile, is_dnp, normalize_confidence, prediction_correct,
    summarize, GradedPrediction, GradingSummary, VoidReason,
};
use crate::domain::prediction::Recommendation;
use crate::lock::{DistributedLock, LockType};
use crate::store::sanitize::{round_to, sanitize_f64, sanitize_text};
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

pub struct Grader {
    store: Store,
    lock: DistributedLock,
}

struct ActivePrediction {
    player: String,
    game_id: String,
    system_id: String,
    line_value: Option<f64>,
    predicted_points: f64,
    confidence_score: Option<f64>,
    recommendation: Recommendation,
    injury_status_at_prediction: Option<String>,
}

struct ActualOutcome {
    actual_points: f64,
    minutes_played: Option<f64>,
}

impl Grader {
    pub fn new(store: Store, lock: DistributedLock) -> Self {
        Self { store, lock }
    }

    pub async fn grade_date(&self, game_date: &str) -> Result<GradingSummary> {
        let handle = match self
            .lock
            .acquire(LockType::Grading, game_date, "grade_date")
            .await
        {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    game_date,
                    "grading lock unavailable; proceeding WITHOUT lock, relying on post-write validation"
                );
                None
            }
        };

        let result = self.grade_date_inner(game_date).await;

        if let Some(handle) = handle {
            handle.release().await;
        }

        result
    }

    async fn grade_date_inner(&self, game_date: &str) -> Result<GradingSummary> {
        let predictions = self.active_predictions(game_date).await?;
        let predictions_found = predictions.len();

        let mut rows = Vec::with_capacity(predictions.len());
        let mut actuals_found = 0usize;

        for prediction in predictions {
            let Some(outcome) = self
                .actual_outcome(&prediction.player, &prediction.game_id)
                .await?
            else {
                continue;
            };
            actuals_found += 1;
            rows.push(self.grade_one(&prediction, &outcome, game_date).await?);
        }

        let game_date_owned = game_date.to_string();
        self.store
            .with_conn_mut({
                let rows = rows.clone();
                let game_date_owned = game_date_owned.clone();
                move |conn| write_graded_rows(conn, &game_date_owned, &rows)
            })
            .await
            .context("grading write transaction")?;

        let duplicate_count = self
            .store
            .with_conn({
                let game_date_owned = game_date_owned.clone();
                move |conn| count_duplicate_accuracy_keys(conn, &game_date_owned)
            })
            .await?;

        if duplicate_count > 0 {
            tracing::error!(
                game_date,
                duplicate_count,
                "post-write validation found duplicate accuracy keys"
            );
        }

        let mut summary = summarize(&rows);
        summary.predictions_found = predictions_found;
        summary.actuals_found = actuals_found;
        summary.duplicate_count = duplicate_count;
        Ok(summary)
    }

    async fn grade_one(
        &self,
        prediction: &ActivePrediction,
        outcome: &ActualOutcome,
        game_date: &str,
    ) -> Result<GradedPrediction> {
        let actual_points = outcome.actual_points;
        let predicted_points = prediction.predicted_points;
        let absolute_error = round_to((predicted_points - actual_points).abs(), 2);
        let signed_error = round_to(predicted_points - actual_points, 2);

        let (predicted_margin, actual_margin) = match prediction.line_value {
            Some(line) => (
                Some(round_to(predicted_points - line, 2)),
                Some(round_to(actual_points - line, 2)),
            ),
            None => (None, None),
        };

        let mut is_voided = false;
        let mut void_reason: Option<VoidReason> = None;
        let mut correct = prediction_correct(
            prediction.recommendation,
            actual_points,
            prediction.line_value,
        );

        if is_dnp(actual_points, outcome.minutes_played) {
            is_voided = true;
            let retroactive = self
                .retroactive_injury_status(&prediction.player, game_date)
                .await?;
            void_reason = Some(classify_void_reason(
                prediction.injury_status_at_prediction.as_deref(),
                retroactive.as_deref(),
            ));
            correct = None;
        }

        let confidence_score = prediction.confidence_score.map(normalize_confidence);
        let decile = confidence_score.map(confidence_decile);

        Ok(GradedPrediction {
            accuracy_id: Uuid::new_v4().to_string(),
            player: prediction.player.clone(),
            game_id: prediction.game_id.clone(),
            system_id: prediction.system_id.clone(),
            game_date: chrono::NaiveDate::parse_from_str(game_date, "%Y-%m-%d")?,
            line_value: prediction.line_value,
            predicted_points,
            actual_points,
            absolute_error,
            signed_error,
            within_3_points: absolute_error <= 3.0,
            within_5_points: absolute_error <= 5.0,
            predicted_margin,
            actual_margin,
            recommendation: prediction.recommendation,
            prediction_correct: correct,
            confidence_score,
            confidence_decile: decile,
            is_voided,
            void_reason,
            graded_at: Utc::now(),
        })
    }

    async fn active_predictions(&self, game_date: &str) -> Result<Vec<ActivePrediction>> {
        let game_date = game_date.to_string();
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT player, game_id, system_id, current_points_line, predicted_points, \
                     confidence_score, recommendation, injury_status_at_prediction \
                     FROM predictions WHERE game_date = ?1 AND is_active = 1",
                )?;
                let rows = stmt.query_map([game_date], |row| {
                    let recommendation: String = row.get(6)?;
                    Ok(ActivePrediction {
                        player: row.get(0)?,
                        game_id: row.get(1)?,
                        system_id: row.get(2)?,
                        line_value: row.get(3)?,
                        predicted_points: row.get(4)?,
                        confidence_score: row.get(5)?,
                        recommendation: Recommendation::parse(&recommendation)
                            .unwrap_or(Recommendation::Pass),
                        injury_status_at_prediction: row.get(7)?,
                    })
                })?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })
            .await
    }

    async fn actual_outcome(
        &self,
        player: &str,
        game_id: &str,
    ) -> Result<Option<ActualOutcome>> {
        let player = player.to_string();
        let game_id = game_id.to_string();
        self.store
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT points, minutes_played FROM player_game_summary \
                         WHERE player = ?1 AND game_id = ?2",
                        params![player, game_id],
                        |row| {
                            Ok(ActualOutcome {
                                actual_points: row.get(0)?,
                                minutes_played: row.get(1)?,
                            })
                        },
                    )
                    .ok())
            })
            .await
    }

    async fn retroactive_injury_status(
        &self,
        player: &str,
        game_date: &str,
    ) -> Result<Option<String>> {
        let player = player.to_string();
        let game_date = game_date.to_string();
        self.store
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT injury_status FROM injury_report \
                         WHERE player = ?1 AND game_date = ?2 \
                         ORDER BY report_date DESC LIMIT 1",
                        params![player, game_date],
                        |row| row.get(0),
                    )
                    .ok())
            })
            .await
    }
}

fn write_graded_rows(
    conn: &mut Connection,
    game_date: &str,
    rows: &[GradedPrediction],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM prediction_accuracy WHERE game_date = ?1",
        [game_date],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO prediction_accuracy \
             (accuracy_id, player, game_id, system_id, game_date, line_value, predicted_points, \
              actual_points, absolute_error, signed_error, within_3_points, within_5_points, \
              predicted_margin, actual_margin, recommendation, prediction_correct, \
              confidence_score, confidence_decile, is_voided, void_reason, graded_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.accuracy_id,
                sanitize_text(&row.player),
                row.game_id,
                row.system_id,
                row.game_date.format("%Y-%m-%d").to_string(),
                row.line_value.and_then(sanitize_f64),
                sanitize_f64(row.predicted_points).unwrap_or(0.0),
                sanitize_f64(row.actual_points).unwrap_or(0.0),
                row.absolute_error,
                row.signed_error,
                row.within_3_points as i64,
                row.within_5_points as i64,
                row.predicted_margin,
                row.actual_margin,
                sanitize_text(row.recommendation.as_str()),
                row.prediction_correct.map(|b| b as i64),
                row.confidence_score,
                row.confidence_decile,
                row.is_voided as i64,
                row.void_reason.map(|v| sanitize_text(v.as_str())),
                row.graded_at.to_rfc3339(),
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn count_duplicate_accuracy_keys(conn: &Connection, game_date: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT player, game_id, system_id, COALESCE(line_value, -1)
            FROM prediction_accuracy
            WHERE game_date = ?1
            GROUP BY player, game_id, system_id, COALESCE(line_value, -1)
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

    fn lock_config() -> LockConfig {
        LockConfig {
            lease_secs: 300,
            retry_delay_secs: 0.01,
            max_attempts: 5,
            max_wait_secs: 1.0,
        }
    }

    async fn seed_prediction(
        store: &Store,
        player: &str,
        line: Option<f64>,
        predicted: f64,
        recommendation: &str,
    ) {
        let player = player.to_string();
        let recommendation = recommendation.to_string();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO predictions \
                     (prediction_id, game_id, player, system_id, game_date, current_points_line, \
                      predicted_points, recommendation, is_active, line_source, created_at, updated_at) \
                     VALUES (?1, 'g1', ?2, 'sys1', '2026-01-25', ?3, ?4, ?5, 1, 'ACTUAL_PROP', \
                      '2026-01-25T00:00:00Z', '2026-01-25T00:00:00Z')",
                    params![uuid::Uuid::new_v4().to_string(), player, line, predicted, recommendation],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    async fn seed_outcome(store: &Store, player: &str, points: f64, minutes: Option<f64>) {
        let player = player.to_string();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO player_game_summary (player, game_date, game_id, points, minutes_played) \
                     VALUES (?1, '2026-01-25', 'g1', ?2, ?3)",
                    params![player, points, minutes],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn grades_an_over_hit() {
        let store = Store::open_in_memory().unwrap();
        seed_prediction(&store, "lebron-james", Some(24.5), 27.5, "OVER").await;
        seed_outcome(&store, "lebron-james", 30.0, Some(36.0)).await;

        let lock = DistributedLock::new(store.clone(), lock_config());
        let grader = Grader::new(store, lock);
        let summary = grader.grade_date("2026-01-25").await.unwrap();

        assert_eq!(summary.predictions_found, 1);
        assert_eq!(summary.actuals_found, 1);
        assert_eq!(summary.graded, 1);
    }

    #[tokio::test]
    async fn voids_dnp_with_confirmed_injury() {
        let store = Store::open_in_memory().unwrap();
        seed_prediction(&store, "injured-guy", Some(20.0), 22.0, "OVER").await;
        seed_outcome(&store, "injured-guy", 0.0, Some(0.0)).await;
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO injury_report (player, game_date, report_date, injury_status) \
                     VALUES ('injured-guy', '2026-01-25', '2026-01-25', 'OUT')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let lock = DistributedLock::new(store.clone(), lock_config());
        let grader = Grader::new(store.clone(), lock);
        grader.grade_date("2026-01-25").await.unwrap();

        let (is_voided, void_reason): (i64, String) = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT is_voided, void_reason FROM prediction_accuracy WHERE player = 'injured-guy'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(is_voided, 1);
        assert_eq!(void_reason, "dnp_injury_confirmed");
    }

    #[tokio::test]
    async fn regrading_the_same_date_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        seed_prediction(&store, "lebron-james", Some(24.5), 27.5, "OVER").await;
        seed_outcome(&store, "lebron-james", 30.0, Some(36.0)).await;

        let lock = DistributedLock::new(store.clone(), lock_config());
        let grader = Grader::new(store.clone(), lock);
        grader.grade_date("2026-01-25").await.unwrap();
        let second = grader.grade_date("2026-01-25").await.unwrap();

        assert_eq!(second.graded, 1);
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM prediction_accuracy", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
