//! Self-healing audit trail: `HealingTracker`, `GapDetector`, and stalled-batch
//! cleanup.
//!
//! Grounded on `shared/utils/healing_tracker.py::HealingTracker` (event
//! recording + pattern thresholds), `bin/monitoring/grading_gap_detector.py`
//! (gap detection + backfill trigger), and `bin/monitoring/auto_batch_cleanup.py`
//! (stalled-batch force-completion). The original splits live events into
//! Firestore and aggregates into BigQuery; here both collapse onto the one
//! `healing_events` table the store already serializes writes through.

use crate::alerts::AlertSink;
use crate::config::HealingConfig;
use crate::domain::healing::{AlertLevel, HealingEvent, HealingPattern};
use crate::grade::Grader;
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Records healing events and evaluates the event-rate / failure-rate
/// thresholds that determine whether an alert fires.
pub struct HealingTracker {
    store: Store,
    config: HealingConfig,
    alerts: Arc<dyn AlertSink>,
}

impl HealingTracker {
    pub fn new(store: Store, config: HealingConfig, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            config,
            alerts,
        }
    }

    /// Record one healing action and alert if the resulting pattern crosses
    /// a threshold. Mirrors `record_healing`: the write always succeeds
    /// (unless the store itself is down); pattern evaluation is best-effort
    /// and never blocks the caller on an alert-send failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        event_type: &str,
        trigger_reason: impl Into<String>,
        action_taken: impl Into<String>,
        before_state: Option<Value>,
        after_state: Option<Value>,
        success: bool,
        metadata: Option<Value>,
    ) -> Result<HealingEvent> {
        let event = HealingEvent {
            event_id: format!("heal_{}", Uuid::new_v4()),
            occurred_at: Utc::now(),
            event_type: event_type.to_string(),
            trigger_reason: trigger_reason.into(),
            action_taken: action_taken.into(),
            before_state,
            after_state,
            success,
            metadata,
        };

        self.insert(&event)
            .await
            .context("write healing event")?;

        match self.evaluate(event_type).await {
            Ok(Some(level)) => {
                let message = format!(
                    "{event_type}: {}",
                    event.trigger_reason
                );
                self.alerts.send(level, event_type, &message).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, event_type, "pattern evaluation failed"),
        }

        Ok(event)
    }

    async fn insert(&self, event: &HealingEvent) -> Result<()> {
        let event = event.clone();
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO healing_events \
                     (event_id, occurred_at, event_type, trigger_reason, action_taken, \
                      before_state, after_state, success, metadata) \
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        event.event_id,
                        event.occurred_at.to_rfc3339(),
                        event.event_type,
                        event.trigger_reason,
                        event.action_taken,
                        event.before_state.as_ref().map(|v| v.to_string()),
                        event.after_state.as_ref().map(|v| v.to_string()),
                        event.success as i64,
                        event.metadata.as_ref().map(|v| v.to_string()),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Count events and failures of `event_type` in the trailing `window_hours`.
    pub async fn check_pattern(&self, event_type: &str, window_hours: i64) -> Result<HealingPattern> {
        let since = (Utc::now() - Duration::hours(window_hours)).to_rfc3339();
        let event_type = event_type.to_string();
        self.store
            .with_conn(move |conn| {
                let (event_count, failure_count): (i64, i64) = conn.query_row(
                    "SELECT COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) \
                     FROM healing_events WHERE event_type = ?1 AND occurred_at >= ?2",
                    params![event_type, since],
                    |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0))),
                )?;
                Ok(HealingPattern {
                    event_count: event_count as u32,
                    failure_count: failure_count as u32,
                })
            })
            .await
    }

    /// Evaluate both the yellow-window and red-window patterns for
    /// `event_type`, returning the more severe of the two alert levels.
    async fn evaluate(&self, event_type: &str) -> Result<Option<AlertLevel>> {
        let short = self
            .check_pattern(event_type, self.config.yellow_window_hours)
            .await?;
        let long = self
            .check_pattern(event_type, self.config.red_window_hours)
            .await?;

        let level_short = short.alert_level(
            self.config.yellow_count,
            self.config.red_count,
            self.config.critical_failure_rate_pct,
        );
        let level_long = long.alert_level(
            self.config.yellow_count,
            self.config.red_count,
            self.config.critical_failure_rate_pct,
        );

        Ok(higher_severity(level_short, level_long))
    }
}

fn higher_severity(a: Option<AlertLevel>, b: Option<AlertLevel>) -> Option<AlertLevel> {
    fn rank(level: AlertLevel) -> u8 {
        match level {
            AlertLevel::Yellow => 1,
            AlertLevel::Red => 2,
            AlertLevel::Critical => 3,
        }
    }
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(if rank(x) >= rank(y) { x } else { y }),
    }
}

/// A single date whose graded-prediction ratio has fallen below threshold.
#[derive(Debug, Clone, Serialize)]
pub struct GradingGap {
    pub game_date: String,
    pub gradable: i64,
    pub graded: i64,
    pub grading_pct: f64,
    pub status: &'static str,
}

/// Detects dates with incomplete grading coverage and, when wired to a
/// `Grader`, triggers a backfill for each.
///
/// Grounded on `grading_gap_detector.py::detect_grading_gaps`. "Gradable"
/// here means an active prediction carrying a real line (`ACTUAL_PROP`,
/// never the `20.0` placeholder) — the original's looser `line_source IN
/// (...)` filter collapses onto that single source value in this core since
/// `NO_PROP_LINE`/`NEEDS_BOOTSTRAP` rows were never eligible to grade.
pub struct GapDetector {
    store: Store,
    config: HealingConfig,
    tracker: HealingTracker,
}

impl GapDetector {
    pub fn new(store: Store, config: HealingConfig, tracker: HealingTracker) -> Self {
        Self {
            store,
            config,
            tracker,
        }
    }

    pub async fn detect_gaps(&self, lookback_days: i64) -> Result<Vec<GradingGap>> {
        let since = (Utc::now().date_naive() - Duration::days(lookback_days))
            .format("%Y-%m-%d")
            .to_string();
        let threshold = self.config.gap_threshold_pct;

        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.game_date, \
                            COUNT(DISTINCT p.player || '|' || p.system_id) AS gradable, \
                            (SELECT COUNT(*) FROM prediction_accuracy a WHERE a.game_date = p.game_date) AS graded \
                     FROM predictions p \
                     WHERE p.game_date >= ?1 \
                       AND p.is_active = 1 \
                       AND p.line_source = 'ACTUAL_PROP' \
                       AND p.current_points_line IS NOT NULL \
                       AND p.current_points_line != 20.0 \
                     GROUP BY p.game_date \
                     ORDER BY p.game_date DESC",
                )?;
                let rows = stmt.query_map(params![since], |row| {
                    let game_date: String = row.get(0)?;
                    let gradable: i64 = row.get(1)?;
                    let graded: i64 = row.get(2)?;
                    Ok((game_date, gradable, graded))
                })?;

                let mut gaps = Vec::new();
                for row in rows {
                    let (game_date, gradable, graded) = row?;
                    let grading_pct = if gradable > 0 {
                        (graded as f64 / gradable as f64) * 100.0
                    } else {
                        100.0
                    };
                    if grading_pct < threshold {
                        let status = if graded == 0 { "missing" } else { "gap" };
                        gaps.push(GradingGap {
                            game_date,
                            gradable,
                            graded,
                            grading_pct,
                            status,
                        });
                    }
                }
                Ok(gaps)
            })
            .await
    }

    /// Detect gaps and, for each one, run `grader.grade_date` as the
    /// backfill action, recording a healing event whether it succeeds or
    /// fails. Grounded on `grading_gap_detector.py::trigger_grading_backfill`.
    pub async fn detect_and_backfill(
        &self,
        lookback_days: i64,
        grader: &Grader,
    ) -> Result<Vec<GradingGap>> {
        let gaps = self.detect_gaps(lookback_days).await?;

        for gap in &gaps {
            let before = serde_json::json!({
                "gradable": gap.gradable,
                "graded": gap.graded,
                "grading_pct": gap.grading_pct,
            });

            match grader.grade_date(&gap.game_date).await {
                Ok(summary) => {
                    let after = serde_json::json!({
                        "gradable": gap.gradable,
                        "graded": summary.graded,
                    });
                    self.tracker
                        .record(
                            "grading_gap_backfill",
                            format!(
                                "{} graded at {:.1}% (below {:.0}% threshold)",
                                gap.game_date, gap.grading_pct, self.config.gap_threshold_pct
                            ),
                            format!("re-graded {} via BACKFILL", gap.game_date),
                            Some(before),
                            Some(after),
                            true,
                            None,
                        )
                        .await?;
                }
                Err(e) => {
                    self.tracker
                        .record(
                            "grading_gap_backfill",
                            format!("{} graded at {:.1}%", gap.game_date, gap.grading_pct),
                            format!("attempted re-grade of {}, failed: {e}", gap.game_date),
                            Some(before),
                            None,
                            false,
                            None,
                        )
                        .await?;
                }
            }
        }

        Ok(gaps)
    }
}

/// A batch forced to completion because it stalled past the workers'
/// reasonable finishing window.
#[derive(Debug, Clone, Serialize)]
pub struct StalledBatchCleanup {
    pub batch_id: String,
    pub game_date: String,
    pub completion_pct: f64,
}

/// Finds and force-completes `prediction_batches` rows stuck below 100%
/// completion past the stall window.
///
/// Grounded on `auto_batch_cleanup.py::get_stalled_batches` /
/// `cleanup_batch`. The original force-completes by writing
/// `is_complete: True` directly to the batch document; this does the same
/// against the `prediction_batches` row.
pub struct BatchMonitor {
    store: Store,
    config: HealingConfig,
    tracker: HealingTracker,
}

impl BatchMonitor {
    pub fn new(store: Store, config: HealingConfig, tracker: HealingTracker) -> Self {
        Self {
            store,
            config,
            tracker,
        }
    }

    pub async fn cleanup_stalled_batches(&self) -> Result<Vec<StalledBatchCleanup>> {
        let stall_cutoff = (Utc::now() - Duration::minutes(self.config.stall_threshold_minutes))
            .to_rfc3339();
        let min_created_at = (Utc::now() - Duration::hours(self.config.max_batch_age_hours))
            .to_rfc3339();
        let min_completion_pct = self.config.min_completion_pct;

        let candidates = self
            .store
            .with_conn({
                let stall_cutoff = stall_cutoff.clone();
                let min_created_at = min_created_at.clone();
                move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT batch_id, game_date, completion_pct \
                         FROM prediction_batches \
                         WHERE is_complete = 0 \
                           AND updated_at <= ?1 \
                           AND created_at >= ?2 \
                           AND completion_pct >= ?3",
                    )?;
                    let rows = stmt.query_map(
                        params![stall_cutoff, min_created_at, min_completion_pct],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, f64>(2)?,
                            ))
                        },
                    )?;
                    let mut out = Vec::new();
                    for r in rows {
                        out.push(r?);
                    }
                    Ok(out)
                }
            })
            .await?;

        let mut cleaned = Vec::with_capacity(candidates.len());
        for (batch_id, game_date, completion_pct) in candidates {
            let now = Utc::now().to_rfc3339();
            let batch_id_for_update = batch_id.clone();
            self.store
                .with_conn({
                    let now = now.clone();
                    move |conn| {
                        conn.execute(
                            "UPDATE prediction_batches \
                             SET is_complete = 1, completion_pct = 100.0, updated_at = ?1 \
                             WHERE batch_id = ?2",
                            params![now, batch_id_for_update],
                        )?;
                        Ok(())
                    }
                })
                .await
                .context("force-complete stalled batch")?;

            self.tracker
                .record(
                    "batch_cleanup",
                    format!(
                        "batch {batch_id} stalled at {completion_pct:.1}% past {} min",
                        self.config.stall_threshold_minutes
                    ),
                    format!("force-completed batch {batch_id}"),
                    Some(serde_json::json!({
                        "completion_pct": completion_pct,
                        "is_complete": false,
                    })),
                    Some(serde_json::json!({
                        "completion_pct": 100.0,
                        "is_complete": true,
                    })),
                    true,
                    Some(serde_json::json!({"batch_id": batch_id, "game_date": game_date})),
                )
                .await?;

            cleaned.push(StalledBatchCleanup {
                batch_id,
                game_date,
                completion_pct,
            });
        }

        Ok(cleaned)
    }
}

/// Inserts and updates the lifecycle row a batch is tracked under in
/// `prediction_batches`, consulted by `GapDetector` and `BatchMonitor`.
pub async fn start_batch(
    store: &Store,
    batch_id: &str,
    game_date: &str,
    mode: &str,
    total_requests: i64,
) -> Result<()> {
    let batch_id = batch_id.to_string();
    let game_date = game_date.to_string();
    let mode = mode.to_string();
    let now = Utc::now().to_rfc3339();
    store
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO prediction_batches \
                 (batch_id, game_date, mode, total_requests, completion_pct, is_complete, created_at, updated_at) \
                 VALUES (?1,?2,?3,?4,0,0,?5,?5)",
                params![batch_id, game_date, mode, total_requests, now],
            )?;
            Ok(())
        })
        .await
}

/// Marks a batch complete once every worker has finished.
pub async fn complete_batch(store: &Store, batch_id: &str) -> Result<()> {
    let batch_id = batch_id.to_string();
    let now = Utc::now().to_rfc3339();
    store
        .with_conn(move |conn| {
            conn.execute(
                "UPDATE prediction_batches SET completion_pct = 100.0, is_complete = 1, updated_at = ?1 \
                 WHERE batch_id = ?2",
                params![now, batch_id],
            )?;
            Ok(())
        })
        .await
}
