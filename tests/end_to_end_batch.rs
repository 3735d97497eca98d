//! End-to-end coverage of the full batch lifecycle: a worker produces
//! predictions, a staging writer deposits them, a consolidator lifts them
//! into the main table, and a grader scores them against a box score.
//!
//! Exercised through the public `propline_core` API only, the way
//! `tests/backtest_run_integration.rs` drives the teacher's orchestrator
//! directly rather than shelling out to the binary. Covers the two seed
//! scenarios from the grading/consolidation spec: an OVER hit and a DNP void.

use chrono::NaiveDate;
use propline_core::config::{LockConfig, RetryConfig};
use propline_core::domain::prediction::{LineProvenance, LineSource, PredictionRequest};
use propline_core::consolidate::Consolidator;
use propline_core::grade::Grader;
use propline_core::lock::DistributedLock;
use propline_core::staging::StagingWriter;
use propline_core::store::Store;
use propline_core::worker::{FeatureVector, MovingAverageBaseline, Worker};
use rusqlite::params;

fn lock_config() -> LockConfig {
    LockConfig {
        lease_secs: 300,
        retry_delay_secs: 0.01,
        max_attempts: 5,
        max_wait_secs: 1.0,
    }
}

fn request(player: &str, line: Option<f64>) -> PredictionRequest {
    PredictionRequest {
        player: player.to_string(),
        game_date: NaiveDate::from_ymd_opt(2026, 1, 25).unwrap(),
        game_id: "g1".to_string(),
        team: Some("LAL".to_string()),
        opponent: Some("BOS".to_string()),
        home_game: Some(true),
        projected_minutes: Some(34.0),
        line_values: vec![line],
        actual_prop_line: line,
        line_source: if line.is_some() {
            LineSource::ActualProp
        } else {
            LineSource::NoPropLine
        },
        provenance: LineProvenance::default(),
        estimated_line_value: Some(24.5),
        injury_status_at_prediction: None,
    }
}

async fn seed_box_score(store: &Store, player: &str, points: f64, minutes: Option<f64>) {
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

/// Scenario 1: a normal batch with one player whose prediction beats the
/// line and the box score confirms an OVER.
#[tokio::test]
async fn batch_to_grade_pipeline_scores_an_over_hit() {
    let store = Store::open_in_memory().unwrap();

    let worker = Worker::new(Box::new(MovingAverageBaseline::with_fixed(27.5, 0.72)), "catboost_v9");
    let req = request("lebron-james", Some(24.5));
    let features = FeatureVector::default();
    let records = worker.handle_request(&req, &features).unwrap();
    assert_eq!(records.len(), 1);

    let staging = StagingWriter::new(store.clone(), RetryConfig::default(), "propline");
    staging.write(&records, "batch-1", "worker-1").await.unwrap();

    let lock = DistributedLock::new(store.clone(), lock_config());
    let consolidator = Consolidator::new(store.clone(), lock, "propline");
    let consolidation = consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();
    assert!(consolidation.success);
    assert_eq!(consolidation.rows_affected, 1);

    seed_box_score(&store, "lebron-james", 30.0, Some(36.0)).await;

    let lock = DistributedLock::new(store.clone(), lock_config());
    let grader = Grader::new(store.clone(), lock);
    let summary = grader.grade_date("2026-01-25").await.unwrap();

    assert_eq!(summary.graded, 1);
    assert_eq!(summary.voided_count, 0);

    let (prediction_correct, absolute_error): (i64, f64) = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT prediction_correct, absolute_error FROM prediction_accuracy \
                 WHERE player = 'lebron-james'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(prediction_correct, 1);
    assert!((absolute_error - 2.5).abs() < 1e-9);
}

/// Scenario 2: the same pipeline, but the box score shows a DNP with a
/// confirmed pre-game injury flag — the graded row must be voided rather
/// than scored as a miss.
#[tokio::test]
async fn batch_to_grade_pipeline_voids_a_confirmed_dnp() {
    let store = Store::open_in_memory().unwrap();

    let worker = Worker::new(Box::new(MovingAverageBaseline::with_fixed(22.0, 0.5)), "catboost_v9");
    let mut req = request("injured-guy", Some(20.0));
    req.injury_status_at_prediction = Some("OUT".to_string());
    let features = FeatureVector::default();
    let records = worker.handle_request(&req, &features).unwrap();

    let staging = StagingWriter::new(store.clone(), RetryConfig::default(), "propline");
    staging.write(&records, "batch-1", "worker-1").await.unwrap();

    let lock = DistributedLock::new(store.clone(), lock_config());
    let consolidator = Consolidator::new(store.clone(), lock, "propline");
    consolidator.consolidate("batch-1", "2026-01-25").await.unwrap();

    seed_box_score(&store, "injured-guy", 0.0, Some(0.0)).await;

    let lock = DistributedLock::new(store.clone(), lock_config());
    let grader = Grader::new(store.clone(), lock);
    let summary = grader.grade_date("2026-01-25").await.unwrap();

    assert_eq!(summary.voided_count, 1);
    assert_eq!(summary.net_accuracy, 0.0);

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
