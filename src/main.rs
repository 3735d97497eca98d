//! CLI adapter for the prediction orchestration core.
//!
//! Binds the five operations described in the operational surface
//! (`start-batch`, `consolidate`, `grade`, `detect-gaps`, `cleanup-stalled`)
//! to `clap` subcommands. Adapters for other transports (HTTP, a scheduler
//! trigger) would call the same library functions this binary calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use rusqlite::params;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use propline_core::alerts::{AlertSink, LogAlertSink};
use propline_core::cache::TtlCache;
use propline_core::config::AppConfig;
use propline_core::consolidate::{ConsolidationResult, Consolidator};
use propline_core::domain::prediction::PredictionRecord;
use propline_core::error::OperationStatus;
use propline_core::grade::Grader;
use propline_core::healing::{self, BatchMonitor, GapDetector, HealingTracker};
use propline_core::lines::{LineResolver, LineResolverConfig};
use propline_core::lock::DistributedLock;
use propline_core::slate::SlateBuilder;
use propline_core::staging::StagingWriter;
use propline_core::store::Store;
use propline_core::worker::{FeatureVector, MovingAverageBaseline, PredictModel, Worker};

/// Model identity recorded on every prediction this binary writes. A real
/// deployment runs one of these per trained system; this core ships only
/// the reference baseline (inference quality is out of scope).
const SYSTEM_ID: &str = "catboost_v9";

#[derive(Parser)]
#[command(name = "propline", about = "NBA player-prop prediction orchestration core")]
struct Cli {
    /// Path to a TOML config file. Defaults to `PROPLINE_CONFIG_PATH` or
    /// `propline_config.toml`, falling back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `db_path` from the loaded config.
    #[arg(long, env = "PROPLINE_DB_PATH")]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a slate for a date and fan out prediction requests to workers.
    StartBatch {
        game_date: NaiveDate,
        #[arg(long, value_enum, default_value_t = BatchMode::First)]
        mode: BatchMode,
        /// Reuses an existing batch id instead of minting a fresh one.
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Consolidate a batch's staging tables into the main predictions table.
    Consolidate { batch_id: String, game_date: String },
    /// Grade a date's active predictions against actual box scores.
    Grade { game_date: String },
    /// Scan recent dates for incomplete grading coverage.
    DetectGaps {
        #[arg(long, default_value_t = 14)]
        lookback_days: i64,
        /// Re-grade every gap found via the Grader, under its lock.
        #[arg(long)]
        backfill: bool,
    },
    /// Force-complete batches stalled past the completion window.
    CleanupStalled,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BatchMode {
    First,
    Retry,
    FinalRetry,
    LastCall,
    Backfill,
    CheckLines,
}

impl BatchMode {
    fn as_str(self) -> &'static str {
        match self {
            BatchMode::First => "FIRST",
            BatchMode::Retry => "RETRY",
            BatchMode::FinalRetry => "FINAL_RETRY",
            BatchMode::LastCall => "LAST_CALL",
            BatchMode::Backfill => "BACKFILL",
            BatchMode::CheckLines => "CHECK_LINES",
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %path.display(), "failed to load config file, using defaults");
            AppConfig::default()
        }),
        None => AppConfig::from_env(),
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }

    let status = match run(config, cli.command).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(error = %e, "operation aborted with an unrecoverable error");
            OperationStatus::Critical
        }
    };

    tracing::info!(%status, exit_code = status.exit_code(), "operation complete");
    std::process::exit(status.exit_code());
}

async fn run(config: AppConfig, command: Command) -> Result<OperationStatus> {
    let store = Store::open(&config.db_path)?;

    match command {
        Command::StartBatch {
            game_date,
            mode,
            batch_id,
        } => start_batch(store, config, game_date, mode, batch_id).await,
        Command::Consolidate { batch_id, game_date } => {
            run_consolidate(store, config, &batch_id, &game_date).await
        }
        Command::Grade { game_date } => run_grade(store, config, &game_date).await,
        Command::DetectGaps {
            lookback_days,
            backfill,
        } => run_detect_gaps(store, config, lookback_days, backfill).await,
        Command::CleanupStalled => run_cleanup_stalled(store, config).await,
    }
}

/// Build the slate, run inference for every request across a thread pool
/// (the in-process stand-in for the worker fleet), stage each "worker"'s
/// output, then consolidate. Mirrors the data-flow diagram in SPEC_FULL §2:
/// `SlateBuilder -> [fan-out] -> StagingWriter -> Consolidator`.
async fn start_batch(
    store: Store,
    config: AppConfig,
    game_date: NaiveDate,
    mode: BatchMode,
    batch_id: Option<String>,
) -> Result<OperationStatus> {
    let date_str = game_date.format("%Y-%m-%d").to_string();
    let batch_id = batch_id.unwrap_or_else(|| format!("{date_str}-{}", uuid::Uuid::new_v4()));

    let lines = LineResolver::new(
        store.clone(),
        LineResolverConfig {
            enable_estimation: !matches!(mode, BatchMode::LastCall),
            min_games_required: 3,
        },
    );

    let mut slate_config = config.slate.clone();
    match mode {
        BatchMode::LastCall => slate_config.require_real_lines = true,
        BatchMode::Backfill => slate_config.use_multiple_lines = true,
        _ => {}
    }
    let slate_builder = SlateBuilder::new(store.clone(), lines, slate_config.clone());

    if matches!(mode, BatchMode::CheckLines) {
        let stale = slate_builder
            .find_stale_predictions(game_date, slate_config.stale_threshold)
            .await?;
        tracing::info!(game_date = %date_str, stale_count = stale.len(), "stale-line check complete");
        return Ok(if stale.is_empty() {
            OperationStatus::NoData
        } else {
            OperationStatus::Success
        });
    }

    let requests = slate_builder.build_slate(game_date).await?;
    if requests.is_empty() {
        tracing::warn!(game_date = %date_str, "slate is empty, nothing to predict");
        return Ok(OperationStatus::NoData);
    }

    healing::start_batch(
        &store,
        &batch_id,
        &date_str,
        mode.as_str(),
        requests.len() as i64,
    )
    .await?;

    // Per-worker feature cache: one batch shares a single cache instance,
    // indexed by player, TTL'd the way "today" data is per SPEC_FULL §5.
    let feature_cache: TtlCache<FeatureVector> = TtlCache::new(
        Duration::from_secs(config.cache.ttl_same_day_secs),
        Some(config.cache.max_entries),
        "worker_feature_cache",
    );

    let mut features = Vec::with_capacity(requests.len());
    for request in &requests {
        if let Some(cached) = feature_cache.get(&request.player) {
            features.push(cached);
            continue;
        }
        let loaded = load_feature_vector(&store, &request.player).await?;
        feature_cache.set(request.player.clone(), loaded.clone(), None);
        features.push(loaded);
    }
    tracing::debug!(
        cache = feature_cache.name(),
        hit_rate = feature_cache.metrics().hit_rate(),
        "feature cache stats for batch"
    );

    // Inference is synchronous and CPU-bound; fan it out across a thread
    // pool the way the fleet fans requests out across worker processes —
    // one request in, one worker invocation, per SPEC_FULL §4.4.
    let outputs: Vec<(usize, Result<Vec<PredictionRecord>>)> = requests
        .par_iter()
        .zip(features.par_iter())
        .enumerate()
        .map(|(idx, (request, feature_vector))| {
            let model: Box<dyn PredictModel> = Box::new(MovingAverageBaseline::new());
            let worker = Worker::new(model, SYSTEM_ID);
            (idx, worker.handle_request(request, feature_vector))
        })
        .collect();

    let staging_writer = StagingWriter::new(
        store.clone(),
        config.retry.clone(),
        config.dataset_prefix.clone(),
    );
    let mut staged = 0usize;
    let mut failed = 0usize;
    for (idx, result) in outputs {
        match result {
            Ok(records) => {
                let worker_id = format!("w{idx}");
                match staging_writer.write(&records, &batch_id, &worker_id).await {
                    Ok(res) => staged += res.rows_written,
                    Err(e) => {
                        failed += 1;
                        tracing::error!(error = %e, worker_id, "staging write failed");
                    }
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, request_idx = idx, "worker inference failed");
            }
        }
    }

    healing::complete_batch(&store, &batch_id).await?;
    tracing::info!(
        batch_id,
        staged,
        failed,
        requests = requests.len(),
        "batch fan-out complete"
    );

    let lock = DistributedLock::new(store.clone(), config.lock.clone());
    let consolidator = Consolidator::new(store, lock, config.dataset_prefix.clone());
    let result = consolidator.consolidate(&batch_id, &date_str).await?;
    status_from_consolidation(&result)
}

/// Batch-load up to the last 30 games for `player`, the way a feature store
/// integration would hand the worker a feature vector (FeatureStore itself
/// is external to this core per SPEC_FULL §1).
async fn load_feature_vector(store: &Store, player: &str) -> Result<FeatureVector> {
    let player = player.to_string();
    store
        .with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT points, minutes_played FROM player_game_summary \
                 WHERE player = ?1 ORDER BY game_date DESC LIMIT 30",
            )?;
            let rows = stmt.query_map(params![player], |row| {
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                ))
            })?;

            let mut points_last_5 = Vec::new();
            let mut points_last_10 = Vec::new();
            let mut minutes_last_5 = Vec::new();
            for (i, row) in rows.enumerate() {
                let (points, minutes) = row?;
                if i < 10 {
                    if let Some(p) = points {
                        points_last_10.push(p);
                    }
                }
                if i < 5 {
                    if let Some(p) = points {
                        points_last_5.push(p);
                    }
                    if let Some(m) = minutes {
                        minutes_last_5.push(m);
                    }
                }
            }
            let quality_score = (points_last_5.len() as f64 / 5.0).min(1.0);

            Ok(FeatureVector {
                points_last_5,
                points_last_10,
                minutes_last_5,
                quality_score,
            })
        })
        .await
}

fn status_from_consolidation(result: &ConsolidationResult) -> Result<OperationStatus> {
    Ok(if result.duplicate_count > 0 {
        OperationStatus::DuplicatesDetected
    } else if !result.success {
        OperationStatus::WriteFailed
    } else {
        OperationStatus::Success
    })
}

async fn run_consolidate(
    store: Store,
    config: AppConfig,
    batch_id: &str,
    game_date: &str,
) -> Result<OperationStatus> {
    let lock = DistributedLock::new(store.clone(), config.lock.clone());
    let consolidator = Consolidator::new(store, lock, config.dataset_prefix.clone());
    let result = consolidator.consolidate(batch_id, game_date).await?;
    tracing::info!(?result, "consolidation result");
    status_from_consolidation(&result)
}

async fn run_grade(store: Store, config: AppConfig, game_date: &str) -> Result<OperationStatus> {
    let lock = DistributedLock::new(store.clone(), config.lock.clone());
    let grader = Grader::new(store, lock);
    let summary = grader.grade_date(game_date).await?;
    tracing::info!(
        predictions_found = summary.predictions_found,
        actuals_found = summary.actuals_found,
        graded = summary.graded,
        mae = summary.mae,
        bias = summary.bias,
        recommendation_accuracy = summary.recommendation_accuracy,
        net_accuracy = summary.net_accuracy,
        voided_count = summary.voided_count,
        duplicate_count = summary.duplicate_count,
        "grading complete"
    );

    Ok(if summary.duplicate_count > 0 {
        OperationStatus::DuplicatesDetected
    } else if summary.predictions_found == 0 {
        OperationStatus::NoData
    } else {
        OperationStatus::Success
    })
}

async fn run_detect_gaps(
    store: Store,
    config: AppConfig,
    lookback_days: i64,
    backfill: bool,
) -> Result<OperationStatus> {
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
    let tracker = HealingTracker::new(store.clone(), config.healing.clone(), alerts);
    let detector = GapDetector::new(store.clone(), config.healing.clone(), tracker);

    let gaps = if backfill {
        let lock = DistributedLock::new(store.clone(), config.lock.clone());
        let grader = Grader::new(store, lock);
        detector.detect_and_backfill(lookback_days, &grader).await?
    } else {
        detector.detect_gaps(lookback_days).await?
    };

    for gap in &gaps {
        tracing::warn!(
            game_date = gap.game_date,
            gradable = gap.gradable,
            graded = gap.graded,
            grading_pct = gap.grading_pct,
            status = gap.status,
            "grading gap detected"
        );
    }

    Ok(if gaps.is_empty() {
        OperationStatus::NoData
    } else {
        OperationStatus::Failure
    })
}

async fn run_cleanup_stalled(store: Store, config: AppConfig) -> Result<OperationStatus> {
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
    let tracker = HealingTracker::new(store.clone(), config.healing.clone(), alerts);
    let monitor = BatchMonitor::new(store, config.healing.clone(), tracker);
    let cleaned = monitor.cleanup_stalled_batches().await?;

    for batch in &cleaned {
        tracing::warn!(
            batch_id = batch.batch_id,
            game_date = batch.game_date,
            completion_pct = batch.completion_pct,
            "force-completed stalled batch"
        );
    }

    Ok(if cleaned.is_empty() {
        OperationStatus::NoData
    } else {
        OperationStatus::Success
    })
}
