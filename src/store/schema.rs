//! Table and index definitions for the SQLite-backed store.
//!
//! SQLite stands in for the BigQuery (analytics) + Firestore (lock/document)
//! pair the original system uses; see `SPEC_FULL.md` §3.1. Business-key
//! uniqueness (I1) is enforced redundantly here via `UNIQUE` indexes, as a
//! second line of defense behind the consolidator's own dedup pass.

use rusqlite::Connection;

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
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
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_predictions_business_key
            ON predictions(game_id, player, system_id, COALESCE(current_points_line, -1));

        CREATE INDEX IF NOT EXISTS idx_predictions_date_active
            ON predictions(game_date, is_active);

        CREATE INDEX IF NOT EXISTS idx_predictions_player_date
            ON predictions(player, game_date);

        CREATE TABLE IF NOT EXISTS prediction_accuracy (
            accuracy_id TEXT PRIMARY KEY,
            player TEXT NOT NULL,
            game_id TEXT NOT NULL,
            system_id TEXT NOT NULL,
            game_date TEXT NOT NULL,
            line_value REAL,
            predicted_points REAL NOT NULL,
            actual_points REAL NOT NULL,
            absolute_error REAL NOT NULL,
            signed_error REAL NOT NULL,
            within_3_points INTEGER NOT NULL,
            within_5_points INTEGER NOT NULL,
            predicted_margin REAL,
            actual_margin REAL,
            recommendation TEXT NOT NULL,
            prediction_correct INTEGER,
            confidence_score REAL,
            confidence_decile INTEGER,
            is_voided INTEGER NOT NULL DEFAULT 0,
            void_reason TEXT,
            graded_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_accuracy_business_key
            ON prediction_accuracy(player, game_id, system_id, COALESCE(line_value, -1));

        CREATE INDEX IF NOT EXISTS idx_accuracy_date
            ON prediction_accuracy(game_date);

        CREATE TABLE IF NOT EXISTS healing_events (
            event_id TEXT PRIMARY KEY,
            occurred_at TEXT NOT NULL,
            event_type TEXT NOT NULL,
            trigger_reason TEXT NOT NULL,
            action_taken TEXT NOT NULL,
            before_state TEXT,
            after_state TEXT,
            success INTEGER NOT NULL,
            metadata TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_healing_type_time
            ON healing_events(event_type, occurred_at DESC);

        CREATE TABLE IF NOT EXISTS upcoming_player_game_context (
            player TEXT NOT NULL,
            game_date TEXT NOT NULL,
            game_id TEXT NOT NULL,
            team TEXT,
            opponent TEXT,
            home_game INTEGER,
            projected_minutes REAL,
            points_avg_last_5 REAL,
            points_avg_last_10 REAL,
            l10_games_used INTEGER,
            has_prop_line INTEGER NOT NULL DEFAULT 0,
            current_points_line REAL,
            player_status TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (player, game_date)
        );

        CREATE TABLE IF NOT EXISTS odds_api_player_points_props (
            player TEXT NOT NULL,
            game_date TEXT NOT NULL,
            bookmaker TEXT NOT NULL,
            points_line REAL NOT NULL,
            snapshot_timestamp TEXT NOT NULL,
            minutes_before_tipoff INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_odds_api_player_date_book
            ON odds_api_player_points_props(player, game_date, bookmaker, snapshot_timestamp DESC);

        CREATE TABLE IF NOT EXISTS bettingpros_player_points_props (
            player TEXT NOT NULL,
            game_date TEXT NOT NULL,
            bookmaker TEXT,
            points_line REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_bettingpros_player_date_book
            ON bettingpros_player_points_props(player, game_date, bookmaker, created_at DESC);

        CREATE TABLE IF NOT EXISTS injury_report (
            player TEXT NOT NULL,
            game_date TEXT NOT NULL,
            report_date TEXT NOT NULL,
            report_hour INTEGER,
            injury_status TEXT NOT NULL,
            reason TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_injury_report_player_date
            ON injury_report(player, game_date, report_date DESC);

        CREATE TABLE IF NOT EXISTS player_game_summary (
            player TEXT NOT NULL,
            game_date TEXT NOT NULL,
            game_id TEXT NOT NULL,
            points REAL,
            minutes_played REAL,
            team TEXT,
            opponent TEXT,
            PRIMARY KEY (player, game_id)
        );

        CREATE TABLE IF NOT EXISTS prediction_batches (
            batch_id TEXT PRIMARY KEY,
            game_date TEXT NOT NULL,
            mode TEXT NOT NULL,
            total_requests INTEGER NOT NULL DEFAULT 0,
            completion_pct REAL NOT NULL DEFAULT 0,
            is_complete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
}

/// Create the per-lock-type lease table. Called once per `lock_type` the
/// first time it is used; idempotent.
pub fn init_lock_table(conn: &Connection, lock_type: &str) -> rusqlite::Result<()> {
    let table = lock_table_name(lock_type);
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                game_date TEXT PRIMARY KEY,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                holder_instance_id TEXT NOT NULL
            )"
        ),
        [],
    )?;
    Ok(())
}

/// The lock table name is derived from a fixed allow-list of lock types
/// (see `lock::LockType`), never from caller-supplied strings, so
/// interpolating it directly into SQL is safe per the Design Notes'
/// parameter-binding rule (fully-qualified, config-controlled names only).
pub fn lock_table_name(lock_type: &str) -> String {
    format!("{}_locks", sanitize_identifier(lock_type))
}

/// Staging table name for one `(batch, worker)` pair, sanitized so hyphens
/// and other non-identifier characters can't break the generated SQL.
pub fn staging_table_name(dataset_prefix: &str, batch_id: &str, worker_id: &str) -> String {
    let prefix = if dataset_prefix.is_empty() {
        String::new()
    } else {
        format!("{}_", sanitize_identifier(dataset_prefix))
    };
    format!(
        "{prefix}_staging_{}_{}",
        sanitize_identifier(batch_id),
        sanitize_identifier(worker_id)
    )
}

fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_table_name_sanitizes_hyphens() {
        let name = staging_table_name("", "batch-123", "worker-7");
        assert_eq!(name, "_staging_batch_123_worker_7");
    }

    #[test]
    fn staging_table_name_includes_dataset_prefix() {
        let name = staging_table_name("test_ds", "b1", "w1");
        assert_eq!(name, "test_ds_staging_b1_w1");
    }
}
