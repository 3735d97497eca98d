//! Slate assembly: eligible players for a date, bound to lines, emitted as
//! prediction requests.
//!
//! Grounded on `predictions/coordinator/player_loader.py`'s
//! `_query_players_for_date` (eligibility filter, 500-player cap) and
//! `get_players_with_stale_predictions` (window-function dedup join for
//! stale-line detection).

use crate::config::SlateConfig;
use crate::domain::prediction::{LineSource, PredictionRequest};
use crate::lines::LineResolver;
use crate::store::Store;
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::params;

pub struct SlateBuilder {
    store: Store,
    lines: LineResolver,
    config: SlateConfig,
}

struct EligiblePlayer {
    player: String,
    game_id: String,
    team: Option<String>,
    opponent: Option<String>,
    home_game: Option<bool>,
    projected_minutes: Option<f64>,
}

impl SlateBuilder {
    pub fn new(store: Store, lines: LineResolver, config: SlateConfig) -> Self {
        Self {
            store,
            lines,
            config,
        }
    }

    pub async fn build_slate(&self, game_date: NaiveDate) -> Result<Vec<PredictionRequest>> {
        let date_str = game_date.format("%Y-%m-%d").to_string();
        let players = self.eligible_players(&date_str).await?;

        let mut requests = Vec::with_capacity(players.len());
        for player in players {
            let line_info = self.lines.resolve(&player.player, &date_str).await?;
            if line_info.source == LineSource::NeedsBootstrap {
                continue;
            }
            if self.config.require_real_lines && line_info.source != LineSource::ActualProp {
                continue;
            }

            let estimated_line_value = self.lines.baseline(&player.player).await?;

            let line_values = if self.config.use_multiple_lines {
                self.multi_line_set(line_info.line_value)
            } else {
                vec![line_info.line_value]
            };

            requests.push(PredictionRequest {
                player: player.player,
                game_date,
                game_id: player.game_id,
                team: player.team,
                opponent: player.opponent,
                home_game: player.home_game,
                projected_minutes: player.projected_minutes,
                line_values,
                actual_prop_line: line_info.line_value,
                line_source: line_info.source,
                provenance: line_info.provenance,
                estimated_line_value,
                injury_status_at_prediction: None,
            });
        }

        Ok(requests)
    }

    /// Build the `[base-R, base-R+step, ..., base+R]` candidate set,
    /// always excluding the 20.0 placeholder (I4).
    fn multi_line_set(&self, base: Option<f64>) -> Vec<Option<f64>> {
        let Some(base) = base else {
            return vec![None];
        };
        let radius = self.config.multi_line_radius;
        let step = self.config.multi_line_step.max(0.5);
        let mut values = Vec::new();
        let mut offset = -radius;
        while offset <= radius + f64::EPSILON {
            let candidate = base + offset;
            if (candidate - crate::domain::prediction::PLACEHOLDER_LINE).abs() > f64::EPSILON {
                values.push(Some(candidate));
            }
            offset += step;
        }
        if values.is_empty() {
            values.push(Some(base));
        }
        values
    }

    async fn eligible_players(&self, date_str: &str) -> Result<Vec<EligiblePlayer>> {
        let date_str = date_str.to_string();
        let min_minutes = self.config.min_minutes;
        let max_players = self.config.max_players as i64;

        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT player, game_id, team, opponent, home_game, projected_minutes \
                     FROM upcoming_player_game_context \
                     WHERE game_date = ?1 \
                       AND (player_status IS NULL OR player_status NOT IN ('OUT', 'DOUBTFUL')) \
                       AND (projected_minutes >= ?2 OR has_prop_line = 1) \
                     ORDER BY created_at DESC \
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![date_str, min_minutes, max_players], |row| {
                    Ok(EligiblePlayer {
                        player: row.get(0)?,
                        game_id: row.get(1)?,
                        team: row.get(2)?,
                        opponent: row.get(3)?,
                        home_game: row.get::<_, Option<i64>>(4)?.map(|v| v != 0),
                        projected_minutes: row.get(5)?,
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

    /// Players whose latest active prediction line differs from the latest
    /// current line by at least `threshold`. Comparison is `>=`: a change
    /// exactly at threshold counts as stale.
    pub async fn find_stale_predictions(
        &self,
        game_date: NaiveDate,
        threshold: f64,
    ) -> Result<Vec<String>> {
        let date_str = game_date.format("%Y-%m-%d").to_string();
        let max_players = self.config.max_players as i64;

        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "WITH current_lines AS (
                        SELECT player, current_points_line AS line_value
                        FROM upcoming_player_game_context
                        WHERE game_date = ?1 AND current_points_line IS NOT NULL
                    ),
                    latest_predictions AS (
                        SELECT player, current_points_line AS line_value
                        FROM predictions
                        WHERE game_date = ?1 AND is_active = 1
                    )
                    SELECT cl.player, ABS(cl.line_value - lp.line_value) AS delta
                    FROM current_lines cl
                    JOIN latest_predictions lp ON lp.player = cl.player
                    WHERE ABS(cl.line_value - lp.line_value) >= ?2
                    ORDER BY delta DESC
                    LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![date_str, threshold, max_players], |row| {
                    row.get::<_, String>(0)
                })?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::LineResolverConfig;

    fn test_config() -> SlateConfig {
        SlateConfig {
            min_minutes: 15.0,
            use_multiple_lines: false,
            require_real_lines: false,
            multi_line_radius: 3.0,
            multi_line_step: 1.5,
            max_players: 500,
            stale_threshold: 1.0,
        }
    }

    #[tokio::test]
    async fn multi_line_set_excludes_placeholder() {
        let store = Store::open_in_memory().unwrap();
        let lines = LineResolver::new(store.clone(), LineResolverConfig::default());
        let builder = SlateBuilder::new(store, lines, test_config());
        let values = builder.multi_line_set(Some(20.0));
        assert!(!values.contains(&Some(20.0)));
    }

    #[tokio::test]
    async fn stale_threshold_is_inclusive() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO upcoming_player_game_context \
                     (player, game_date, game_id, current_points_line, has_prop_line, created_at) \
                     VALUES ('p1', '2026-01-25', 'g1', 26.0, 1, '2026-01-25T00:00:00Z')",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO predictions \
                     (prediction_id, game_id, player, system_id, game_date, current_points_line, \
                      predicted_points, recommendation, is_active, line_source, created_at, updated_at) \
                     VALUES ('pr1', 'g1', 'p1', 'sys1', '2026-01-25', 25.0, 27.0, 'OVER', 1, 'ACTUAL_PROP', \
                      '2026-01-25T00:00:00Z', '2026-01-25T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let lines = LineResolver::new(store.clone(), LineResolverConfig::default());
        let builder = SlateBuilder::new(store, lines, test_config());
        let date = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();

        let stale = builder.find_stale_predictions(date, 1.0).await.unwrap();
        assert_eq!(stale, vec!["p1".to_string()]);

        let not_stale = builder.find_stale_predictions(date, 1.1).await.unwrap();
        assert!(not_stale.is_empty());
    }
}
