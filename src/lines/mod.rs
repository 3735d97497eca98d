//! Prioritized sportsbook-first line resolution.
//!
//! Grounded on `predictions/coordinator/player_loader.py`'s
//! `_query_actual_betting_line` / `_query_odds_api_betting_line_for_book` /
//! `_query_bettingpros_betting_line_for_book`: preferred books (DraftKings,
//! FanDuel) are tried against both source APIs before falling back to
//! secondary books, and a book-then-source ordering is used throughout — not
//! source-then-book.

use crate::domain::prediction::{estimated_line_value, LineProvenance, LineSource, PLACEHOLDER_LINE};
use crate::store::Store;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

const PREFERRED_BOOKS: &[&str] = &["DraftKings", "FanDuel"];
const SECONDARY_BOOKS: &[&str] = &["BetMGM", "PointsBet", "Caesars"];

#[derive(Debug, Clone)]
pub struct LineInfo {
    pub source: LineSource,
    pub line_value: Option<f64>,
    pub provenance: LineProvenance,
}

pub struct LineResolverConfig {
    pub enable_estimation: bool,
    pub min_games_required: usize,
}

impl Default for LineResolverConfig {
    fn default() -> Self {
        Self {
            enable_estimation: false,
            min_games_required: 3,
        }
    }
}

pub struct LineResolver {
    store: Store,
    config: LineResolverConfig,
}

impl LineResolver {
    pub fn new(store: Store, config: LineResolverConfig) -> Self {
        Self { store, config }
    }

    pub async fn resolve(&self, player: &str, game_date: &str) -> Result<LineInfo> {
        for book in PREFERRED_BOOKS {
            if let Some(info) = self.try_odds_api(player, game_date, book).await? {
                return Ok(info);
            }
            if let Some(info) = self.try_bettingpros(player, game_date, Some(book)).await? {
                return Ok(info);
            }
        }
        for book in SECONDARY_BOOKS {
            if let Some(info) = self.try_odds_api(player, game_date, book).await? {
                return Ok(info);
            }
        }
        for book in SECONDARY_BOOKS {
            if let Some(info) = self.try_bettingpros(player, game_date, Some(book)).await? {
                return Ok(info);
            }
        }
        if let Some(info) = self.try_bettingpros(player, game_date, None).await? {
            return Ok(info);
        }

        if self.config.enable_estimation {
            return self.estimate(player).await;
        }

        Ok(LineInfo {
            source: LineSource::NoPropLine,
            line_value: None,
            provenance: LineProvenance::default(),
        })
    }

    /// Always-populated reference baseline, independent of whether a real
    /// line was resolved.
    pub async fn baseline(&self, player: &str) -> Result<Option<f64>> {
        let avg = self.points_avg_last_n(player, 5).await?;
        let avg = match avg {
            Some(a) => Some(a),
            None => self.points_avg_last_n(player, 10).await?,
        };
        Ok(avg.map(estimated_line_value))
    }

    async fn try_odds_api(
        &self,
        player: &str,
        game_date: &str,
        book: &str,
    ) -> Result<Option<LineInfo>> {
        let player = player.to_string();
        let game_date = game_date.to_string();
        let book = book.to_string();

        let row: Option<(f64, String, Option<i64>)> = self
            .store
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT points_line, snapshot_timestamp, minutes_before_tipoff \
                         FROM odds_api_player_points_props \
                         WHERE player = ?1 AND game_date = ?2 AND bookmaker = ?3 \
                         ORDER BY snapshot_timestamp DESC LIMIT 1",
                        params![player, game_date, book],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await?;

        let Some((line, _snapshot, minutes_before)) = row else {
            return Ok(None);
        };
        if line == PLACEHOLDER_LINE {
            return Ok(None);
        }

        Ok(Some(LineInfo {
            source: LineSource::ActualProp,
            line_value: Some(line),
            provenance: LineProvenance {
                line_source_api: Some("ODDS_API".to_string()),
                sportsbook: Some(book.clone()),
                line_minutes_before_game: minutes_before,
                was_line_fallback: book != "DraftKings",
            },
        }))
    }

    async fn try_bettingpros(
        &self,
        player: &str,
        game_date: &str,
        book: Option<&str>,
    ) -> Result<Option<LineInfo>> {
        let player = player.to_string();
        let game_date = game_date.to_string();
        let book = book.map(|b| b.to_string());

        let row: Option<(f64, Option<String>)> = self
            .store
            .with_conn(move |conn| {
                if let Some(book) = &book {
                    Ok(conn
                        .query_row(
                            "SELECT points_line, bookmaker FROM bettingpros_player_points_props \
                             WHERE player = ?1 AND game_date = ?2 AND bookmaker = ?3 AND is_active = 1 \
                             ORDER BY created_at DESC LIMIT 1",
                            params![player, game_date, book],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?)
                } else {
                    Ok(conn
                        .query_row(
                            "SELECT points_line, bookmaker FROM bettingpros_player_points_props \
                             WHERE player = ?1 AND game_date = ?2 AND is_active = 1 \
                             ORDER BY created_at DESC LIMIT 1",
                            params![player, game_date],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?)
                }
            })
            .await?;

        let Some((line, bookmaker)) = row else {
            return Ok(None);
        };
        if line == PLACEHOLDER_LINE {
            return Ok(None);
        }

        Ok(Some(LineInfo {
            source: LineSource::ActualProp,
            line_value: Some(line),
            provenance: LineProvenance {
                line_source_api: Some("BETTINGPROS".to_string()),
                sportsbook: bookmaker.clone(),
                line_minutes_before_game: None,
                was_line_fallback: bookmaker.as_deref() != Some("DraftKings"),
            },
        }))
    }

    async fn estimate(&self, player: &str) -> Result<LineInfo> {
        let games_played = self.games_played(player).await?;
        if games_played < self.config.min_games_required {
            return Ok(LineInfo {
                source: LineSource::NeedsBootstrap,
                line_value: None,
                provenance: LineProvenance::default(),
            });
        }

        let avg = self.points_avg_last_n(player, 5).await?;
        let avg = match avg {
            Some(a) => a,
            None => self.points_avg_last_n(player, 10).await?.unwrap_or(0.0),
        };

        Ok(LineInfo {
            source: LineSource::ActualProp,
            line_value: Some(estimated_line_value(avg)),
            provenance: LineProvenance {
                line_source_api: Some("ESTIMATED".to_string()),
                sportsbook: None,
                line_minutes_before_game: None,
                was_line_fallback: true,
            },
        })
    }

    async fn points_avg_last_n(&self, player: &str, n: i64) -> Result<Option<f64>> {
        let player = player.to_string();
        self.store
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT AVG(points) FROM (
                            SELECT points FROM player_game_summary
                            WHERE player = ?1
                            ORDER BY game_date DESC LIMIT ?2
                        )",
                        params![player, n],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten())
            })
            .await
    }

    async fn games_played(&self, player: &str) -> Result<usize> {
        let player = player.to_string();
        self.store
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM player_game_summary WHERE player = ?1",
                    params![player],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}
