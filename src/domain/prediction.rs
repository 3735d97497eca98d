//! Typed records for the prediction request/record lifecycle.
//!
//! Replaces the dynamic row objects the original pulls out of its store
//! client (`float(row.x) if row.x is not None else None` repeated at every
//! call site) with explicit structs and a single decode path, per the
//! Design Notes. Modeled on the teacher's row-struct idiom in
//! `signals::db_storage::VaultLlmDecisionRow`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder sentinel a real line must never collide with (I3/I4).
pub const PLACEHOLDER_LINE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Over,
    Under,
    Pass,
    Hold,
    NoLine,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Over => "OVER",
            Recommendation::Under => "UNDER",
            Recommendation::Pass => "PASS",
            Recommendation::Hold => "HOLD",
            Recommendation::NoLine => "NO_LINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OVER" => Some(Recommendation::Over),
            "UNDER" => Some(Recommendation::Under),
            "PASS" => Some(Recommendation::Pass),
            "HOLD" => Some(Recommendation::Hold),
            "NO_LINE" => Some(Recommendation::NoLine),
            _ => None,
        }
    }

    /// Derive a recommendation from predicted points vs. line, honoring a
    /// deadband around the line (within which the edge is too thin to call).
    /// Satisfies I5: the output is always consistent with the numeric
    /// relation it was derived from.
    pub fn derive(predicted_points: f64, line: Option<f64>, deadband: f64) -> Self {
        let Some(line) = line else {
            return Recommendation::NoLine;
        };
        let diff = predicted_points - line;
        if diff.abs() < deadband {
            Recommendation::Pass
        } else if diff > 0.0 {
            Recommendation::Over
        } else {
            Recommendation::Under
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSource {
    ActualProp,
    NoPropLine,
    NeedsBootstrap,
}

impl LineSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LineSource::ActualProp => "ACTUAL_PROP",
            LineSource::NoPropLine => "NO_PROP_LINE",
            LineSource::NeedsBootstrap => "NEEDS_BOOTSTRAP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTUAL_PROP" => Some(LineSource::ActualProp),
            "NO_PROP_LINE" => Some(LineSource::NoPropLine),
            "NEEDS_BOOTSTRAP" => Some(LineSource::NeedsBootstrap),
            _ => None,
        }
    }
}

/// Provenance of a resolved betting line: which API served it, which book,
/// and how long before tip-off it was captured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineProvenance {
    pub line_source_api: Option<String>,
    pub sportsbook: Option<String>,
    pub line_minutes_before_game: Option<i64>,
    pub was_line_fallback: bool,
}

/// One per player per date, fanned out to a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub player: String,
    pub game_date: NaiveDate,
    pub game_id: String,
    pub team: Option<String>,
    pub opponent: Option<String>,
    pub home_game: Option<bool>,
    pub projected_minutes: Option<f64>,
    /// Candidate lines to predict against; may contain a single `None` when
    /// in no-line mode.
    pub line_values: Vec<Option<f64>>,
    pub actual_prop_line: Option<f64>,
    pub line_source: LineSource,
    pub provenance: LineProvenance,
    pub estimated_line_value: Option<f64>,
    pub injury_status_at_prediction: Option<String>,
}

impl PredictionRequest {
    pub fn has_prop_line(&self) -> bool {
        matches!(self.line_source, LineSource::ActualProp)
    }
}

/// Business key: `(game_id, player, system_id, COALESCE(current_points_line, -1))`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct BusinessKeyLine(pub f64);

impl BusinessKeyLine {
    pub fn from_optional(line: Option<f64>) -> f64 {
        line.unwrap_or(-1.0)
    }
}

/// One row destined for (or already in) the predictions table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub game_id: String,
    pub player: String,
    pub system_id: String,
    pub game_date: NaiveDate,
    pub team: Option<String>,
    pub opponent: Option<String>,
    pub home_game: Option<bool>,
    pub current_points_line: Option<f64>,
    pub predicted_points: f64,
    pub confidence_score: Option<f64>,
    pub recommendation: Recommendation,
    pub is_active: bool,
    pub line_source: LineSource,
    pub provenance: LineProvenance,
    pub estimated_line_value: Option<f64>,
    pub model_version: Option<String>,
    pub feature_quality_score: Option<f64>,
    pub injury_status_at_prediction: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// `(game_id, player, system_id, COALESCE(current_points_line, -1))`, the
    /// columns the consolidator keys its MERGE/upsert on.
    pub fn business_key(&self) -> (String, String, String, String) {
        (
            self.game_id.clone(),
            self.player.clone(),
            self.system_id.clone(),
            format!(
                "{:.4}",
                BusinessKeyLine::from_optional(self.current_points_line)
            ),
        )
    }

    /// `(game_id, player, system_id)`, the columns active-uniqueness (I2) is
    /// scoped to.
    pub fn active_partition_key(&self) -> (String, String, String) {
        (self.game_id.clone(), self.player.clone(), self.system_id.clone())
    }

    /// I3/I4: a real Vegas line must never equal the placeholder sentinel.
    pub fn violates_placeholder_invariant(&self) -> bool {
        matches!(self.line_source, LineSource::ActualProp)
            && self.current_points_line == Some(PLACEHOLDER_LINE)
    }

    /// I5: recommendation must agree with the numeric relation between
    /// predicted points and the line it was computed against.
    pub fn recommendation_is_consistent(&self) -> bool {
        match (self.recommendation, self.current_points_line) {
            (Recommendation::Over, Some(line)) => self.predicted_points > line,
            (Recommendation::Under, Some(line)) => self.predicted_points < line,
            (Recommendation::NoLine, None) => true,
            (Recommendation::Pass, _) | (Recommendation::Hold, _) => true,
            _ => false,
        }
    }
}

/// Compute the always-populated baseline line: the L5 (or L10 fallback)
/// scoring average rounded to the nearest half point, with the 20.0
/// placeholder value nudged away per I4.
pub fn estimated_line_value(avg_points: f64) -> f64 {
    let rounded = (avg_points * 2.0).round() / 2.0;
    if (rounded - PLACEHOLDER_LINE).abs() < f64::EPSILON {
        if avg_points >= PLACEHOLDER_LINE {
            PLACEHOLDER_LINE + 0.5
        } else {
            PLACEHOLDER_LINE - 0.5
        }
    } else {
        rounded
    }
}
