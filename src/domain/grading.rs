//! Typed grading records and the pure math that produces them.
//!
//! Grounded on `prediction_accuracy_processor.py`: error metrics, tri-valued
//! correctness, confidence normalization/decile, and DNP void
//! classification. Kept deliberately free of any store access so the
//! arithmetic is independently testable from `Grader`'s orchestration.

use crate::domain::prediction::Recommendation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoidReason {
    DnpInjuryConfirmed,
    DnpLateScratch,
    DnpUnknown,
}

impl VoidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            VoidReason::DnpInjuryConfirmed => "dnp_injury_confirmed",
            VoidReason::DnpLateScratch => "dnp_late_scratch",
            VoidReason::DnpUnknown => "dnp_unknown",
        }
    }
}

/// A player did not play iff they scored zero points in zero (or unrecorded)
/// minutes. `minutes_played` of `Some(0.1)` is NOT a DNP even with 0 points.
pub fn is_dnp(actual_points: f64, minutes_played: Option<f64>) -> bool {
    actual_points == 0.0 && matches!(minutes_played, None | Some(0.0))
}

/// Classify why a DNP prediction should be voided, preferring the injury
/// status captured at prediction time over a retroactive report lookup —
/// the precedence `detect_dnp_voiding` uses in the original processor.
pub fn classify_void_reason(
    captured_status: Option<&str>,
    retroactive_status: Option<&str>,
) -> VoidReason {
    let status = captured_status.or(retroactive_status);
    match status.map(|s| s.to_uppercase()) {
        Some(ref s) if s == "OUT" || s == "DOUBTFUL" => VoidReason::DnpInjuryConfirmed,
        Some(ref s) if s == "QUESTIONABLE" || s == "PROBABLE" => VoidReason::DnpLateScratch,
        _ => VoidReason::DnpUnknown,
    }
}

/// Normalize a confidence value that may be expressed on a 0-100 scale.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw > 1.0 {
        raw / 100.0
    } else {
        raw
    }
}

/// Bucket a normalized (0-1) confidence into deciles 1..=10.
pub fn confidence_decile(normalized_confidence: f64) -> i32 {
    let decile = (normalized_confidence * 10.0).floor() as i32 + 1;
    decile.min(10)
}

/// Whether a recommendation was correct against the realized outcome.
/// `None` on push, or when the recommendation carries no directional call.
pub fn prediction_correct(
    recommendation: Recommendation,
    actual_points: f64,
    line: Option<f64>,
) -> Option<bool> {
    let line = line?;
    match recommendation {
        Recommendation::Pass | Recommendation::Hold | Recommendation::NoLine => None,
        Recommendation::Over => {
            if actual_points == line {
                None
            } else {
                Some(actual_points > line)
            }
        }
        Recommendation::Under => {
            if actual_points == line {
                None
            } else {
                Some(actual_points < line)
            }
        }
    }
}

/// Fully graded row, ready for the `prediction_accuracy` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedPrediction {
    pub accuracy_id: String,
    pub player: String,
    pub game_id: String,
    pub system_id: String,
    pub game_date: NaiveDate,
    pub line_value: Option<f64>,
    pub predicted_points: f64,
    pub actual_points: f64,
    pub absolute_error: f64,
    pub signed_error: f64,
    pub within_3_points: bool,
    pub within_5_points: bool,
    pub predicted_margin: Option<f64>,
    pub actual_margin: Option<f64>,
    pub recommendation: Recommendation,
    pub prediction_correct: Option<bool>,
    pub confidence_score: Option<f64>,
    pub confidence_decile: Option<i32>,
    pub is_voided: bool,
    pub void_reason: Option<VoidReason>,
    pub graded_at: DateTime<Utc>,
}

impl GradedPrediction {
    pub fn business_key(&self) -> (String, String, String, String) {
        (
            self.player.clone(),
            self.game_id.clone(),
            self.system_id.clone(),
            format!("{:.4}", self.line_value.unwrap_or(-1.0)),
        )
    }
}

/// Aggregate stats for one date's grading run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradingSummary {
    pub predictions_found: usize,
    pub actuals_found: usize,
    pub graded: usize,
    pub mae: f64,
    pub bias: f64,
    pub recommendation_accuracy: f64,
    pub voided_count: usize,
    pub net_accuracy: f64,
    pub duplicate_count: usize,
}

/// Compute aggregate statistics over a set of graded rows. Net accuracy
/// excludes voided rows, matching the sportsbook-style interpretation.
pub fn summarize(rows: &[GradedPrediction]) -> GradingSummary {
    let mut summary = GradingSummary {
        predictions_found: rows.len(),
        graded: rows.len(),
        ..Default::default()
    };
    if rows.is_empty() {
        return summary;
    }

    let mut abs_sum = 0.0;
    let mut signed_sum = 0.0;
    let mut directional_total = 0usize;
    let mut directional_correct = 0usize;
    let mut net_correct = 0usize;
    let mut net_wrong = 0usize;

    for row in rows {
        abs_sum += row.absolute_error;
        signed_sum += row.signed_error;
        if row.is_voided {
            summary.voided_count += 1;
            continue;
        }
        if let Some(correct) = row.prediction_correct {
            directional_total += 1;
            if correct {
                directional_correct += 1;
                net_correct += 1;
            } else {
                net_wrong += 1;
            }
        }
    }

    summary.mae = abs_sum / rows.len() as f64;
    summary.bias = signed_sum / rows.len() as f64;
    summary.recommendation_accuracy = if directional_total > 0 {
        directional_correct as f64 / directional_total as f64
    } else {
        0.0
    };
    summary.net_accuracy = if net_correct + net_wrong > 0 {
        net_correct as f64 / (net_correct + net_wrong) as f64
    } else {
        0.0
    };

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dnp_detection_requires_zero_points_and_no_minutes() {
        assert!(is_dnp(0.0, None));
        assert!(is_dnp(0.0, Some(0.0)));
        assert!(!is_dnp(0.0, Some(0.1)));
        assert!(!is_dnp(2.0, Some(0.0)));
    }

    #[test]
    fn void_reason_prefers_captured_status() {
        assert_eq!(
            classify_void_reason(Some("OUT"), Some("QUESTIONABLE")),
            VoidReason::DnpInjuryConfirmed
        );
        assert_eq!(
            classify_void_reason(None, Some("PROBABLE")),
            VoidReason::DnpLateScratch
        );
        assert_eq!(classify_void_reason(None, None), VoidReason::DnpUnknown);
    }

    #[test]
    fn confidence_normalization_and_decile() {
        assert_eq!(normalize_confidence(72.0), 0.72);
        assert_eq!(normalize_confidence(0.72), 0.72);
        assert_eq!(confidence_decile(0.72), 8);
        assert_eq!(confidence_decile(1.0), 10);
        assert_eq!(confidence_decile(0.0), 1);
    }

    #[test]
    fn push_is_correctness_null() {
        assert_eq!(
            prediction_correct(Recommendation::Over, 20.0, Some(20.0)),
            None
        );
    }

    #[test]
    fn pass_is_always_null() {
        assert_eq!(
            prediction_correct(Recommendation::Pass, 30.0, Some(20.0)),
            None
        );
    }

    #[test]
    fn over_correctness_matches_direction() {
        assert_eq!(
            prediction_correct(Recommendation::Over, 25.0, Some(20.0)),
            Some(true)
        );
        assert_eq!(
            prediction_correct(Recommendation::Over, 15.0, Some(20.0)),
            Some(false)
        );
    }

    #[test]
    fn net_accuracy_excludes_voided_rows() {
        let base = GradedPrediction {
            accuracy_id: "a".into(),
            player: "p".into(),
            game_id: "g".into(),
            system_id: "s".into(),
            game_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            line_value: Some(20.0),
            predicted_points: 25.0,
            actual_points: 25.0,
            absolute_error: 0.0,
            signed_error: 0.0,
            within_3_points: true,
            within_5_points: true,
            predicted_margin: None,
            actual_margin: None,
            recommendation: Recommendation::Over,
            prediction_correct: Some(true),
            confidence_score: None,
            confidence_decile: None,
            is_voided: false,
            void_reason: None,
            graded_at: Utc::now(),
        };
        let mut voided = base.clone();
        voided.is_voided = true;
        voided.prediction_correct = None;
        voided.void_reason = Some(VoidReason::DnpUnknown);

        let rows = vec![base, voided];
        let summary = summarize(&rows);
        assert_eq!(summary.voided_count, 1);
        assert_eq!(summary.net_accuracy, 1.0);
    }
}
