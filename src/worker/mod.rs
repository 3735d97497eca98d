pub mod inference;

use crate::domain::prediction::{
    LineProvenance, PredictionRecord, PredictionRequest, Recommendation,
};
use crate::store::sanitize::sanitize_f64;
use anyhow::Result;
use chrono::Utc;
pub use inference::{FeatureVector, InferenceOutput, MovingAverageBaseline, PredictModel};
use uuid::Uuid;

/// Deadband around the line within which a directional call is too thin to
/// make; predictions inside it are recommended `PASS`.
const DEFAULT_DEADBAND: f64 = 0.5;

pub struct Worker {
    model: Box<dyn PredictModel>,
    system_id: String,
}

impl Worker {
    pub fn new(model: Box<dyn PredictModel>, system_id: impl Into<String>) -> Self {
        Self {
            model,
            system_id: system_id.into(),
        }
    }

    /// Run inference for every candidate line in the request and compose one
    /// `PredictionRecord` per line. Does not touch the store — staging the
    /// output is `StagingWriter`'s job, kept separate so inference logic is
    /// testable without a database.
    pub fn handle_request(
        &self,
        request: &PredictionRequest,
        features: &FeatureVector,
    ) -> Result<Vec<PredictionRecord>> {
        let output = self.model.predict(features)?;
        let now = Utc::now();

        let mut records = Vec::with_capacity(request.line_values.len());
        for line in &request.line_values {
            let recommendation =
                Recommendation::derive(output.predicted_points, *line, DEFAULT_DEADBAND);

            // Defense-in-depth: re-check direction after derivation so a
            // record can never leave the worker with a recommendation that
            // contradicts the numeric relation it was computed from.
            debug_assert!(consistent(recommendation, output.predicted_points, *line));

            records.push(PredictionRecord {
                prediction_id: Uuid::new_v4().to_string(),
                game_id: request.game_id.clone(),
                player: request.player.clone(),
                system_id: self.system_id.clone(),
                game_date: request.game_date,
                team: request.team.clone(),
                opponent: request.opponent.clone(),
                home_game: request.home_game,
                current_points_line: *line,
                predicted_points: sanitize_f64(output.predicted_points).unwrap_or(0.0),
                confidence_score: sanitize_f64(output.confidence),
                recommendation,
                is_active: true,
                line_source: request.line_source,
                provenance: LineProvenance {
                    line_source_api: request.provenance.line_source_api.clone(),
                    sportsbook: request.provenance.sportsbook.clone(),
                    line_minutes_before_game: request.provenance.line_minutes_before_game,
                    was_line_fallback: request.provenance.was_line_fallback,
                },
                estimated_line_value: request.estimated_line_value,
                model_version: Some(self.model.version().to_string()),
                feature_quality_score: sanitize_f64(features.quality_score),
                injury_status_at_prediction: request.injury_status_at_prediction.clone(),
                created_at: now,
                updated_at: now,
            });
        }
        Ok(records)
    }
}

fn consistent(recommendation: Recommendation, predicted: f64, line: Option<f64>) -> bool {
    match (recommendation, line) {
        (Recommendation::Over, Some(l)) => predicted > l,
        (Recommendation::Under, Some(l)) => predicted < l,
        (Recommendation::NoLine, None) => true,
        (Recommendation::Pass, _) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::LineSource;
    use chrono::NaiveDate;

    fn sample_request(line: Option<f64>) -> PredictionRequest {
        PredictionRequest {
            player: "lebron-james".to_string(),
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

    #[test]
    fn emits_one_record_per_candidate_line() {
        let worker = Worker::new(Box::new(MovingAverageBaseline::with_fixed(27.0, 0.7)), "sys1");
        let request = PredictionRequest {
            line_values: vec![Some(20.0), Some(25.0), Some(30.0)],
            ..sample_request(Some(25.0))
        };
        let features = FeatureVector::default();
        let records = worker.handle_request(&request, &features).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.recommendation_is_consistent()));
    }

    #[test]
    fn no_line_mode_emits_no_line_recommendation() {
        let worker = Worker::new(Box::new(MovingAverageBaseline::with_fixed(20.0, 0.5)), "sys1");
        let request = sample_request(None);
        let features = FeatureVector::default();
        let records = worker.handle_request(&request, &features).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].recommendation, Recommendation::NoLine);
    }
}
