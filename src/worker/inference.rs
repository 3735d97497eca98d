//! Inference boundary.
//!
//! Model quality is out of scope for this core (SPEC_FULL §1): the worker
//! depends on the `PredictModel` trait object rather than a concrete model,
//! mirroring the teacher's strategy-trait-plus-reference-implementation shape
//! in `backtest_v2::strategy`. `MovingAverageBaseline` is the one concrete
//! implementation shipped here, grounded on the original's
//! `moving_average_baseline_v1` system — good enough for tests and local
//! runs; production deployments supply their own `PredictModel`.

use anyhow::Result;

/// Per-player feature vector and recent-game history batch-loaded by the
/// caller (feature store integration is external to this core).
#[derive(Debug, Clone, Default)]
pub struct FeatureVector {
    pub points_last_5: Vec<f64>,
    pub points_last_10: Vec<f64>,
    pub minutes_last_5: Vec<f64>,
    pub quality_score: f64,
}

impl FeatureVector {
    fn average(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    pub fn points_avg_last_5(&self) -> Option<f64> {
        Self::average(&self.points_last_5)
    }

    pub fn points_avg_last_10(&self) -> Option<f64> {
        Self::average(&self.points_last_10)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InferenceOutput {
    pub predicted_points: f64,
    pub confidence: f64,
}

pub trait PredictModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<InferenceOutput>;
    fn version(&self) -> &str;
}

/// Reference model: predicts the L5 scoring average (falling back to L10,
/// then a flat default), with a confidence derived from sample size.
pub struct MovingAverageBaseline {
    version: String,
    fixed_override: Option<(f64, f64)>,
}

impl MovingAverageBaseline {
    pub fn new() -> Self {
        Self {
            version: "moving_average_baseline_v1".to_string(),
            fixed_override: None,
        }
    }

    /// Test/demo constructor that bypasses the feature vector entirely.
    pub fn with_fixed(predicted_points: f64, confidence: f64) -> Self {
        Self {
            version: "moving_average_baseline_v1".to_string(),
            fixed_override: Some((predicted_points, confidence)),
        }
    }
}

impl Default for MovingAverageBaseline {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictModel for MovingAverageBaseline {
    fn predict(&self, features: &FeatureVector) -> Result<InferenceOutput> {
        if let Some((predicted_points, confidence)) = self.fixed_override {
            return Ok(InferenceOutput {
                predicted_points,
                confidence,
            });
        }

        let predicted_points = features
            .points_avg_last_5()
            .or_else(|| features.points_avg_last_10())
            .unwrap_or(0.0);

        let sample_size = features.points_last_5.len().max(features.points_last_10.len());
        let confidence = (sample_size as f64 / 10.0).min(1.0).max(0.1);

        Ok(InferenceOutput {
            predicted_points,
            confidence,
        })
    }

    fn version(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicts_l5_average_when_available() {
        let model = MovingAverageBaseline::new();
        let features = FeatureVector {
            points_last_5: vec![20.0, 22.0, 18.0, 24.0, 26.0],
            points_last_10: vec![],
            minutes_last_5: vec![],
            quality_score: 0.9,
        };
        let output = model.predict(&features).unwrap();
        assert_eq!(output.predicted_points, 22.0);
    }

    #[test]
    fn falls_back_to_l10_when_l5_missing() {
        let model = MovingAverageBaseline::new();
        let features = FeatureVector {
            points_last_5: vec![],
            points_last_10: vec![10.0, 20.0],
            minutes_last_5: vec![],
            quality_score: 0.5,
        };
        let output = model.predict(&features).unwrap();
        assert_eq!(output.predicted_points, 15.0);
    }
}
