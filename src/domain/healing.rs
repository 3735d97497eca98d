//! Typed records for the self-healing audit trail.
//!
//! Grounded on `shared/utils/healing_tracker.py`'s `HealingEvent` and
//! pattern-threshold constants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Yellow,
    Red,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Yellow => "yellow",
            AlertLevel::Red => "red",
            AlertLevel::Critical => "critical",
        }
    }
}

/// One immutable, append-only record of a self-healing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingEvent {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
    pub trigger_reason: String,
    pub action_taken: String,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub success: bool,
    pub metadata: Option<serde_json::Value>,
}

/// Counts observed for one `event_type` within a lookback window.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealingPattern {
    pub event_count: u32,
    pub failure_count: u32,
}

impl HealingPattern {
    pub fn failure_rate_pct(&self) -> f64 {
        if self.event_count == 0 {
            0.0
        } else {
            (self.failure_count as f64 / self.event_count as f64) * 100.0
        }
    }

    /// Evaluate this pattern against the configured thresholds, returning
    /// the highest severity level that applies, if any.
    pub fn alert_level(
        &self,
        yellow_count: u32,
        red_count: u32,
        critical_failure_rate_pct: f64,
    ) -> Option<AlertLevel> {
        if self.failure_rate_pct() > critical_failure_rate_pct {
            return Some(AlertLevel::Critical);
        }
        if self.event_count >= red_count {
            return Some(AlertLevel::Red);
        }
        if self.event_count >= yellow_count {
            return Some(AlertLevel::Yellow);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yellow_level_at_three_events() {
        let pattern = HealingPattern {
            event_count: 3,
            failure_count: 0,
        };
        assert_eq!(pattern.alert_level(3, 10, 20.0), Some(AlertLevel::Yellow));
    }

    #[test]
    fn red_level_at_ten_events() {
        let pattern = HealingPattern {
            event_count: 10,
            failure_count: 0,
        };
        assert_eq!(pattern.alert_level(3, 10, 20.0), Some(AlertLevel::Red));
    }

    #[test]
    fn critical_overrides_on_failure_rate() {
        let pattern = HealingPattern {
            event_count: 5,
            failure_count: 2,
        };
        // failure rate 40% > 20% critical threshold, even though event_count
        // is below the yellow threshold of say 6.
        assert_eq!(pattern.alert_level(6, 10, 20.0), Some(AlertLevel::Critical));
    }

    #[test]
    fn below_all_thresholds_is_none() {
        let pattern = HealingPattern {
            event_count: 1,
            failure_count: 0,
        };
        assert_eq!(pattern.alert_level(3, 10, 20.0), None);
    }
}
