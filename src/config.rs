//! Application configuration.
//!
//! Typed, env+file configuration for lock leases, retry budgets, cache sizes,
//! and dataset prefixes. Loaded from TOML with environment override, mirroring
//! the teacher's `PerfConfig` pattern.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration for the prediction orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database backing all stores.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Dataset prefix, prepended to staging table names; used for test isolation.
    #[serde(default)]
    pub dataset_prefix: String,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub slate: SlateConfig,

    #[serde(default)]
    pub healing: HealingConfig,
}

fn default_db_path() -> String {
    "propline.sqlite3".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            dataset_prefix: String::new(),
            lock: LockConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            slate: SlateConfig::default(),
            healing: HealingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `PROPLINE_CONFIG_PATH` or a default path, falling back to
    /// built-in defaults if the file is absent or unparseable.
    pub fn from_env() -> Self {
        let path = std::env::var("PROPLINE_CONFIG_PATH")
            .unwrap_or_else(|_| "propline_config.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("using default config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Distributed lock lease parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration in seconds before a lock is considered stale.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,

    /// Delay between acquisition retries, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,

    /// Maximum number of acquisition attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Total acquisition budget in seconds, independent of attempt count.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
}

fn default_lease_secs() -> i64 {
    300
}
fn default_retry_delay_secs() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    30
}
fn default_max_wait_secs() -> f64 {
    90.0
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            max_attempts: default_max_attempts(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

/// Retry/backoff parameters for transient store errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Total retry deadline in seconds, across all attempts.
    #[serde(default = "default_total_deadline_secs")]
    pub total_deadline_secs: f64,
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.3
}
fn default_total_deadline_secs() -> f64 {
    120.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            total_deadline_secs: default_total_deadline_secs(),
        }
    }
}

/// Feature/history cache sizing and TTL tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL for same-day data, in seconds.
    #[serde(default = "default_ttl_same_day_secs")]
    pub ttl_same_day_secs: u64,

    /// TTL for historical (completed game) data, in seconds.
    #[serde(default = "default_ttl_historical_secs")]
    pub ttl_historical_secs: u64,

    /// TTL for effectively-static reference data, in seconds.
    #[serde(default = "default_ttl_static_secs")]
    pub ttl_static_secs: u64,
}

fn default_max_entries() -> usize {
    2_048
}
fn default_ttl_same_day_secs() -> u64 {
    300
}
fn default_ttl_historical_secs() -> u64 {
    21_600
}
fn default_ttl_static_secs() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_same_day_secs: default_ttl_same_day_secs(),
            ttl_historical_secs: default_ttl_historical_secs(),
            ttl_static_secs: default_ttl_static_secs(),
        }
    }
}

/// Slate assembly defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlateConfig {
    #[serde(default = "default_min_minutes")]
    pub min_minutes: f64,

    #[serde(default)]
    pub use_multiple_lines: bool,

    #[serde(default)]
    pub require_real_lines: bool,

    #[serde(default = "default_multi_line_radius")]
    pub multi_line_radius: f64,

    #[serde(default = "default_multi_line_step")]
    pub multi_line_step: f64,

    #[serde(default = "default_max_players")]
    pub max_players: usize,

    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: f64,
}

fn default_min_minutes() -> f64 {
    15.0
}
fn default_multi_line_radius() -> f64 {
    3.0
}
fn default_multi_line_step() -> f64 {
    1.5
}
fn default_max_players() -> usize {
    500
}
fn default_stale_threshold() -> f64 {
    1.0
}

impl Default for SlateConfig {
    fn default() -> Self {
        Self {
            min_minutes: default_min_minutes(),
            use_multiple_lines: false,
            require_real_lines: false,
            multi_line_radius: default_multi_line_radius(),
            multi_line_step: default_multi_line_step(),
            max_players: default_max_players(),
            stale_threshold: default_stale_threshold(),
        }
    }
}

/// Self-healing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_yellow_count")]
    pub yellow_count: u32,
    #[serde(default = "default_yellow_window_hours")]
    pub yellow_window_hours: i64,

    #[serde(default = "default_red_count")]
    pub red_count: u32,
    #[serde(default = "default_red_window_hours")]
    pub red_window_hours: i64,

    #[serde(default = "default_critical_failure_rate_pct")]
    pub critical_failure_rate_pct: f64,

    #[serde(default = "default_gap_threshold_pct")]
    pub gap_threshold_pct: f64,

    #[serde(default = "default_stall_threshold_minutes")]
    pub stall_threshold_minutes: i64,
    #[serde(default = "default_min_completion_pct")]
    pub min_completion_pct: f64,
    #[serde(default = "default_max_batch_age_hours")]
    pub max_batch_age_hours: i64,
}

fn default_yellow_count() -> u32 {
    3
}
fn default_yellow_window_hours() -> i64 {
    1
}
fn default_red_count() -> u32 {
    10
}
fn default_red_window_hours() -> i64 {
    24
}
fn default_critical_failure_rate_pct() -> f64 {
    20.0
}
fn default_gap_threshold_pct() -> f64 {
    80.0
}
fn default_stall_threshold_minutes() -> i64 {
    15
}
fn default_min_completion_pct() -> f64 {
    90.0
}
fn default_max_batch_age_hours() -> i64 {
    24
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            yellow_count: default_yellow_count(),
            yellow_window_hours: default_yellow_window_hours(),
            red_count: default_red_count(),
            red_window_hours: default_red_window_hours(),
            critical_failure_rate_pct: default_critical_failure_rate_pct(),
            gap_threshold_pct: default_gap_threshold_pct(),
            stall_threshold_minutes: default_stall_threshold_minutes(),
            min_completion_pct: default_min_completion_pct(),
            max_batch_age_hours: default_max_batch_age_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.lock.lease_secs, 300);
        assert!(config.retry.backoff_max_ms > config.retry.backoff_initial_ms);
        assert_eq!(config.slate.max_players, 500);
    }

    #[test]
    fn toml_roundtrip() {
        let config = AppConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.lock.lease_secs, config.lock.lease_secs);
        assert_eq!(parsed.cache.max_entries, config.cache.max_entries);
    }
}
