//! Exponential backoff with jitter, and a retry-until-deadline driver.
//!
//! The jitter PRNG and backoff formula are lifted from
//! `scrapers::binance_session::BackoffCalculator`: fast xorshift64 state,
//! `base * multiplier^attempt` capped at a ceiling, jittered by `±jitter_factor`.
//! Only the default constants differ — this module serves store calls with a
//! slower cadence (seconds, not milliseconds) and a longer total deadline.

use crate::config::RetryConfig;
use crate::error::{classify, ErrorClass};
use std::time::{Duration, Instant};

/// Backoff calculator with jitter for thundering-herd prevention.
#[derive(Debug)]
pub struct BackoffCalculator {
    config: RetryConfig,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345)
                | 1,
        }
    }

    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    /// Compute the next backoff duration and advance the attempt counter.
    pub fn next_backoff(&mut self) -> Duration {
        let base = (self.config.backoff_initial_ms as f64)
            * self.config.backoff_multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.backoff_max_ms as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.config.backoff_initial_ms as f64 * 0.5);

        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Run `f` until it succeeds, a permanent error surfaces, or the configured
/// total deadline elapses. `f` is retried only for errors `classify`s as
/// transient.
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let deadline = Instant::now() + Duration::from_secs_f64(config.total_deadline_secs);
    let mut backoff = BackoffCalculator::new(config.clone());

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if classify(&e) == ErrorClass::Permanent {
                    return Err(e);
                }
                if Instant::now() >= deadline {
                    return Err(e.context("retry deadline exceeded"));
                }
                let delay = backoff.next_backoff();
                if Instant::now() + delay >= deadline {
                    return Err(e.context("retry deadline exceeded"));
                }
                tracing::warn!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, error = %e, "transient error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn first_backoff_is_near_initial() {
        let config = RetryConfig::default();
        let mut backoff = BackoffCalculator::new(config);
        let d = backoff.next_backoff();
        assert!(d.as_millis() >= 700 && d.as_millis() <= 1_300);
    }

    #[test]
    fn backoff_never_exceeds_max_plus_jitter() {
        let config = RetryConfig::default();
        let mut backoff = BackoffCalculator::new(config.clone());
        for _ in 0..20 {
            let d = backoff.next_backoff();
            let ceiling = (config.backoff_max_ms as f64) * (1.0 + config.jitter_factor);
            assert!((d.as_millis() as f64) <= ceiling);
        }
    }

    #[test]
    fn reset_returns_to_first_attempt() {
        let config = RetryConfig::default();
        let mut backoff = BackoffCalculator::new(config);
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let mut config = RetryConfig::default();
        config.backoff_initial_ms = 1;
        config.backoff_max_ms = 2;
        config.total_deadline_secs = 5.0;

        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("service unavailable"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_immediately_on_permanent_error() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_with_backoff(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("bad request: invalid column")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
