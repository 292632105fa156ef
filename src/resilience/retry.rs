// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exponential backoff for backend connections and idempotent authoritative reads.
//!
//! Writes and secondary-tier propagation are never retried here.
//!
//! ```
//! use std::time::Duration;
//! use tier_sync::RetryConfig;
//!
//! let connect = RetryConfig::connect();
//! assert_eq!(connect.attempts, 5);
//! assert_eq!(connect.delay_for(1), Duration::from_millis(200));
//! assert_eq!(connect.delay_for(10), connect.max_delay);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::read()
    }
}

impl RetryConfig {
    /// Establishing a pool or connection manager. Gives up after roughly 5 s.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// A single authoritative read.
    #[must_use]
    pub fn read() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Wait before retry number `retry` (1-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// Run `operation` until it succeeds or the attempts run out; the last error is returned.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.attempts.max(1);
    let mut failures: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if failures > 0 {
                    info!(operation = operation_name, retries = failures, "Recovered after retrying");
                }
                return Ok(value);
            }
            Err(err) if (failures as usize) + 1 >= attempts => return Err(err),
            Err(err) => {
                failures += 1;
                let delay = config.delay_for(failures);
                warn!(
                    operation = operation_name,
                    attempt = failures,
                    of = attempts,
                    error = %err,
                    retry_in = ?delay,
                    "Backend call failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_first_success_is_returned() {
        let result: Result<&str, String> = retry("get", &fast(), || async { Ok("row") }).await;

        assert_eq!(result.unwrap(), "row");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<usize, String> = retry("get", &fast(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("connection reset {n}"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_last_error_after_attempts_run_out() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> = retry("get", &fast(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("down {n}"))
        })
        .await;

        assert_eq!(result.unwrap_err(), "down 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let config = RetryConfig { attempts: 0, ..fast() };
        let calls = AtomicUsize::new(0);

        let _: Result<(), &str> = retry("get", &config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_then_caps() {
        let config = RetryConfig::read();

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(6), Duration::from_secs(2));
        assert_eq!(config.delay_for(u32::MAX), config.max_delay);
    }
}
