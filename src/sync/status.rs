//! Rolling sync metrics and the health snapshot derived from them.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::entity::now_millis;

/// Thresholds that decide whether sync is healthy.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Number of latency samples kept for the rolling average
    pub window: usize,
    /// Healthy while `failed / (synced + failed)` stays below this
    pub failure_rate_threshold: f64,
    /// Healthy while the rolling average latency stays below this
    pub latency_bound: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            window: 100,
            failure_rate_threshold: 0.05,
            latency_bound: Duration::from_secs(1),
        }
    }
}

/// Point-in-time view of sync health.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Epoch millis of the last successful sync
    pub last_sync_time: Option<i64>,
    pub total_synced: u64,
    pub total_failed: u64,
    pub average_sync_latency: Duration,
    pub failure_rate: f64,
    pub is_healthy: bool,
}

#[derive(Debug, Default)]
struct Counters {
    total_synced: u64,
    total_failed: u64,
    last_sync_time: Option<i64>,
    samples: VecDeque<Duration>,
    sample_sum: Duration,
}

/// Counters plus a bounded latency window behind one short lock.
///
/// Adapter I/O never happens under the lock: callers time the operation
/// first and then hand the finished sample to [`SyncMetrics::record`].
#[derive(Debug)]
pub struct SyncMetrics {
    policy: HealthPolicy,
    counters: Mutex<Counters>,
}

impl SyncMetrics {
    #[must_use]
    pub fn new(policy: HealthPolicy) -> Self {
        let window = policy.window.max(1);
        Self {
            policy: HealthPolicy { window, ..policy },
            counters: Mutex::new(Counters {
                samples: VecDeque::with_capacity(window),
                ..Counters::default()
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Count one attempt and add its latency to the window.
    pub fn record(&self, success: bool, latency: Duration) -> SyncStatus {
        let status = {
            let mut c = self.counters.lock();
            if success {
                c.total_synced += 1;
                c.last_sync_time = Some(now_millis());
            } else {
                c.total_failed += 1;
            }

            c.samples.push_back(latency);
            c.sample_sum += latency;
            if c.samples.len() > self.policy.window {
                if let Some(evicted) = c.samples.pop_front() {
                    c.sample_sum = c.sample_sum.saturating_sub(evicted);
                }
            }

            self.snapshot(&c)
        };

        crate::metrics::set_sync_health(status.is_healthy, status.failure_rate);
        status
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let c = self.counters.lock();
        self.snapshot(&c)
    }

    fn snapshot(&self, c: &Counters) -> SyncStatus {
        let attempts = c.total_synced + c.total_failed;
        let failure_rate = if attempts == 0 {
            0.0
        } else {
            c.total_failed as f64 / attempts as f64
        };

        let average_sync_latency = match c.samples.len() {
            0 => Duration::ZERO,
            n => c.sample_sum / n as u32,
        };

        // no samples yet counts as healthy
        let is_healthy = attempts == 0
            || (failure_rate < self.policy.failure_rate_threshold
                && average_sync_latency < self.policy.latency_bound);

        SyncStatus {
            last_sync_time: c.last_sync_time,
            total_synced: c.total_synced,
            total_failed: c.total_failed,
            average_sync_latency,
            failure_rate,
            is_healthy,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_empty_is_healthy() {
        let metrics = SyncMetrics::default();
        let status = metrics.status();

        assert!(status.is_healthy);
        assert_eq!(status.total_synced, 0);
        assert_eq!(status.average_sync_latency, Duration::ZERO);
        assert_eq!(status.last_sync_time, None);
    }

    #[test]
    fn test_each_record_bumps_one_counter() {
        let metrics = SyncMetrics::default();

        metrics.record(true, ms(10));
        metrics.record(false, ms(10));
        metrics.record(true, ms(10));

        let status = metrics.status();
        assert_eq!(status.total_synced, 2);
        assert_eq!(status.total_failed, 1);
        assert!(status.last_sync_time.is_some());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let metrics = SyncMetrics::new(HealthPolicy {
            window: 3,
            ..HealthPolicy::default()
        });

        metrics.record(true, ms(900));
        for _ in 0..3 {
            metrics.record(true, ms(30));
        }

        assert_eq!(metrics.status().average_sync_latency, ms(30));
    }

    #[test]
    fn test_failure_rate_flips_health_and_recovers() {
        let metrics = SyncMetrics::default();

        for _ in 0..9 {
            metrics.record(true, ms(5));
        }
        assert!(!metrics.record(false, ms(5)).is_healthy); // 10% > 5%

        for _ in 0..10 {
            metrics.record(true, ms(5));
        }
        // 1 / 20 = 5%, not below threshold
        assert!(!metrics.status().is_healthy);

        metrics.record(true, ms(5));
        assert!(metrics.status().is_healthy);
    }

    #[test]
    fn test_slow_average_is_unhealthy() {
        let metrics = SyncMetrics::new(HealthPolicy {
            window: 2,
            latency_bound: ms(100),
            ..HealthPolicy::default()
        });

        metrics.record(true, ms(150));
        metrics.record(true, ms(150));
        assert!(!metrics.status().is_healthy);

        metrics.record(true, ms(10));
        metrics.record(true, ms(10));
        assert!(metrics.status().is_healthy);
    }
}
