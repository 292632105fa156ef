// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-tier circuit breakers on top of the recloser crate.
//!
//! A tripped breaker refuses calls with [`CircuitError::Rejected`] until its
//! recovery wait has passed. For a secondary tier a refusal reads the same as
//! any other tier error: the cascade moves on.
//!
//! ```text
//!   Closed ──(error rate over window ≥ threshold)──► Open
//!     ▲                                               │ recovery wait
//!     └──────────(trial calls succeed)─── HalfOpen ◄──┘
//! ```

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::tier::Tier;

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// Refused without running, the breaker is open
    #[error("circuit open, call rejected")]
    Rejected,

    #[error("call failed: {0}")]
    Inner(#[source] E),
}

/// Trip and recovery thresholds.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failure ratio over the closed window that trips the circuit (0.0 - 1.0)
    pub error_rate: f32,
    /// Calls held in the closed-state window
    pub window: usize,
    /// Trial calls let through while half-open
    pub half_open_calls: usize,
    /// Time spent open before the first trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::for_tier(Tier::ReadModel)
    }
}

impl CircuitConfig {
    /// Thresholds per tier.
    ///
    /// The cache tolerates the most failures and comes back soonest. The
    /// authoritative tier trips first and probes recovery more carefully.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Cache => Self {
                error_rate: 0.8,
                window: 50,
                half_open_calls: 1,
                recovery_timeout: Duration::from_secs(15),
            },
            Tier::ReadModel => Self {
                error_rate: 0.5,
                window: 20,
                half_open_calls: 2,
                recovery_timeout: Duration::from_secs(30),
            },
            Tier::Authoritative => Self {
                error_rate: 0.3,
                window: 10,
                half_open_calls: 3,
                recovery_timeout: Duration::from_secs(60),
            },
        }
    }
}

/// Point-in-time call counts for one breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerStats {
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl BreakerStats {
    /// Calls that actually reached the tier.
    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed
    }
}

pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.error_rate)
            .closed_len(config.window)
            .half_open_len(config.half_open_calls)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Breaker named after `tier`, with that tier's thresholds.
    pub fn for_tier(tier: Tier) -> Self {
        Self::new(tier.as_str(), CircuitConfig::for_tier(tier))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the future built by `f` through the breaker. When rejected, it is never polled.
    ///
    /// Every error counts as a failure; see [`call_with`](Self::call_with).
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(|_: &E| true, f).await
    }

    /// Like [`call`](Self::call), but only errors for which `is_fault` returns
    /// true count against the circuit. Other errors are returned unchanged and
    /// recorded as completed calls.
    pub async fn call_with<P, F, Fut, T, E>(&self, is_fault: P, f: F) -> Result<T, CircuitError<E>>
    where
        P: Fn(&E) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (outcome, result) = match self.inner.call_with(&is_fault, f()).await {
            Ok(value) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                ("success", Ok(value))
            }
            Err(RecloserError::Rejected) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit open, call rejected");
                ("rejected", Err(CircuitError::Rejected))
            }
            Err(RecloserError::Inner(e)) if !is_fault(&e) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                ("success", Err(CircuitError::Inner(e)))
            }
            Err(RecloserError::Inner(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Call through circuit failed");
                ("failure", Err(CircuitError::Inner(e)))
            }
        };
        crate::metrics::record_circuit_breaker_call(&self.name, outcome);
        result
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Calls refused while open.
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
