// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers and the read cascade.
//!
//! Each tier lookup is recorded as a [`TierProbe`]: a hit, a definite miss, or
//! the tier being unavailable. [`resolve`] turns the ordered probes into a single
//! [`Resolution`] without any I/O, so the fallback rules are testable on their own.
//!
//! ```
//! use tier_sync::tier::{resolve, Probe, Resolution, Tier, TierProbe};
//! use tier_sync::StorageError;
//!
//! let probes = vec![
//!     TierProbe::new(Tier::Cache, Probe::Unavailable(StorageError::Backend("down".into()))),
//!     TierProbe::new(Tier::ReadModel, Probe::Miss),
//!     TierProbe::new(Tier::Authoritative, Probe::Hit(42)),
//! ];
//!
//! match resolve(probes) {
//!     Resolution::Found { tier, value } => {
//!         assert_eq!(tier, Tier::Authoritative);
//!         assert_eq!(value, 42);
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use std::fmt;

use crate::storage::traits::StorageError;

/// The three storage tiers, in read-cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Low latency, TTL-bound, optional
    Cache,
    /// Denormalized document store
    ReadModel,
    /// Source of truth
    Authoritative,
}

impl Tier {
    /// Read cascade order, cheapest first.
    pub const CASCADE: [Tier; 3] = [Tier::Cache, Tier::ReadModel, Tier::Authoritative];

    /// Metric/log label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::ReadModel => "read_model",
            Self::Authoritative => "authoritative",
        }
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        !matches!(self, Self::Authoritative)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of asking one tier.
#[derive(Debug)]
pub enum Probe<T> {
    Hit(T),
    Miss,
    Unavailable(StorageError),
}

impl<T> Probe<T> {
    /// Lift an adapter result into a probe.
    pub fn from_lookup(result: Result<Option<T>, StorageError>) -> Self {
        match result {
            Ok(Some(value)) => Self::Hit(value),
            Ok(None) => Self::Miss,
            Err(e) => Self::Unavailable(e),
        }
    }

    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss => "miss",
            Self::Unavailable(_) => "error",
        }
    }
}

impl Probe<()> {
    /// Lift an existence check. `false` is only a miss, never a verdict.
    pub fn from_exists(result: Result<bool, StorageError>) -> Self {
        match result {
            Ok(true) => Self::Hit(()),
            Ok(false) => Self::Miss,
            Err(e) => Self::Unavailable(e),
        }
    }
}

/// A probe tagged with the tier that produced it.
#[derive(Debug)]
pub struct TierProbe<T> {
    pub tier: Tier,
    pub probe: Probe<T>,
}

impl<T> TierProbe<T> {
    pub fn new(tier: Tier, probe: Probe<T>) -> Self {
        Self { tier, probe }
    }
}

/// Final answer of a read cascade.
#[derive(Debug)]
pub enum Resolution<T> {
    Found { tier: Tier, value: T },
    /// Every consulted tier missed and the authoritative tier confirmed absence
    NotFound,
    /// No tier hit and the authoritative tier could not answer
    Exhausted(StorageError),
}

/// Resolve ordered probes.
///
/// - the first hit wins, whichever tier produced it
/// - otherwise an authoritative miss means not found
/// - otherwise an authoritative failure means exhausted
/// - without an authoritative probe, the last tier error (if any) is surfaced
pub fn resolve<T>(probes: Vec<TierProbe<T>>) -> Resolution<T> {
    let mut authoritative_error = None;
    let mut authoritative_miss = false;
    let mut last_error = None;

    for TierProbe { tier, probe } in probes {
        match probe {
            Probe::Hit(value) => return Resolution::Found { tier, value },
            Probe::Miss => {
                if tier == Tier::Authoritative {
                    authoritative_miss = true;
                }
            }
            Probe::Unavailable(e) => {
                if tier == Tier::Authoritative {
                    authoritative_error = Some(e);
                } else {
                    last_error = Some(e);
                }
            }
        }
    }

    if authoritative_miss {
        return Resolution::NotFound;
    }
    match authoritative_error.or(last_error) {
        Some(e) => Resolution::Exhausted(e),
        None => Resolution::NotFound,
    }
}
