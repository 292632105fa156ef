// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-tier timeout and circuit breaker around any adapter.
//!
//! [`Guarded`] implements whichever adapter traits its inner store implements,
//! so it can wrap a cache, a read model or an authoritative store alike:
//!
//! ```
//! use std::time::Duration;
//! use tier_sync::storage::{Guarded, InMemoryCacheStore};
//! use tier_sync::{Record, Tier};
//!
//! let cache = Guarded::new(
//!     InMemoryCacheStore::<Record>::new(),
//!     Tier::Cache,
//!     Duration::from_millis(250),
//! )
//! .with_circuit_breaker();
//!
//! assert_eq!(cache.tier(), Tier::Cache);
//! ```
//!
//! A timeout surfaces as [`StorageError::Timeout`] and a rejected call as
//! [`StorageError::Unavailable`]. Both count as tier errors for the cascade.
//! Only [backend faults](StorageError::is_backend_fault) count against the
//! circuit; a missing id or a version conflict does not.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::traits::{AuthoritativeStore, CacheStore, Page, ReadModelStore, StorageError};
use crate::entity::{Entity, EntityId};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::tier::Tier;

pub struct Guarded<S> {
    inner: S,
    tier: Tier,
    timeout: Duration,
    circuit: Option<CircuitBreaker>,
}

impl<S> Guarded<S> {
    pub fn new(inner: S, tier: Tier, timeout: Duration) -> Self {
        Self {
            inner,
            tier,
            timeout,
            circuit: None,
        }
    }

    /// Add a circuit breaker using the tier's preset.
    #[must_use]
    pub fn with_circuit_breaker(mut self) -> Self {
        self.circuit = Some(CircuitBreaker::for_tier(self.tier));
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.circuit = Some(breaker);
        self
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn circuit(&self) -> Option<&CircuitBreaker> {
        self.circuit.as_ref()
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn guard<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let bounded = async {
            match tokio::time::timeout(self.timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tier = %self.tier, operation, after = ?self.timeout, "Tier call timed out");
                    crate::metrics::record_timeout(self.tier.as_str(), operation);
                    Err(StorageError::Timeout {
                        tier: self.tier,
                        after: self.timeout,
                    })
                }
            }
        };

        let result = match &self.circuit {
            None => bounded.await,
            Some(breaker) => breaker
                .call_with(StorageError::is_backend_fault, || bounded)
                .await
                .map_err(|e| match e {
                    CircuitError::Rejected => StorageError::Unavailable(self.tier),
                    CircuitError::Inner(e) => e,
                }),
        };

        crate::metrics::record_latency(self.tier.as_str(), operation, start.elapsed());
        result
    }
}

#[async_trait]
impl<E, S> AuthoritativeStore<E> for Guarded<S>
where
    E: Entity,
    S: AuthoritativeStore<E>,
{
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        self.guard("get", self.inner.get_by_id(id)).await
    }

    async fn add(&self, entity: &E) -> Result<E, StorageError> {
        self.guard("add", self.inner.add(entity)).await
    }

    async fn update(&self, entity: &E) -> Result<E, StorageError> {
        self.guard("update", self.inner.update(entity)).await
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.guard("delete", self.inner.delete(id)).await
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.guard("exists", self.inner.exists(id)).await
    }

    async fn browse(&self, page: Page) -> Result<Vec<E>, StorageError> {
        self.guard("browse", self.inner.browse(page)).await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.guard("count", self.inner.count()).await
    }
}

#[async_trait]
impl<E, S> CacheStore<E> for Guarded<S>
where
    E: Entity,
    S: CacheStore<E>,
{
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        self.guard("get", self.inner.get(id)).await
    }

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StorageError> {
        self.guard("set", self.inner.set(entity, ttl)).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.guard("delete", self.inner.delete(id)).await
    }

    async fn key_exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.guard("exists", self.inner.key_exists(id)).await
    }
}

#[async_trait]
impl<E, S> ReadModelStore<E> for Guarded<S>
where
    E: Entity,
    S: ReadModelStore<E>,
{
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        self.guard("get", self.inner.get(id)).await
    }

    async fn upsert(&self, entity: &E) -> Result<(), StorageError> {
        self.guard("upsert", self.inner.upsert(entity)).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.guard("delete", self.inner.delete(id)).await
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.guard("exists", self.inner.exists(id)).await
    }
}
