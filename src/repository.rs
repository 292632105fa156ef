// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Composite repository over the three tiers.
//!
//! # Writes
//!
//! ```text
//! add/update/delete
//!   └─► authoritative (must succeed, else AuthoritativeWriteFailed)
//!         └─► join!( cache set/delete , read model upsert/delete )
//!               each best-effort, each reported in WriteReport
//! ```
//!
//! Secondary attempts start only after the authoritative commit and propagate the
//! committed copy. A failed secondary is logged with tier, operation and entity id,
//! counted, and reported. It is never retried here and never fails the caller.
//!
//! # Reads
//!
//! `get` and `exists` walk cache → read model → authoritative and stop at the first
//! hit. A miss or an error moves on to the next tier; only the authoritative tier can
//! say "not found". [`browse`](CompositeRepository::browse) always goes straight to
//! the authoritative store.
//!
//! # Cancellation
//!
//! A token cancelled before the authoritative write returns
//! [`RepositoryError::Cancelled`] with no effect. After the commit, cancellation
//! only marks unfinished secondary attempts as [`Propagation::Cancelled`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entity::{Entity, EntityId};
use crate::storage::traits::{AuthoritativeStore, CacheStore, Page, ReadModelStore, StorageError};
use crate::tier::{resolve, Probe, Resolution, Tier, TierProbe};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Authoritative {operation} failed for '{id}': {source}")]
    AuthoritativeWriteFailed {
        operation: &'static str,
        id: EntityId,
        #[source]
        source: StorageError,
    },
    #[error("No tier could answer for '{id}': {source}")]
    AuthoritativeReadExhausted {
        id: EntityId,
        #[source]
        source: StorageError,
    },
    #[error("Authoritative {operation} failed: {source}")]
    AuthoritativeQueryFailed {
        operation: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("Operation cancelled")]
    Cancelled,
}

/// What happened to one secondary tier during a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Applied,
    /// Tier not configured
    Skipped,
    Cancelled,
    Failed(String),
}

impl Propagation {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub id: EntityId,
    /// Committed version (`None` for deletes)
    pub version: Option<u64>,
    pub cache: Propagation,
    pub read_model: Propagation,
}

impl WriteReport {
    /// Both secondaries are known to hold the committed state.
    #[must_use]
    pub fn fully_propagated(&self) -> bool {
        !self.cache.is_failed()
            && !matches!(self.cache, Propagation::Cancelled)
            && self.read_model.is_applied()
    }
}

pub struct CompositeRepository<E: Entity> {
    authoritative: Arc<dyn AuthoritativeStore<E>>,
    read_model: Arc<dyn ReadModelStore<E>>,
    cache: Option<Arc<dyn CacheStore<E>>>,
    cache_ttl: Duration,
    promote_on_read: bool,
}

impl<E: Entity> Clone for CompositeRepository<E> {
    fn clone(&self) -> Self {
        Self {
            authoritative: Arc::clone(&self.authoritative),
            read_model: Arc::clone(&self.read_model),
            cache: self.cache.clone(),
            cache_ttl: self.cache_ttl,
            promote_on_read: self.promote_on_read,
        }
    }
}

impl<E: Entity> CompositeRepository<E> {
    /// Repository without a cache tier.
    pub fn new(authoritative: Arc<dyn AuthoritativeStore<E>>, read_model: Arc<dyn ReadModelStore<E>>) -> Self {
        Self {
            authoritative,
            read_model,
            cache: None,
            cache_ttl: Duration::from_secs(3600),
            promote_on_read: true,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore<E>>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Whether authoritative hits are written back into the cache.
    #[must_use]
    pub fn with_promote_on_read(mut self, promote: bool) -> Self {
        self.promote_on_read = promote;
        self
    }

    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    #[tracing::instrument(skip(self, entity, cancel), fields(entity_id = %entity.id()))]
    pub async fn add(&self, entity: &E, cancel: &CancellationToken) -> Result<WriteReport, RepositoryError> {
        let committed = self
            .commit("add", entity.id(), cancel, self.authoritative.add(entity))
            .await?;
        Ok(self.propagate_upsert(committed, cancel).await)
    }

    #[tracing::instrument(skip(self, entity, cancel), fields(entity_id = %entity.id()))]
    pub async fn update(&self, entity: &E, cancel: &CancellationToken) -> Result<WriteReport, RepositoryError> {
        let committed = self
            .commit("update", entity.id(), cancel, self.authoritative.update(entity))
            .await?;
        Ok(self.propagate_upsert(committed, cancel).await)
    }

    #[tracing::instrument(skip(self, cancel), fields(entity_id = %id))]
    pub async fn delete(&self, id: &EntityId, cancel: &CancellationToken) -> Result<WriteReport, RepositoryError> {
        let existed = self
            .commit("delete", id, cancel, self.authoritative.delete(id))
            .await?;
        if !existed {
            debug!("Entity was not in the authoritative store, clearing secondaries anyway");
        }

        let cache_attempt = async {
            match &self.cache {
                Some(cache) => attempt(Tier::Cache, "delete", id, cancel, cache.delete(id)).await,
                None => Propagation::Skipped,
            }
        };
        let read_model_attempt = attempt(Tier::ReadModel, "delete", id, cancel, self.read_model.delete(id));
        let (cache, read_model) = tokio::join!(cache_attempt, read_model_attempt);

        crate::metrics::record_operation("delete", "success");
        Ok(WriteReport {
            id: id.clone(),
            version: None,
            cache,
            read_model,
        })
    }

    /// Run the authoritative half of a write. Nothing starts if already cancelled.
    async fn commit<T, F>(
        &self,
        operation: &'static str,
        id: &EntityId,
        cancel: &CancellationToken,
        write: F,
    ) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        if cancel.is_cancelled() {
            debug!(operation, "Cancelled before the authoritative write");
            crate::metrics::record_operation(operation, "cancelled");
            return Err(RepositoryError::Cancelled);
        }

        // not raced against the token: a started commit is allowed to finish
        write.await.map_err(|source| {
            warn!(
                tier = %Tier::Authoritative,
                operation,
                entity_id = %id,
                error = %source,
                "Authoritative write failed"
            );
            crate::metrics::record_operation(operation, "error");
            crate::metrics::record_error(Tier::Authoritative.as_str(), operation, source.kind());
            RepositoryError::AuthoritativeWriteFailed {
                operation,
                id: id.clone(),
                source,
            }
        })
    }

    async fn propagate_upsert(&self, committed: E, cancel: &CancellationToken) -> WriteReport {
        let id = committed.id();

        let cache_attempt = async {
            match &self.cache {
                Some(cache) => attempt(Tier::Cache, "set", id, cancel, cache.set(&committed, self.cache_ttl)).await,
                None => Propagation::Skipped,
            }
        };
        let read_model_attempt = attempt(Tier::ReadModel, "upsert", id, cancel, self.read_model.upsert(&committed));
        let (cache, read_model) = tokio::join!(cache_attempt, read_model_attempt);

        crate::metrics::record_operation("write", "success");
        WriteReport {
            id: id.clone(),
            version: Some(committed.version()),
            cache,
            read_model,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    #[tracing::instrument(skip(self, cancel), fields(entity_id = %id, tier))]
    pub async fn get(&self, id: &EntityId, cancel: &CancellationToken) -> Result<Option<E>, RepositoryError> {
        let mut probes = Vec::with_capacity(Tier::CASCADE.len());

        for tier in Tier::CASCADE {
            let Some(result) = race(cancel, self.lookup(tier, id)).await? else {
                continue;
            };
            let probe = Probe::from_lookup(result);
            note_probe(tier, "get", id, &probe);
            let hit = probe.is_hit();
            probes.push(TierProbe::new(tier, probe));
            if hit {
                break;
            }
        }

        match resolve(probes) {
            Resolution::Found { tier, value } => {
                tracing::Span::current().record("tier", tier.as_str());
                crate::metrics::record_read_served(tier.as_str());
                if tier == Tier::Authoritative && self.promote_on_read {
                    self.promote(&value, cancel).await;
                }
                Ok(Some(value))
            }
            Resolution::NotFound => {
                crate::metrics::record_read_served("none");
                Ok(None)
            }
            Resolution::Exhausted(source) => {
                crate::metrics::record_operation("get", "error");
                Err(RepositoryError::AuthoritativeReadExhausted { id: id.clone(), source })
            }
        }
    }

    /// Existence check in cascade order. Only the authoritative tier can answer `false`.
    #[tracing::instrument(skip(self, cancel), fields(entity_id = %id, tier))]
    pub async fn exists(&self, id: &EntityId, cancel: &CancellationToken) -> Result<bool, RepositoryError> {
        let mut probes = Vec::with_capacity(Tier::CASCADE.len());

        for tier in Tier::CASCADE {
            let Some(result) = race(cancel, self.check(tier, id)).await? else {
                continue;
            };
            let probe = Probe::from_exists(result);
            note_probe(tier, "exists", id, &probe);
            let hit = probe.is_hit();
            probes.push(TierProbe::new(tier, probe));
            if hit {
                break;
            }
        }

        match resolve(probes) {
            Resolution::Found { tier, .. } => {
                tracing::Span::current().record("tier", tier.as_str());
                Ok(true)
            }
            Resolution::NotFound => Ok(false),
            Resolution::Exhausted(source) => {
                crate::metrics::record_operation("exists", "error");
                Err(RepositoryError::AuthoritativeReadExhausted { id: id.clone(), source })
            }
        }
    }

    /// One page of entities, always from the authoritative store.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn browse(&self, page: Page, cancel: &CancellationToken) -> Result<Vec<E>, RepositoryError> {
        race(cancel, self.authoritative.browse(page))
            .await?
            .map_err(|source| query_failed("browse", source))
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn count(&self, cancel: &CancellationToken) -> Result<u64, RepositoryError> {
        race(cancel, self.authoritative.count())
            .await?
            .map_err(|source| query_failed("count", source))
    }

    /// `None` when the tier isn't configured.
    async fn lookup(&self, tier: Tier, id: &EntityId) -> Option<Result<Option<E>, StorageError>> {
        match tier {
            Tier::Cache => match &self.cache {
                Some(cache) => Some(cache.get(id).await),
                None => None,
            },
            Tier::ReadModel => Some(self.read_model.get(id).await),
            Tier::Authoritative => Some(self.authoritative.get_by_id(id).await),
        }
    }

    async fn check(&self, tier: Tier, id: &EntityId) -> Option<Result<bool, StorageError>> {
        match tier {
            Tier::Cache => match &self.cache {
                Some(cache) => Some(cache.key_exists(id).await),
                None => None,
            },
            Tier::ReadModel => Some(self.read_model.exists(id).await),
            Tier::Authoritative => Some(self.authoritative.exists(id).await),
        }
    }

    /// Write an authoritative hit into the cache. Never touches the read model.
    ///
    /// A delete landing between the authoritative read and this write leaves
    /// the stale copy cached for one TTL.
    async fn promote(&self, value: &E, cancel: &CancellationToken) {
        if let Some(cache) = &self.cache {
            let outcome = attempt(Tier::Cache, "promote", value.id(), cancel, cache.set(value, self.cache_ttl)).await;
            if outcome.is_applied() {
                debug!(entity_id = %value.id(), "Promoted authoritative hit to cache");
            }
        }
    }
}

/// One best-effort secondary attempt.
async fn attempt<F>(tier: Tier, operation: &'static str, id: &EntityId, cancel: &CancellationToken, fut: F) -> Propagation
where
    F: Future<Output = Result<(), StorageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(tier = %tier, operation, entity_id = %id, "Secondary attempt cancelled");
            Propagation::Cancelled
        }
        result = fut => match result {
            Ok(()) => Propagation::Applied,
            Err(e) => {
                warn!(
                    tier = %tier,
                    operation,
                    entity_id = %id,
                    error = %e,
                    "Secondary propagation failed"
                );
                crate::metrics::record_propagation_failure(tier.as_str(), operation);
                crate::metrics::record_error(tier.as_str(), operation, e.kind());
                Propagation::Failed(e.to_string())
            }
        },
    }
}

async fn race<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, RepositoryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepositoryError::Cancelled),
        value = fut => Ok(value),
    }
}

fn note_probe<T>(tier: Tier, operation: &'static str, id: &EntityId, probe: &Probe<T>) {
    match probe {
        Probe::Unavailable(e) => {
            warn!(tier = %tier, operation, entity_id = %id, error = %e, "Tier lookup failed, falling through");
            crate::metrics::record_error(tier.as_str(), operation, e.kind());
        }
        _ => debug!(tier = %tier, outcome = probe.label(), "Tier probed"),
    }
}

fn query_failed(operation: &'static str, source: StorageError) -> RepositoryError {
    warn!(tier = %Tier::Authoritative, operation, error = %source, "Authoritative query failed");
    crate::metrics::record_error(Tier::Authoritative.as_str(), operation, source.kind());
    RepositoryError::AuthoritativeQueryFailed { operation, source }
}
