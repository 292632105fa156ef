use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::{Entity, EntityId};
use crate::tier::Tier;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Entity not found: {0}")]
    NotFound(EntityId),
    #[error("Entity already exists: {0}")]
    AlreadyExists(EntityId),
    #[error("Version conflict for '{id}': expected {expected}")]
    Conflict { id: EntityId, expected: u64 },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("{tier} tier timed out after {after:?}")]
    Timeout { tier: Tier, after: Duration },
    #[error("{0} tier unavailable (circuit open)")]
    Unavailable(Tier),
    #[error("Data corruption detected for '{id}': expected hash {expected}, got {actual}")]
    Corruption {
        id: EntityId,
        expected: String,
        actual: String,
    },
}

impl StorageError {
    /// Short category label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::Backend(_) => "backend",
            Self::Serialization(_) => "serialization",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "circuit_open",
            Self::Corruption { .. } => "corruption",
        }
    }

    /// Whether the error says something about the backend's health.
    ///
    /// `NotFound`, `AlreadyExists` and `Conflict` are answers from a working
    /// store and must not trip a circuit breaker.
    #[must_use]
    pub fn is_backend_fault(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::Conflict { .. }
        )
    }
}

/// Page request for authoritative listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: usize,
}

impl Page {
    #[must_use]
    pub fn new(offset: u64, limit: usize) -> Self {
        Self { offset, limit }
    }

    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit as u64,
            limit: self.limit,
        }
    }
}

/// Durable, strongly consistent source of truth.
///
/// `add` commits at version 1 and `update` at stored version + 1. Both return
/// the committed copy, which is what callers must propagate.
#[async_trait]
pub trait AuthoritativeStore<E: Entity>: Send + Sync {
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<E>, StorageError>;
    async fn add(&self, entity: &E) -> Result<E, StorageError>;
    async fn update(&self, entity: &E) -> Result<E, StorageError>;
    /// Returns whether the entity existed.
    async fn delete(&self, id: &EntityId) -> Result<bool, StorageError>;
    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError>;

    /// Stable, id-ordered listing. Returns an empty vec past the end.
    async fn browse(&self, page: Page) -> Result<Vec<E>, StorageError>;
    async fn count(&self) -> Result<u64, StorageError>;
}

/// Low-latency, TTL-bound cache. Never authoritative.
#[async_trait]
pub trait CacheStore<E: Entity>: Send + Sync {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError>;
    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StorageError>;
    async fn delete(&self, id: &EntityId) -> Result<(), StorageError>;
    async fn key_exists(&self, id: &EntityId) -> Result<bool, StorageError>;
}

/// Denormalized, document-oriented read model.
///
/// `upsert` is keyed by id and must never replace a newer version with an
/// older one. Equal versions overwrite.
#[async_trait]
pub trait ReadModelStore<E: Entity>: Send + Sync {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError>;
    async fn upsert(&self, entity: &E) -> Result<(), StorageError>;
    async fn delete(&self, id: &EntityId) -> Result<(), StorageError>;
    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError>;
}
