//! # Tier Sync
//!
//! A multi-store consistency layer: one authoritative store, two faster
//! denormalized stores kept close to it, and a read path that cascades across all three.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CompositeRepository                      │
//! │  • add / update / delete: authoritative first              │
//! │  • get / exists: cache → read model → authoritative        │
//! │  • browse / count: authoritative only                      │
//! └─────────────────────────────────────────────────────────────┘
//!        │ best-effort            │ best-effort          │ must succeed
//!        ▼                        ▼                      ▼
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────────┐
//! │ Cache        │   │ Read model           │   │ Authoritative    │
//! │ Redis, TTL   │   │ Redis documents,     │   │ MySQL / SQLite,  │
//! │ optional     │   │ version-guarded      │   │ hash-verified    │
//! └──────────────┘   └──────────────────────┘   └──────────────────┘
//!                                ▲                      │
//!                                │ upsert / remove      │ re-read
//! ┌─────────────────────────────────────────────────────────────┐
//! │   EventDrivenSyncHandler → SyncService (health metrics)     │
//! │   Created / Modified / Removed, at-least-once               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tier_sync::storage::{InMemoryAuthoritativeStore, InMemoryCacheStore, InMemoryReadModelStore};
//! use tier_sync::{CompositeRepository, Record};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let repo = CompositeRepository::<Record>::new(
//!     Arc::new(InMemoryAuthoritativeStore::new()),
//!     Arc::new(InMemoryReadModelStore::new()),
//! )
//! .with_cache(Arc::new(InMemoryCacheStore::new()), Duration::from_secs(3600));
//!
//! let cancel = CancellationToken::new();
//! let report = repo.add(&Record::new("lesson.42".into(), json!({"title": "Fractions"})), &cancel)
//!     .await
//!     .unwrap();
//! assert_eq!(report.version, Some(1));
//!
//! let found = repo.get(&"lesson.42".into(), &cancel).await.unwrap();
//! assert!(found.is_some());
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`repository`]: The [`CompositeRepository`] and its write reports
//! - [`sync`]: [`SyncService`], health metrics and the [`EventDrivenSyncHandler`]
//! - [`storage`]: Adapter traits plus in-memory, Redis and SQL adapters
//! - [`tier`]: Tier ordering and the pure cascade resolver
//! - [`resilience`]: Circuit breakers and retry logic
//! - [`warmer`]: Optional periodic cache warming
//! - [`stack`]: Wiring everything from a [`TierSyncConfig`]

pub mod config;
pub mod entity;
pub mod events;
pub mod metrics;
pub mod repository;
pub mod resilience;
pub mod stack;
pub mod storage;
pub mod sync;
pub mod tier;
pub mod warmer;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::TierSyncConfig;
pub use entity::{Entity, EntityId, Record};
pub use events::EntityEvent;
pub use repository::{CompositeRepository, Propagation, RepositoryError, WriteReport};
pub use resilience::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use stack::TierStack;
pub use storage::traits::{AuthoritativeStore, CacheStore, Page, ReadModelStore, StorageError};
pub use sync::{EventDrivenSyncHandler, HealthPolicy, SyncMetrics, SyncOutcome, SyncService, SyncState, SyncStatus};
pub use tier::{resolve, Probe, Resolution, Tier, TierProbe};
pub use warmer::{CacheWarmer, WarmReport};
