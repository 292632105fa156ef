//! Wiring: builds the guarded adapters, the repository, the sync service and the
//! event handler, and starts the background tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! use tier_sync::{EntityEvent, Record, TierStack, TierSyncConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), tier_sync::StorageError> {
//! let config = TierSyncConfig {
//!     sql_url: Some("sqlite:tier.db?mode=rwc".into()),
//!     read_model_url: Some("redis://localhost:6379".into()),
//!     ..Default::default()
//! };
//! let stack = TierStack::<Record>::connect(&config).await?;
//! let shutdown = CancellationToken::new();
//! let (events, _loop) = stack.spawn_event_loop(config.event_channel_capacity, shutdown.clone());
//!
//! let report = stack.repository.add(&Record::new("a".into(), serde_json::json!({})), &shutdown).await;
//! events.send(EntityEvent::created("a")).await.ok();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::TierSyncConfig;
use crate::entity::Entity;
use crate::events::EntityEvent;
use crate::repository::CompositeRepository;
use crate::storage::guarded::Guarded;
use crate::storage::redis::{RedisCacheStore, RedisReadModelStore};
use crate::storage::sql::SqlAuthoritativeStore;
use crate::storage::traits::{AuthoritativeStore, CacheStore, ReadModelStore, StorageError};
use crate::sync::{EventDrivenSyncHandler, SyncMetrics, SyncService};
use crate::tier::Tier;
use crate::warmer::CacheWarmer;

/// Everything a host needs, sharing one set of adapters.
pub struct TierStack<E: Entity> {
    pub repository: CompositeRepository<E>,
    pub sync: SyncService<E>,
    pub handler: Arc<EventDrivenSyncHandler<E>>,
    authoritative: Arc<dyn AuthoritativeStore<E>>,
    cache: Option<Arc<dyn CacheStore<E>>>,
    config: TierSyncConfig,
}

impl<E: Entity> TierStack<E> {
    /// Connect SQL and Redis from `config`.
    ///
    /// `sql_url` and `read_model_url` are required. The cache is only built when
    /// `redis_url` is set.
    pub async fn connect(config: &TierSyncConfig) -> Result<Self, StorageError> {
        let sql_url = config
            .sql_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("sql_url is not configured".into()))?;
        let read_model_url = config
            .read_model_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("read_model_url is not configured".into()))?;

        info!("Connecting authoritative store");
        let authoritative = SqlAuthoritativeStore::<E>::new(sql_url).await?;

        info!("Connecting read model");
        let read_model =
            RedisReadModelStore::<E>::with_prefix(read_model_url, Some(&config.read_model_prefix)).await?;

        let cache: Option<Arc<dyn CacheStore<E>>> = match config.redis_url.as_deref() {
            Some(url) => {
                info!("Connecting cache");
                let cache = RedisCacheStore::<E>::with_prefix(url, Some(&config.redis_prefix)).await?;
                Some(Arc::new(
                    Guarded::new(cache, Tier::Cache, config.cache_timeout()).with_circuit_breaker(),
                ))
            }
            None => {
                info!("No cache configured, running with two tiers");
                None
            }
        };

        let authoritative: Arc<dyn AuthoritativeStore<E>> = Arc::new(
            Guarded::new(authoritative, Tier::Authoritative, config.authoritative_timeout()).with_circuit_breaker(),
        );
        let read_model: Arc<dyn ReadModelStore<E>> = Arc::new(
            Guarded::new(read_model, Tier::ReadModel, config.read_model_timeout()).with_circuit_breaker(),
        );

        Ok(Self::from_parts(authoritative, read_model, cache, config))
    }

    /// Wire caller-supplied adapters. They are used as given, with no extra guarding.
    pub fn from_parts(
        authoritative: Arc<dyn AuthoritativeStore<E>>,
        read_model: Arc<dyn ReadModelStore<E>>,
        cache: Option<Arc<dyn CacheStore<E>>>,
        config: &TierSyncConfig,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::new(config.health_policy()));
        let sync = SyncService::new(Arc::clone(&read_model), metrics);
        let handler = Arc::new(EventDrivenSyncHandler::new(Arc::clone(&authoritative), sync.clone()));

        let mut repository = CompositeRepository::new(Arc::clone(&authoritative), read_model)
            .with_promote_on_read(config.promote_on_read);
        if let Some(cache) = &cache {
            repository = repository.with_cache(Arc::clone(cache), config.cache_ttl());
        }

        Self {
            repository,
            sync,
            handler,
            authoritative,
            cache,
            config: config.clone(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TierSyncConfig {
        &self.config
    }

    /// Start the handler on a fresh channel and return its sender.
    pub fn spawn_event_loop(
        &self,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (mpsc::Sender<EntityEvent<E>>, JoinHandle<u64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move { handler.run(rx, shutdown).await });
        (tx, task)
    }

    /// Start the cache warmer when warming is enabled and a cache exists.
    pub fn spawn_cache_warmer(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if self.config.cache_warm_interval_ms == 0 {
            return None;
        }
        let cache = self.cache.as_ref()?;

        let warmer = CacheWarmer::new(
            Arc::clone(&self.authoritative),
            Arc::clone(cache),
            self.config.cache_ttl(),
            self.config.cache_warm_batch_size,
        );
        let every = self.config.cache_warm_interval();
        Some(tokio::spawn(async move { warmer.run(every, shutdown).await }))
    }
}
