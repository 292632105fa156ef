//! Shared fixtures: fault-injecting store wrappers and an in-memory stack.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tier_sync::storage::{InMemoryAuthoritativeStore, InMemoryCacheStore, InMemoryReadModelStore};
use tier_sync::{
    AuthoritativeStore, CacheStore, CompositeRepository, EntityId, EventDrivenSyncHandler, HealthPolicy, Page,
    ReadModelStore, Record, StorageError, SyncMetrics, SyncService,
};

// =============================================================================
// Faulty - switchable failure and latency injection
// =============================================================================

/// Wraps any store. Every call can be made to fail or to stall.
pub struct Faulty<S> {
    inner: S,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl<S> Faulty<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn gate(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: AuthoritativeStore<Record>> AuthoritativeStore<Record> for Faulty<S> {
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<Record>, StorageError> {
        self.gate().await?;
        self.inner.get_by_id(id).await
    }
    async fn add(&self, entity: &Record) -> Result<Record, StorageError> {
        self.gate().await?;
        self.inner.add(entity).await
    }
    async fn update(&self, entity: &Record) -> Result<Record, StorageError> {
        self.gate().await?;
        self.inner.update(entity).await
    }
    async fn delete(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.gate().await?;
        self.inner.delete(id).await
    }
    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.gate().await?;
        self.inner.exists(id).await
    }
    async fn browse(&self, page: Page) -> Result<Vec<Record>, StorageError> {
        self.gate().await?;
        self.inner.browse(page).await
    }
    async fn count(&self) -> Result<u64, StorageError> {
        self.gate().await?;
        self.inner.count().await
    }
}

#[async_trait]
impl<S: CacheStore<Record>> CacheStore<Record> for Faulty<S> {
    async fn get(&self, id: &EntityId) -> Result<Option<Record>, StorageError> {
        self.gate().await?;
        self.inner.get(id).await
    }
    async fn set(&self, entity: &Record, ttl: Duration) -> Result<(), StorageError> {
        self.gate().await?;
        self.inner.set(entity, ttl).await
    }
    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.gate().await?;
        self.inner.delete(id).await
    }
    async fn key_exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.gate().await?;
        self.inner.key_exists(id).await
    }
}

#[async_trait]
impl<S: ReadModelStore<Record>> ReadModelStore<Record> for Faulty<S> {
    async fn get(&self, id: &EntityId) -> Result<Option<Record>, StorageError> {
        self.gate().await?;
        self.inner.get(id).await
    }
    async fn upsert(&self, entity: &Record) -> Result<(), StorageError> {
        self.gate().await?;
        self.inner.upsert(entity).await
    }
    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.gate().await?;
        self.inner.delete(id).await
    }
    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.gate().await?;
        self.inner.exists(id).await
    }
}

// =============================================================================
// Harness - in-memory stack with every tier wrapped
// =============================================================================

pub type FaultyAuthoritative = Faulty<InMemoryAuthoritativeStore<Record>>;
pub type FaultyCache = Faulty<InMemoryCacheStore<Record>>;
pub type FaultyReadModel = Faulty<InMemoryReadModelStore<Record>>;

pub struct Harness {
    pub authoritative: Arc<FaultyAuthoritative>,
    pub cache: Arc<FaultyCache>,
    pub read_model: Arc<FaultyReadModel>,
    pub repo: CompositeRepository<Record>,
    pub sync: SyncService<Record>,
    pub handler: EventDrivenSyncHandler<Record>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(HealthPolicy::default())
    }

    pub fn with_policy(policy: HealthPolicy) -> Self {
        let authoritative = Arc::new(Faulty::new(InMemoryAuthoritativeStore::<Record>::new()));
        let cache = Arc::new(Faulty::new(InMemoryCacheStore::<Record>::new()));
        let read_model = Arc::new(Faulty::new(InMemoryReadModelStore::<Record>::new()));

        let authoritative_dyn: Arc<dyn AuthoritativeStore<Record>> = authoritative.clone();
        let read_model_dyn: Arc<dyn ReadModelStore<Record>> = read_model.clone();
        let cache_dyn: Arc<dyn CacheStore<Record>> = cache.clone();

        let repo = CompositeRepository::new(Arc::clone(&authoritative_dyn), Arc::clone(&read_model_dyn))
            .with_cache(cache_dyn, Duration::from_secs(60));
        let sync = SyncService::new(read_model_dyn, Arc::new(SyncMetrics::new(policy)));
        let handler = EventDrivenSyncHandler::new(authoritative_dyn, sync.clone());

        Self {
            authoritative,
            cache,
            read_model,
            repo,
            sync,
            handler,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
