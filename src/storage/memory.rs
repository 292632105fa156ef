//! In-memory adapters for all three tiers.
//!
//! Backed by [`DashMap`], so they are safe to share across tasks. Useful for
//! tests, local development, and as the cache tier of a single process.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{AuthoritativeStore, CacheStore, Page, ReadModelStore, StorageError};
use crate::entity::{Entity, EntityId};

/// In-memory source of truth with version stamping.
pub struct InMemoryAuthoritativeStore<E> {
    data: DashMap<EntityId, E>,
}

impl<E: Entity> InMemoryAuthoritativeStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<E: Entity> Default for InMemoryAuthoritativeStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> AuthoritativeStore<E> for InMemoryAuthoritativeStore<E> {
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn add(&self, entity: &E) -> Result<E, StorageError> {
        use dashmap::mapref::entry::Entry;

        match self.data.entry(entity.id().clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(entity.id().clone())),
            Entry::Vacant(slot) => {
                let committed = entity.clone().with_version(1);
                slot.insert(committed.clone());
                Ok(committed)
            }
        }
    }

    async fn update(&self, entity: &E) -> Result<E, StorageError> {
        // get_mut holds the shard lock, so read-bump-write is atomic per id
        let mut current = self
            .data
            .get_mut(entity.id())
            .ok_or_else(|| StorageError::NotFound(entity.id().clone()))?;
        let committed = entity.clone().with_version(current.version() + 1);
        *current = committed.clone();
        Ok(committed)
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.data.remove(id).is_some())
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(id))
    }

    async fn browse(&self, page: Page) -> Result<Vec<E>, StorageError> {
        let mut ids: Vec<EntityId> = self.data.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit)
            .filter_map(|id| self.data.get(&id).map(|r| r.value().clone()))
            .collect())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}

struct CacheEntry<E> {
    value: E,
    expires_at: Instant,
}

/// In-memory TTL cache. Expired entries read as misses and are dropped lazily.
pub struct InMemoryCacheStore<E> {
    data: DashMap<EntityId, CacheEntry<E>>,
}

impl<E: Entity> InMemoryCacheStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.data.retain(|_, entry| entry.expires_at > now);
    }

    fn live(&self, id: &EntityId) -> Option<E> {
        let now = Instant::now();
        let hit = self
            .data
            .get(id)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));
        match hit {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                self.data.remove_if(id, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }
}

impl<E: Entity> Default for InMemoryCacheStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> CacheStore<E> for InMemoryCacheStore<E> {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        Ok(self.live(id))
    }

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StorageError> {
        self.data.insert(
            entity.id().clone(),
            CacheEntry {
                value: entity.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.data.remove(id);
        Ok(())
    }

    async fn key_exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.live(id).is_some())
    }
}

/// In-memory read model with version-guarded upserts.
pub struct InMemoryReadModelStore<E> {
    data: DashMap<EntityId, E>,
}

impl<E: Entity> InMemoryReadModelStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<E: Entity> Default for InMemoryReadModelStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> ReadModelStore<E> for InMemoryReadModelStore<E> {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn upsert(&self, entity: &E) -> Result<(), StorageError> {
        self.data
            .entry(entity.id().clone())
            .and_modify(|current| {
                if entity.version() >= current.version() {
                    *current = entity.clone();
                }
            })
            .or_insert_with(|| entity.clone());
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        self.data.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use serde_json::json;
    use std::sync::Arc;

    fn record(id: &str) -> Record {
        Record::new(id.into(), json!({"test": "data", "id": id}))
    }

    #[tokio::test]
    async fn test_authoritative_add_commits_version_one() {
        let store = InMemoryAuthoritativeStore::new();
        let committed = store.add(&record("a").with_version(9)).await.unwrap();

        assert_eq!(committed.version, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_authoritative_add_rejects_duplicate() {
        let store = InMemoryAuthoritativeStore::new();
        store.add(&record("a")).await.unwrap();

        let result = store.add(&record("a")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_authoritative_update_bumps_version() {
        let store = InMemoryAuthoritativeStore::new();
        let v1 = store.add(&record("a")).await.unwrap();

        let v2 = store
            .update(&v1.clone().with_content(json!({"n": 2})))
            .await
            .unwrap();
        let v3 = store.update(&v2).await.unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v3.version, 3);
        let stored = store.get_by_id(&"a".into()).await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.content["n"], 2);
    }

    #[tokio::test]
    async fn test_authoritative_update_missing_is_not_found() {
        let store = InMemoryAuthoritativeStore::new();
        let result = store.update(&record("ghost")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_authoritative_delete_reports_presence() {
        let store = InMemoryAuthoritativeStore::new();
        store.add(&record("a")).await.unwrap();

        assert!(store.delete(&"a".into()).await.unwrap());
        assert!(!store.delete(&"a".into()).await.unwrap());
        assert!(!store.exists(&"a".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_authoritative_browse_pages_in_id_order() {
        let store = InMemoryAuthoritativeStore::new();
        for i in (0..7).rev() {
            store.add(&record(&format!("item-{i}"))).await.unwrap();
        }

        let first = store.browse(Page::first(3)).await.unwrap();
        let second = store.browse(Page::first(3).next()).await.unwrap();
        let last = store.browse(Page::new(6, 3)).await.unwrap();
        let past_end = store.browse(Page::new(100, 3)).await.unwrap();

        let ids: Vec<_> = first.iter().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["item-0", "item-1", "item-2"]);
        assert_eq!(second[0].id.as_str(), "item-3");
        assert_eq!(last.len(), 1);
        assert!(past_end.is_empty());
        assert_eq!(store.count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cache_set_and_get() {
        let cache = InMemoryCacheStore::new();
        cache.set(&record("a"), Duration::from_secs(60)).await.unwrap();

        assert!(cache.get(&"a".into()).await.unwrap().is_some());
        assert!(cache.key_exists(&"a".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_entries_expire() {
        let cache = InMemoryCacheStore::new();
        cache.set(&record("a"), Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get(&"a".into()).await.unwrap().is_none());
        assert!(!cache.key_exists(&"a".into()).await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_purge_expired() {
        let cache = InMemoryCacheStore::new();
        cache.set(&record("short"), Duration::from_millis(5)).await.unwrap();
        cache.set(&record("long"), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.purge_expired();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_delete_nonexistent_is_ok() {
        let cache: InMemoryCacheStore<Record> = InMemoryCacheStore::new();
        assert!(cache.delete(&"nothing".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_model_upsert_is_idempotent() {
        let store = InMemoryReadModelStore::new();
        let item = record("a");

        store.upsert(&item).await.unwrap();
        store.upsert(&item).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"a".into()).await.unwrap().unwrap(), item);
    }

    #[tokio::test]
    async fn test_read_model_ignores_older_versions() {
        let store = InMemoryReadModelStore::new();
        let newer = record("a").with_version(3).with_content(json!({"v": 3}));
        let older = record("a").with_version(2).with_content(json!({"v": 2}));

        store.upsert(&newer).await.unwrap();
        store.upsert(&older).await.unwrap();

        let stored = store.get(&"a".into()).await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.content["v"], 3);
    }

    #[tokio::test]
    async fn test_read_model_concurrent_upserts() {
        let store = Arc::new(InMemoryReadModelStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .upsert(&record(&format!("batch-{batch}-item-{i}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
