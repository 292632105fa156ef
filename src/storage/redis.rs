//! Redis adapters for the cache and read-model tiers.
//!
//! Both adapters serialize entities as JSON and share the connection handling:
//!
//! - **Cache** ([`RedisCacheStore`]) → plain strings written with `SETEX`, so every
//!   entry carries a TTL. Nothing in the cache outlives its TTL.
//! - **Read model** ([`RedisReadModelStore`]) → one hash per entity:
//!   ```text
//!   HSET {prefix}{id} version <u64> doc <json>
//!   ```
//!   Upserts go through a Lua script that refuses to replace a newer version,
//!   so reordered or replayed writes converge instead of regressing.
//!
//! Adapters never retry on their own: the guarded wrapper bounds each call with
//! the tier timeout and the caller decides what a failure means.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::traits::{CacheStore, ReadModelStore, StorageError};
use crate::entity::{Entity, EntityId};
use crate::resilience::retry::{retry, RetryConfig};

/// Compare-and-set on version: only write if the stored version is not newer.
const UPSERT_IF_NOT_OLDER: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current and tonumber(current) > tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'doc', ARGV[2])
return 1
"#;

/// Connection plus key namespacing, shared by both adapters.
#[derive(Clone)]
struct RedisConn {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "lessons:" → "lessons:42")
    prefix: String,
}

impl RedisConn {
    async fn connect(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        // bounded by the connect backoff, a bad URL fails within seconds
        let connection = retry("redis_connect", &RetryConfig::connect(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn key(&self, id: &EntityId) -> String {
        if self.prefix.is_empty() {
            id.as_str().to_string()
        } else {
            format!("{}{}", self.prefix, id)
        }
    }
}

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn decode<E: Entity>(json: &str) -> Result<E, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn encode<E: Entity>(entity: &E) -> Result<String, StorageError> {
    serde_json::to_string(entity).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// TTL-bound Redis cache.
pub struct RedisCacheStore<E> {
    conn: RedisConn,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RedisCacheStore<E> {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a cache whose keys are namespaced with `prefix`.
    ///
    /// ```rust,no_run
    /// # use tier_sync::storage::redis::RedisCacheStore;
    /// # use tier_sync::Record;
    /// # async fn example() -> Result<(), tier_sync::StorageError> {
    /// let cache = RedisCacheStore::<Record>::with_prefix("redis://localhost", Some("cache:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        Ok(Self {
            conn: RedisConn::connect(connection_string, prefix).await?,
            _entity: PhantomData,
        })
    }

    /// Get a clone of the connection manager (e.g. for health probes)
    pub fn connection(&self) -> ConnectionManager {
        self.conn.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.conn.prefix
    }
}

#[async_trait]
impl<E: Entity> CacheStore<E> for RedisCacheStore<E> {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        let mut conn = self.conn.connection.clone();
        let json: Option<String> = conn.get(self.conn.key(id)).await.map_err(backend)?;
        json.as_deref().map(decode).transpose()
    }

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.conn.connection.clone();
        let json = encode(entity)?;
        // SETEX rejects 0, round sub-second TTLs up
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.conn.key(entity.id()), json, seconds)
            .await
            .map_err(backend)
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        let mut conn = self.conn.connection.clone();
        conn.del::<_, ()>(self.conn.key(id)).await.map_err(backend)
    }

    async fn key_exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        let mut conn = self.conn.connection.clone();
        conn.exists(self.conn.key(id)).await.map_err(backend)
    }
}

/// Redis read model with version-guarded upserts.
pub struct RedisReadModelStore<E> {
    conn: RedisConn,
    upsert_script: Script,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RedisReadModelStore<E> {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        Ok(Self {
            conn: RedisConn::connect(connection_string, prefix).await?,
            upsert_script: Script::new(UPSERT_IF_NOT_OLDER),
            _entity: PhantomData,
        })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.connection.clone()
    }
}

#[async_trait]
impl<E: Entity> ReadModelStore<E> for RedisReadModelStore<E> {
    async fn get(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        let mut conn = self.conn.connection.clone();
        let doc: Option<String> = conn.hget(self.conn.key(id), "doc").await.map_err(backend)?;
        doc.as_deref().map(decode).transpose()
    }

    async fn upsert(&self, entity: &E) -> Result<(), StorageError> {
        let mut conn = self.conn.connection.clone();
        let doc = encode(entity)?;
        let applied: i64 = self
            .upsert_script
            .key(self.conn.key(entity.id()))
            .arg(entity.version())
            .arg(doc)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        if applied == 0 {
            tracing::debug!(entity_id = %entity.id(), version = entity.version(), "Read model already holds a newer version");
        }
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
        let mut conn = self.conn.connection.clone();
        conn.del::<_, ()>(self.conn.key(id)).await.map_err(backend)
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        let mut conn = self.conn.connection.clone();
        conn.exists(self.conn.key(id)).await.map_err(backend)
    }
}
