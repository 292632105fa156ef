//! Store adapters for the three tiers.

pub mod guarded;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;

pub use guarded::Guarded;
pub use memory::{InMemoryAuthoritativeStore, InMemoryCacheStore, InMemoryReadModelStore};
pub use redis::{RedisCacheStore, RedisReadModelStore};
pub use sql::SqlAuthoritativeStore;
pub use traits::{AuthoritativeStore, CacheStore, Page, ReadModelStore, StorageError};
