// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL authoritative store.
//!
//! One row per entity, with the version kept in its own column so updates can
//! be applied with an optimistic check:
//! ```sql
//! CREATE TABLE tier_entities (
//!   id VARCHAR(255) PRIMARY KEY,
//!   version BIGINT NOT NULL,
//!   updated_at BIGINT NOT NULL,
//!   payload_hash VARCHAR(64) NOT NULL,  -- sha256 of payload, checked on read
//!   payload LONGTEXT NOT NULL            -- entity as JSON
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL LONGTEXT comes back as BLOB through the `Any` driver, so text columns
//! are read as `String` first and then as `Vec<u8>`.

use std::marker::PhantomData;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{AuthoritativeStore, Page, StorageError};
use crate::entity::{now_millis, Entity, EntityId};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn payload_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Read a text column that MySQL may hand back as bytes.
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub struct SqlAuthoritativeStore<E> {
    pool: AnyPool,
    is_sqlite: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqlAuthoritativeStore<E> {
    /// Connect, enable WAL on SQLite and create the table if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::connect(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self {
            pool,
            is_sqlite,
            _entity: PhantomData,
        };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS tier_entities (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                payload_hash TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS tier_entities (
                id VARCHAR(255) PRIMARY KEY,
                version BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                payload_hash VARCHAR(64) NOT NULL,
                payload LONGTEXT NOT NULL,
                INDEX idx_updated_at (updated_at)
            )
            "#
        };

        retry("sql_init_schema", &RetryConfig::connect(), || async {
            sqlx::query(sql).execute(&self.pool).await.map_err(backend)
        })
        .await?;

        Ok(())
    }

    /// Decode a row, verifying the stored hash against the payload.
    fn decode_row(row: &AnyRow) -> Result<E, StorageError> {
        let id = text_column(row, "id").ok_or_else(|| StorageError::Backend("Row has no id".into()))?;
        let payload = text_column(row, "payload")
            .ok_or_else(|| StorageError::Backend(format!("No payload in row '{id}'")))?;
        let expected = text_column(row, "payload_hash").unwrap_or_default();

        let actual = payload_hash(&payload);
        if expected != actual {
            return Err(StorageError::Corruption {
                id: EntityId::new(id),
                expected,
                actual,
            });
        }

        let version: i64 = row.try_get("version").map_err(backend)?;
        let entity: E =
            serde_json::from_str(&payload).map_err(|e| StorageError::Serialization(e.to_string()))?;
        // the version column is the source of truth
        Ok(entity.with_version(version as u64))
    }

    fn encode(entity: &E) -> Result<(String, String), StorageError> {
        let payload = serde_json::to_string(entity).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let hash = payload_hash(&payload);
        Ok((payload, hash))
    }

    async fn current_version(&self, id: &EntityId) -> Result<Option<u64>, StorageError> {
        let id = id.as_str();
        retry("sql_version", &RetryConfig::read(), || async {
            let row = sqlx::query("SELECT version FROM tier_entities WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            row.map(|r| r.try_get::<i64, _>("version").map(|v| v as u64).map_err(backend))
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl<E: Entity> AuthoritativeStore<E> for SqlAuthoritativeStore<E> {
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<E>, StorageError> {
        let id = id.as_str();
        let row = retry("sql_get", &RetryConfig::read(), || async {
            sqlx::query("SELECT id, version, payload_hash, payload FROM tier_entities WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        // decoded outside the retry, corruption is not transient
        row.as_ref().map(Self::decode_row).transpose()
    }

    // Writes run once. A retried insert could report its own commit as a conflict.
    async fn add(&self, entity: &E) -> Result<E, StorageError> {
        if self.current_version(entity.id()).await?.is_some() {
            return Err(StorageError::AlreadyExists(entity.id().clone()));
        }

        let committed = entity.clone().with_version(1);
        let (payload, hash) = Self::encode(&committed)?;

        let result = sqlx::query(
            "INSERT INTO tier_entities (id, version, updated_at, payload_hash, payload) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(committed.id().as_str())
        .bind(1_i64)
        .bind(now_millis())
        .bind(&hash)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(committed),
            // lost a race with a concurrent add
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::AlreadyExists(committed.id().clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(&self, entity: &E) -> Result<E, StorageError> {
        let stored = self
            .current_version(entity.id())
            .await?
            .ok_or_else(|| StorageError::NotFound(entity.id().clone()))?;

        let committed = entity.clone().with_version(stored + 1);
        let (payload, hash) = Self::encode(&committed)?;

        let result = sqlx::query(
            "UPDATE tier_entities SET version = ?, updated_at = ?, payload_hash = ?, payload = ? WHERE id = ? AND version = ?",
        )
        .bind(committed.version() as i64)
        .bind(now_millis())
        .bind(&hash)
        .bind(&payload)
        .bind(committed.id().as_str())
        .bind(stored as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict {
                id: committed.id().clone(),
                expected: stored,
            });
        }
        Ok(committed)
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM tier_entities WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
        let id = id.as_str();
        retry("sql_exists", &RetryConfig::read(), || async {
            let result = sqlx::query("SELECT 1 FROM tier_entities WHERE id = ? LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.is_some())
        })
        .await
    }

    async fn browse(&self, page: Page) -> Result<Vec<E>, StorageError> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let rows = retry("sql_browse", &RetryConfig::read(), || async {
            sqlx::query(
                "SELECT id, version, payload_hash, payload FROM tier_entities ORDER BY id LIMIT ? OFFSET ?",
            )
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        retry("sql_count", &RetryConfig::read(), || async {
            let row = sqlx::query("SELECT COUNT(*) AS total FROM tier_entities")
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            let total: i64 = row.try_get("total").map_err(backend)?;
            Ok(total as u64)
        })
        .await
    }
}
