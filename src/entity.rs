// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity model shared by every tier.
//!
//! An [`Entity`] is anything with an immutable [`EntityId`] and a version that the
//! authoritative store bumps on every committed update. [`Record`] is a ready-made
//! JSON document entity for callers that don't want to define their own type.
//!
//! # Example
//!
//! ```
//! use tier_sync::{Entity, Record};
//! use serde_json::json;
//!
//! let record = Record::new("lesson.42".into(), json!({"title": "Fractions"}));
//!
//! assert_eq!(record.id().as_str(), "lesson.42");
//! assert_eq!(record.version(), 1);
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, immutable entity identifier. The join key across all tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Anything that can live in the three tiers.
///
/// Implementations must keep `id()` stable for the lifetime of the entity.
/// `with_version` is used by the authoritative store to stamp the committed
/// version; nothing else should call it.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &EntityId;

    fn version(&self) -> u64;

    #[must_use]
    fn with_version(self, version: u64) -> Self;
}

/// A JSON document entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    /// Committed version (1 on create, +1 per update)
    pub version: u64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
    /// The actual payload
    pub content: Value,
}

impl Record {
    /// Create a new record at version 1.
    pub fn new(id: EntityId, content: Value) -> Self {
        Self {
            id,
            version: 1,
            updated_at: now_millis(),
            content,
        }
    }

    /// Replace the payload, keeping id and version (the store bumps the version).
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self.updated_at = now_millis();
        self
    }
}

impl Entity for Record {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
