//! Entity lifecycle events consumed by the sync handler.
//!
//! Events are `kind`-tagged JSON on the wire:
//!
//! ```
//! use tier_sync::{EntityEvent, Record};
//!
//! let event: EntityEvent<Record> =
//!     serde_json::from_str(r#"{"kind": "removed", "id": "lesson.42"}"#).unwrap();
//! assert_eq!(event.id().as_str(), "lesson.42");
//! assert_eq!(event.kind(), "removed");
//! ```

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};

/// A committed change to an entity. Delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityEvent<E> {
    Created { id: EntityId },
    /// Carries the entity as it was committed
    Modified { id: EntityId, snapshot: E },
    Removed { id: EntityId },
}

impl<E: Entity> EntityEvent<E> {
    pub fn created(id: impl Into<EntityId>) -> Self {
        Self::Created { id: id.into() }
    }

    /// Modified event keyed by the snapshot's own id.
    pub fn modified(snapshot: E) -> Self {
        Self::Modified {
            id: snapshot.id().clone(),
            snapshot,
        }
    }

    pub fn removed(id: impl Into<EntityId>) -> Self {
        Self::Removed { id: id.into() }
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Created { id } | Self::Modified { id, .. } | Self::Removed { id } => id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Modified { .. } => "modified",
            Self::Removed { .. } => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use serde_json::json;

    #[test]
    fn test_modified_wire_shape() {
        let event = EntityEvent::modified(Record::new("a".into(), json!({"n": 1})));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["kind"], "modified");
        assert_eq!(value["id"], "a");
        assert_eq!(value["snapshot"]["content"]["n"], 1);

        let back: EntityEvent<Record> = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<EntityEvent<Record>>(r#"{"kind": "renamed", "id": "a"}"#);
        assert!(parsed.is_err());
    }
}
