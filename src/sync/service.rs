// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Explicit read-model synchronization with health accounting.
//!
//! Every call to [`SyncService::sync_entity`] or [`SyncService::remove_entity`]
//! counts exactly one success or one failure and one latency sample. Neither
//! method returns an error; the outcome says what happened.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::status::{SyncMetrics, SyncStatus};
use crate::entity::{Entity, EntityId};
use crate::storage::traits::ReadModelStore;

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Synced { latency: Duration },
    Failed { latency: Duration, reason: String },
}

impl SyncOutcome {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    #[must_use]
    pub fn latency(&self) -> Duration {
        match self {
            Self::Synced { latency } | Self::Failed { latency, .. } => *latency,
        }
    }
}

pub struct SyncService<E: Entity> {
    read_model: Arc<dyn ReadModelStore<E>>,
    metrics: Arc<SyncMetrics>,
}

impl<E: Entity> Clone for SyncService<E> {
    fn clone(&self) -> Self {
        Self {
            read_model: Arc::clone(&self.read_model),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E: Entity> SyncService<E> {
    pub fn new(read_model: Arc<dyn ReadModelStore<E>>, metrics: Arc<SyncMetrics>) -> Self {
        Self { read_model, metrics }
    }

    /// Upsert `entity` into the read model.
    pub async fn sync_entity(&self, entity: &E) -> SyncOutcome {
        let start = Instant::now();
        let result = self.read_model.upsert(entity).await;
        self.finish("upsert", entity.id(), start.elapsed(), result)
    }

    /// Delete `id` from the read model. Deleting an absent document succeeds.
    pub async fn remove_entity(&self, id: &EntityId) -> SyncOutcome {
        let start = Instant::now();
        let result = self.read_model.delete(id).await;
        self.finish("delete", id, start.elapsed(), result)
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.metrics.status()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    fn finish(
        &self,
        operation: &'static str,
        id: &EntityId,
        latency: Duration,
        result: Result<(), crate::StorageError>,
    ) -> SyncOutcome {
        let success = result.is_ok();
        let status = self.metrics.record(success, latency);
        crate::metrics::record_sync(operation, success, latency);

        match result {
            Ok(()) => {
                debug!(entity_id = %id, operation, ?latency, "Read model synced");
                SyncOutcome::Synced { latency }
            }
            Err(e) => {
                warn!(
                    entity_id = %id,
                    operation,
                    error = %e,
                    total_failed = status.total_failed,
                    healthy = status.is_healthy,
                    "Read model sync failed"
                );
                crate::metrics::record_error("read_model", operation, e.kind());
                SyncOutcome::Failed {
                    latency,
                    reason: e.to_string(),
                }
            }
        }
    }
}
