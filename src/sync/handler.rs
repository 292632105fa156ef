//! Event-driven read-model convergence.
//!
//! `Created` and `Removed` re-read the authoritative store and converge the
//! read model to whatever it says now, which makes reordered and duplicated
//! deliveries harmless. `Modified` trusts the snapshot captured at commit time.
//!
//! Failures end in [`SyncState::Failed`] and are logged. They are never
//! returned to the event source and never retried here.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::{SyncOutcome, SyncService};
use crate::entity::{Entity, EntityId};
use crate::events::EntityEvent;
use crate::storage::traits::AuthoritativeStore;

/// Per-entity sync progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Syncing,
    Synced,
    Failed,
}

impl SyncState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of the last finished event plus the events still running.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    in_flight: u32,
    last: SyncState,
}

impl Tracked {
    fn state(&self) -> SyncState {
        if self.in_flight > 0 {
            SyncState::Syncing
        } else {
            self.last
        }
    }
}

pub struct EventDrivenSyncHandler<E: Entity> {
    authoritative: Arc<dyn AuthoritativeStore<E>>,
    sync: SyncService<E>,
    states: DashMap<EntityId, Tracked>,
}

impl<E: Entity> EventDrivenSyncHandler<E> {
    pub fn new(authoritative: Arc<dyn AuthoritativeStore<E>>, sync: SyncService<E>) -> Self {
        Self {
            authoritative,
            sync,
            states: DashMap::new(),
        }
    }

    /// `Syncing` while any event for `id` is still running, otherwise the
    /// outcome of the last one to finish. Ids never seen are `Unsynced`.
    #[must_use]
    pub fn state(&self, id: &EntityId) -> SyncState {
        self.states.get(id).map_or(SyncState::Unsynced, |t| t.state())
    }

    #[must_use]
    pub fn sync_service(&self) -> &SyncService<E> {
        &self.sync
    }

    /// Handle one event and return the state it left the entity in.
    pub async fn handle(&self, event: EntityEvent<E>) -> SyncState {
        let kind = event.kind();
        let id = event.id().clone();
        self.states
            .entry(id.clone())
            .or_insert(Tracked {
                in_flight: 0,
                last: SyncState::Unsynced,
            })
            .in_flight += 1;

        let state = match event {
            EntityEvent::Created { id } => self.converge(kind, &id, false).await,
            EntityEvent::Removed { id } => self.converge(kind, &id, true).await,
            EntityEvent::Modified { id, snapshot } => {
                if snapshot.id() != &id {
                    warn!(
                        entity_id = %id,
                        snapshot_id = %snapshot.id(),
                        "Modified event snapshot does not match its id"
                    );
                    SyncState::Failed
                } else {
                    Self::settle(self.sync.sync_entity(&snapshot).await)
                }
            }
        };

        if let Some(mut tracked) = self.states.get_mut(&id) {
            tracked.in_flight = tracked.in_flight.saturating_sub(1);
            tracked.last = state;
        }
        crate::metrics::record_event(kind, state.as_str());
        debug!(entity_id = %id, kind, state = state.as_str(), "Event handled");
        state
    }

    /// Make the read model match the authoritative store for `id`.
    async fn converge(&self, kind: &'static str, id: &EntityId, expect_absent: bool) -> SyncState {
        match self.authoritative.get_by_id(id).await {
            Ok(Some(current)) => {
                if expect_absent {
                    debug!(entity_id = %id, "Removed entity still exists, syncing current copy");
                }
                Self::settle(self.sync.sync_entity(&current).await)
            }
            Ok(None) => {
                if !expect_absent {
                    debug!(entity_id = %id, "Created entity is already gone, removing from read model");
                }
                Self::settle(self.sync.remove_entity(id).await)
            }
            Err(e) => {
                warn!(entity_id = %id, kind, error = %e, "Authoritative re-read failed");
                SyncState::Failed
            }
        }
    }

    fn settle(outcome: SyncOutcome) -> SyncState {
        if outcome.is_synced() {
            SyncState::Synced
        } else {
            SyncState::Failed
        }
    }

    /// Consume events until the channel closes or `shutdown` fires.
    ///
    /// Returns the number of events handled.
    pub async fn run(&self, mut events: mpsc::Receiver<EntityEvent<E>>, shutdown: CancellationToken) -> u64 {
        info!("Sync event loop started");
        let mut handled = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(handled, "Shutdown signal received, stopping sync event loop");
                    break;
                }
                next = events.recv() => match next {
                    Some(event) => {
                        self.handle(event).await;
                        handled += 1;
                    }
                    None => {
                        info!(handled, "Event channel closed, stopping sync event loop");
                        break;
                    }
                },
            }
        }

        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::storage::memory::{InMemoryAuthoritativeStore, InMemoryReadModelStore};
    use crate::storage::traits::ReadModelStore;
    use crate::storage::traits::StorageError;
    use crate::sync::status::SyncMetrics;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Holds the first upsert until `release` is notified.
    struct Gated {
        inner: InMemoryReadModelStore<Record>,
        held: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl ReadModelStore<Record> for Gated {
        async fn get(&self, id: &EntityId) -> Result<Option<Record>, StorageError> {
            self.inner.get(id).await
        }
        async fn upsert(&self, entity: &Record) -> Result<(), StorageError> {
            if !self.held.swap(true, Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.inner.upsert(entity).await
        }
        async fn delete(&self, id: &EntityId) -> Result<(), StorageError> {
            self.inner.delete(id).await
        }
        async fn exists(&self, id: &EntityId) -> Result<bool, StorageError> {
            self.inner.exists(id).await
        }
    }

    struct Fixture {
        authoritative: Arc<InMemoryAuthoritativeStore<Record>>,
        read_model: Arc<InMemoryReadModelStore<Record>>,
        handler: EventDrivenSyncHandler<Record>,
    }

    fn fixture() -> Fixture {
        let authoritative = Arc::new(InMemoryAuthoritativeStore::<Record>::new());
        let read_model = Arc::new(InMemoryReadModelStore::<Record>::new());
        let sync = SyncService::<Record>::new(read_model.clone(), Arc::new(SyncMetrics::default()));
        let handler = EventDrivenSyncHandler::<Record>::new(authoritative.clone(), sync);
        Fixture {
            authoritative,
            read_model,
            handler,
        }
    }

    #[tokio::test]
    async fn test_created_fetches_canonical_copy() {
        let f = fixture();
        let committed = f
            .authoritative
            .add(&Record::new("a".into(), json!({"n": 1})))
            .await
            .unwrap();

        let state = f.handler.handle(EntityEvent::created("a")).await;

        assert_eq!(state, SyncState::Synced);
        assert_eq!(f.read_model.get(&"a".into()).await.unwrap(), Some(committed));
        assert_eq!(f.handler.state(&"a".into()), SyncState::Synced);
    }

    #[tokio::test]
    async fn test_created_for_vanished_entity_converges_to_absent() {
        let f = fixture();
        f.read_model.upsert(&Record::new("a".into(), json!({}))).await.unwrap();

        let state = f.handler.handle(EntityEvent::created("a")).await;

        assert_eq!(state, SyncState::Synced);
        assert!(!f.read_model.exists(&"a".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reordered_removed_keeps_live_entity() {
        let f = fixture();
        f.authoritative
            .add(&Record::new("a".into(), json!({"n": 1})))
            .await
            .unwrap();

        f.handler.handle(EntityEvent::removed("a")).await;

        assert!(f.read_model.exists(&"a".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_mismatched_snapshot_fails() {
        let f = fixture();
        let event = EntityEvent::Modified {
            id: "a".into(),
            snapshot: Record::new("b".into(), json!({})),
        };

        assert_eq!(f.handler.handle(event).await, SyncState::Failed);
        assert!(f.read_model.is_empty());
        assert_eq!(f.handler.state(&"b".into()), SyncState::Unsynced);
    }

    #[tokio::test]
    async fn test_overlapping_events_stay_syncing_until_all_finish() {
        let read_model = Arc::new(Gated {
            inner: InMemoryReadModelStore::new(),
            held: AtomicBool::new(false),
            release: Notify::new(),
        });
        let sync = SyncService::<Record>::new(read_model.clone(), Arc::new(SyncMetrics::default()));
        let handler =
            EventDrivenSyncHandler::<Record>::new(Arc::new(InMemoryAuthoritativeStore::<Record>::new()), sync);
        let id: EntityId = "a".into();

        let slow = handler.handle(EntityEvent::modified(Record::new("a".into(), json!({"n": 1}))));
        let fast = async {
            let state = handler
                .handle(EntityEvent::modified(Record::new("a".into(), json!({"n": 2}))))
                .await;
            let observed = handler.state(&id);
            read_model.release.notify_one();
            (state, observed)
        };
        let (slow_state, (fast_state, observed)) = tokio::join!(slow, fast);

        assert_eq!(fast_state, SyncState::Synced);
        assert_eq!(observed, SyncState::Syncing);
        assert_eq!(slow_state, SyncState::Synced);
        assert_eq!(handler.state(&id), SyncState::Synced);
    }

    #[tokio::test]
    async fn test_run_drains_until_closed() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(8);

        for n in 0..3 {
            tx.send(EntityEvent::modified(Record::new(format!("e{n}").into(), json!({"n": n}))))
                .await
                .unwrap();
        }
        drop(tx);

        let handled = f.handler.run(rx, CancellationToken::new()).await;

        assert_eq!(handled, 3);
        assert_eq!(f.read_model.len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel::<EntityEvent<Record>>(8);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(f.handler.run(rx, shutdown).await, 0);
    }
}
