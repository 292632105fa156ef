//! Periodic cache warming from the authoritative store.
//!
//! Pages through the authoritative store and refreshes every entity in the cache
//! with the configured TTL. It only ever writes to the cache; the read model is
//! left to the sync handler.
//!
//! A warm pass races concurrent deletes. An entity read from a page just before
//! a delete clears the cache can be written back after it, and then serves
//! from the cache until its TTL runs out. Authoritative-hit promotion in
//! [`CompositeRepository::get`](crate::CompositeRepository::get) has the same
//! window. Keep the cache TTL short where that matters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::storage::traits::{AuthoritativeStore, CacheStore, Page, StorageError};

/// Counts from one warm pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    pub failed: usize,
}

pub struct CacheWarmer<E: Entity> {
    authoritative: Arc<dyn AuthoritativeStore<E>>,
    cache: Arc<dyn CacheStore<E>>,
    ttl: Duration,
    batch_size: usize,
}

impl<E: Entity> CacheWarmer<E> {
    pub fn new(
        authoritative: Arc<dyn AuthoritativeStore<E>>,
        cache: Arc<dyn CacheStore<E>>,
        ttl: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            authoritative,
            cache,
            ttl,
            batch_size: batch_size.max(1),
        }
    }

    /// Warm every entity once.
    ///
    /// A failed cache write is counted and skipped. A failed page read ends the
    /// pass early with that error.
    pub async fn warm_once(&self, shutdown: &CancellationToken) -> Result<WarmReport, StorageError> {
        let start = Instant::now();
        let mut report = WarmReport::default();
        let mut page = Page::first(self.batch_size);

        loop {
            if shutdown.is_cancelled() {
                debug!("Cache warm pass interrupted by shutdown");
                break;
            }

            let batch = self.authoritative.browse(page).await?;
            for entity in &batch {
                match self.cache.set(entity, self.ttl).await {
                    Ok(()) => report.warmed += 1,
                    Err(e) => {
                        warn!(entity_id = %entity.id(), error = %e, "Cache warm write failed");
                        report.failed += 1;
                    }
                }
            }

            if batch.len() < self.batch_size {
                break;
            }
            page = page.next();
        }

        crate::metrics::record_cache_warm(report.warmed, report.failed, start.elapsed());
        Ok(report)
    }

    /// Warm on every tick until `shutdown` fires.
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        info!(interval_ms = every.as_millis() as u64, batch_size = self.batch_size, "Starting cache warmer");

        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.warm_once(&shutdown).await {
                        Ok(report) => debug!(warmed = report.warmed, failed = report.failed, "Cache warm pass completed"),
                        Err(e) => warn!(error = %e, "Cache warm pass failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping cache warmer");
                    break;
                }
            }
        }
    }
}
