//! Read-model synchronization: the sync service, its health metrics and the
//! event-driven handler that feeds it.

pub mod handler;
pub mod service;
pub mod status;

pub use handler::{EventDrivenSyncHandler, SyncState};
pub use service::{SyncOutcome, SyncService};
pub use status::{HealthPolicy, SyncMetrics, SyncStatus};
