//! Business services layer.
//!
//! # Architecture
//!
//! Services sit between the host application and the infrastructure layer:
//!
//! ```text
//! Host application (UI, actions, connectivity monitor)
//!          |
//!          v
//!    Services layer  <-- You are here
//!          |
//!          v
//! Infrastructure (provider clients, storage)
//! ```
//!
//! - [`SyncService`]: orchestrates sync across accounts and reports status
//! - [`OperationQueue`]: durable offline queue with compaction and backoff
//! - [`BackgroundTask`]: repeating-timer abstraction behind every periodic job
//! - [`categorizer`]: deterministic classification run during ingestion

pub mod categorizer;
pub mod queue;
pub mod scheduler;
pub mod sync_service;

pub use queue::{DrainStats, OperationQueue, QueueEvent};
pub use scheduler::BackgroundTask;
pub use sync_service::{
    register_account, AccountSyncStatus, ProviderHandle, SyncEvent, SyncService,
};
