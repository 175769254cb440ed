//! keel - local-first synchronization core for a multi-account email client.
//!
//! Reconciles a device-local SQLite cache against remote mailbox providers
//! (a history-cursor REST API and a stateful folder/UID protocol), queues
//! user actions while offline, and replays them once connectivity returns.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
pub mod sync;

pub use services::{OperationQueue, SyncService};
pub use storage::Database;
