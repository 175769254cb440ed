//! Provider sync engines.
//!
//! Two engines share one contract: [`SyncEngine::initial_sync`] for the
//! first full download and [`SyncEngine::delta_sync`] for incremental
//! catch-up from a stored cursor. [`folders`] implements the stateful
//! folder/UID protocol; [`history`] implements the history-cursor REST API.

pub mod folders;
pub mod history;
pub mod threading;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AccountId;
use crate::providers::ProviderError;
use crate::storage::DatabaseError;

/// Errors from a sync engine run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Phase of a long-running sync, reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Discovering folders.
    Folders,
    /// Fetching message bodies.
    Messages,
    /// Grouping messages into conversations.
    Threading,
    /// Writing final conversation rows.
    Storing,
    /// Sync complete.
    Done,
}

/// A progress snapshot emitted during long initial syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current phase.
    pub phase: SyncPhase,
    /// Units completed within the phase.
    pub current: usize,
    /// Total units in the phase, when known.
    pub total: usize,
}

/// Callback receiving progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Result of a completed engine run.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Number of messages newly ingested into the cache.
    pub ingested: usize,
    /// Cursor to store on the account for the next delta sync.
    pub cursor: Option<String>,
}

/// Shared contract of the two provider sync engines.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Runs a full time-windowed download for an account that has no usable
    /// cursor.
    async fn initial_sync(
        &self,
        account_id: &AccountId,
        lookback_days: u32,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome>;

    /// Fetches only changes since the stored cursor.
    async fn delta_sync(&self, account_id: &AccountId, cursor: &str) -> Result<SyncOutcome>;
}

pub(crate) fn report(progress: &Option<ProgressCallback>, phase: SyncPhase, current: usize, total: usize) {
    if let Some(cb) = progress {
        cb(SyncProgress {
            phase,
            current,
            total,
        });
    }
}
