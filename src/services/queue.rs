//! Offline operation queue.
//!
//! User actions enqueue instantly and never block on the network; a
//! 30-second drain cycle replays them against the provider once
//! connectivity allows, guaranteeing at-least-once delivery of each intent.
//! Compaction runs before every drain so redundant or self-cancelling edits
//! are never sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};

use super::scheduler::BackgroundTask;
use crate::domain::{AccountId, OperationKind, OperationStatus, PendingOperation};
use crate::providers::{classify, MailboxActions, ProviderError};
use crate::storage::database::Result;
use crate::storage::queries::operations;
use crate::storage::Database;

/// Operations processed per drain cycle.
const DRAIN_BATCH_SIZE: u32 = 50;

/// Interval between drain cycles.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Event emitted after queue activity.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A drain cycle executed at least one operation; views should refresh.
    Drained {
        /// Operations delivered to the provider.
        executed: usize,
        /// Operations that failed terminally this cycle.
        failed: usize,
    },
}

/// Statistics from one drain cycle.
#[derive(Debug, Clone, Default)]
pub struct DrainStats {
    /// True when the cycle was skipped because the device is offline.
    pub skipped_offline: bool,
    /// Operations removed by compaction.
    pub compacted: usize,
    /// Operations delivered and removed.
    pub executed: usize,
    /// Operations marked terminally failed.
    pub failed: usize,
    /// Operations rescheduled with backoff.
    pub rescheduled: usize,
}

/// Durable queue of user actions pending remote execution.
pub struct OperationQueue {
    db: Database,
    executors: RwLock<HashMap<AccountId, Arc<dyn MailboxActions>>>,
    online: AtomicBool,
    default_max_retries: u32,
    drain_interval: Duration,
    events: broadcast::Sender<QueueEvent>,
}

impl OperationQueue {
    /// Creates a queue over the given store.
    pub fn new(db: Database, default_max_retries: u32) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            executors: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            default_max_retries,
            drain_interval: DRAIN_INTERVAL,
            events,
        }
    }

    /// Overrides the drain interval (tests).
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Registers the provider client that executes an account's operations.
    pub async fn register_executor(
        &self,
        account_id: AccountId,
        client: Arc<dyn MailboxActions>,
    ) {
        self.executors.write().await.insert(account_id, client);
    }

    /// Removes an account's executor.
    pub async fn unregister_executor(&self, account_id: &AccountId) {
        self.executors.write().await.remove(account_id);
    }

    /// Updates the connectivity flag; drains are skipped while offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns the current connectivity flag.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Subscribes to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Appends a user action to the queue. Returns immediately; the drain
    /// cycle delivers it later.
    pub async fn enqueue(
        &self,
        account_id: &AccountId,
        resource_id: &str,
        kind: OperationKind,
    ) -> Result<String> {
        operations::enqueue(
            &self.db,
            account_id,
            resource_id,
            kind,
            self.default_max_retries,
        )
        .await
    }

    /// Runs one drain cycle.
    ///
    /// Skipped entirely while offline. Otherwise: compact, fetch up to 50
    /// due operations in creation order, and execute each one. Success
    /// deletes the row, retryable errors reschedule with backoff, anything
    /// else fails terminally.
    pub async fn drain(&self) -> Result<DrainStats> {
        if !self.is_online() {
            return Ok(DrainStats {
                skipped_offline: true,
                ..DrainStats::default()
            });
        }

        let mut stats = DrainStats {
            compacted: operations::compact(&self.db, None).await?,
            ..DrainStats::default()
        };

        let due = operations::due_pending(&self.db, DRAIN_BATCH_SIZE).await?;

        for op in due {
            operations::set_status(&self.db, &op.id, OperationStatus::Executing, None).await?;

            let client = self.executors.read().await.get(&op.account_id).cloned();
            let result = match client {
                Some(client) => execute_operation(client.as_ref(), &op).await,
                None => Err(ProviderError::InvalidRequest(format!(
                    "no executor registered for account {}",
                    op.account_id
                ))),
            };

            match result {
                Ok(()) => {
                    operations::delete(&self.db, &op.id).await?;
                    stats.executed += 1;
                }
                Err(e) => {
                    let class = classify(&e);
                    if class.is_retryable() {
                        operations::set_status(
                            &self.db,
                            &op.id,
                            OperationStatus::Pending,
                            Some(e.to_string()),
                        )
                        .await?;
                        operations::increment_retry(&self.db, &op.id).await?;
                        stats.rescheduled += 1;
                    } else {
                        tracing::warn!(
                            operation = %op.id,
                            kind = op.kind.type_name(),
                            error = %e,
                            "operation failed permanently"
                        );
                        operations::set_status(
                            &self.db,
                            &op.id,
                            OperationStatus::Failed,
                            Some(e.to_string()),
                        )
                        .await?;
                        stats.failed += 1;
                    }
                }
            }
        }

        if stats.executed > 0 || stats.failed > 0 {
            let _ = self.events.send(QueueEvent::Drained {
                executed: stats.executed,
                failed: stats.failed,
            });
        }

        Ok(stats)
    }

    /// Triggers an immediate drain, e.g. when connectivity returns.
    pub async fn flush(&self) {
        if let Err(e) = self.drain().await {
            tracing::error!(error = %e, "queue flush failed");
        }
    }

    /// Starts the periodic drain task.
    pub fn start(self: &Arc<Self>) -> BackgroundTask {
        let queue = Arc::clone(self);
        let task = BackgroundTask::new("queue-drain", self.drain_interval, move || {
            let queue = queue.clone();
            async move {
                queue.drain().await?;
                Ok(())
            }
        });
        task.start();
        task
    }

    /// Counts operations waiting to run, optionally for one account.
    pub async fn pending_count(&self, account_id: Option<&AccountId>) -> Result<u32> {
        operations::pending_count(&self.db, account_id).await
    }

    /// Counts terminally failed operations, optionally for one account.
    pub async fn failed_count(&self, account_id: Option<&AccountId>) -> Result<u32> {
        operations::failed_count(&self.db, account_id).await
    }

    /// Returns failed operations to the pending state for another attempt.
    pub async fn retry_failed(&self, account_id: Option<&AccountId>) -> Result<()> {
        operations::retry_failed(&self.db, account_id).await
    }

    /// Discards failed operations.
    pub async fn clear_failed(&self, account_id: Option<&AccountId>) -> Result<()> {
        operations::clear_failed(&self.db, account_id).await
    }
}

/// Dispatches one operation to the provider's primitive API.
async fn execute_operation(
    client: &dyn MailboxActions,
    op: &PendingOperation,
) -> std::result::Result<(), ProviderError> {
    match &op.kind {
        OperationKind::Star { starred } => client.star(&op.resource_id, *starred).await,
        OperationKind::MarkRead { read } => client.mark_read(&op.resource_id, *read).await,
        OperationKind::AddLabel { label } => client.apply_label(&op.resource_id, label).await,
        OperationKind::RemoveLabel { label } => client.remove_label(&op.resource_id, label).await,
        OperationKind::MoveToFolder { folder } => {
            client.move_to_folder(&op.resource_id, folder).await
        }
        OperationKind::Archive => client.archive(&op.resource_id).await,
        OperationKind::Trash => client.trash(&op.resource_id).await,
        OperationKind::Send { raw } => client.send_message(raw.as_bytes()).await.map(|_| ()),
    }
}
