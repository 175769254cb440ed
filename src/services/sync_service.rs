//! Sync orchestration across accounts.
//!
//! [`SyncService`] owns all shared sync state (the provider registry, the
//! in-flight flag and the pending-account queue) as instance fields, so
//! tests construct independent orchestrators. Per account it resolves the
//! provider kind, picks initial vs delta mode, reports status transitions
//! (`idle → syncing → done/error`) over a broadcast channel, and never lets
//! one account's failure abort another's sync.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};

use super::scheduler::BackgroundTask;
use crate::config::SyncSettings;
use crate::domain::{Account, AccountId, ProviderKind};
use crate::providers::{FolderClient, HistoryClient, ProviderError};
use crate::storage::queries::{accounts, folder_sync, messages, settings, threads};
use crate::storage::Database;
use crate::sync::folders::FolderSyncEngine;
use crate::sync::history::HistorySyncEngine;
use crate::sync::{
    ProgressCallback, SyncEngine, SyncError, SyncOutcome, SyncProgress,
};

/// The provider client registered for an account.
#[derive(Clone)]
pub enum ProviderHandle {
    /// History-cursor REST API client.
    History(Arc<dyn HistoryClient>),
    /// Folder/UID protocol client.
    Folder(Arc<dyn FolderClient>),
    /// Calendar-only account; no email client.
    CalendarOnly,
}

/// Externally visible sync state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSyncStatus {
    /// No sync has been requested yet.
    Idle,
    /// A sync pass is running for this account.
    Syncing,
    /// The last sync completed.
    Done,
    /// The last sync failed.
    Error,
}

/// Event reported to the UI bridge.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Sync started for an account.
    Started(AccountId),
    /// Progress snapshot during a long sync.
    Progress {
        /// Account being synced.
        account_id: AccountId,
        /// Phase and counters.
        progress: SyncProgress,
    },
    /// Sync completed for an account.
    Completed {
        /// Account that finished.
        account_id: AccountId,
        /// Messages newly ingested.
        ingested: usize,
    },
    /// Sync failed for an account.
    Failed {
        /// Account that failed.
        account_id: AccountId,
        /// Human-readable error.
        error: String,
    },
    /// A sync pass finished; cached data may have changed.
    DataChanged,
}

#[derive(Default)]
struct PassState {
    in_flight: bool,
    pending: Vec<AccountId>,
}

/// Top-level sync orchestrator, constructed once per process.
pub struct SyncService {
    db: Database,
    settings: SyncSettings,
    clients: RwLock<HashMap<AccountId, ProviderHandle>>,
    state: Mutex<PassState>,
    status: RwLock<HashMap<AccountId, AccountSyncStatus>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncService {
    /// Creates a new orchestrator over the given store.
    pub fn new(db: Database, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            db,
            settings,
            clients: RwLock::new(HashMap::new()),
            state: Mutex::new(PassState::default()),
            status: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Registers the provider client for an account.
    pub async fn register_provider(&self, account_id: AccountId, handle: ProviderHandle) {
        self.clients.write().await.insert(account_id.clone(), handle);
        self.status
            .write()
            .await
            .insert(account_id, AccountSyncStatus::Idle);
    }

    /// Removes an account's provider registration.
    pub async fn unregister_provider(&self, account_id: &AccountId) {
        self.clients.write().await.remove(account_id);
        self.status.write().await.remove(account_id);
    }

    /// Subscribes to sync status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns the sync status of one account.
    pub async fn status(&self, account_id: &AccountId) -> AccountSyncStatus {
        self.status
            .read()
            .await
            .get(account_id)
            .copied()
            .unwrap_or(AccountSyncStatus::Idle)
    }

    /// Requests a sync for the given accounts.
    ///
    /// If a pass is already in flight, the ids are merged into the pending
    /// queue instead of starting a second concurrent pass; the queued ids
    /// run as a new pass as soon as the current one finishes.
    pub async fn request_sync(&self, account_ids: Vec<AccountId>) {
        {
            let mut state = self.state.lock().await;
            if state.in_flight {
                for id in account_ids {
                    if !state.pending.contains(&id) {
                        state.pending.push(id);
                    }
                }
                return;
            }
            state.in_flight = true;
        }

        let mut batch = account_ids;
        loop {
            for account_id in &batch {
                self.sync_one(account_id).await;
            }
            let _ = self.events.send(SyncEvent::DataChanged);

            let mut state = self.state.lock().await;
            if state.pending.is_empty() {
                state.in_flight = false;
                break;
            }
            batch = std::mem::take(&mut state.pending);
        }
    }

    /// Requests a sync for a single account.
    pub async fn sync_account(&self, account_id: AccountId) {
        self.request_sync(vec![account_id]).await;
    }

    /// Clears stored cursors and re-downloads the given accounts from
    /// scratch.
    pub async fn force_full_resync(&self, account_ids: Vec<AccountId>) {
        for account_id in &account_ids {
            if let Err(e) = accounts::clear_sync_cursor(&self.db, account_id).await {
                tracing::error!(account_id = %account_id, error = %e, "failed to clear cursor");
            }
        }
        self.request_sync(account_ids).await;
    }

    /// Deletes all cached data for one account and syncs it from scratch.
    pub async fn resync_account(&self, account_id: AccountId) {
        let reset = async {
            messages::delete_all_for_account(&self.db, &account_id).await?;
            threads::delete_all_for_account(&self.db, &account_id).await?;
            accounts::clear_sync_cursor(&self.db, &account_id).await?;
            folder_sync::clear_all(&self.db, &account_id).await?;
            Ok::<_, crate::storage::DatabaseError>(())
        };
        if let Err(e) = reset.await {
            tracing::error!(account_id = %account_id, error = %e, "failed to reset account data");
            return;
        }
        self.request_sync(vec![account_id]).await;
    }

    /// Starts the periodic sync timer for all sync-enabled accounts.
    ///
    /// With `skip_immediate` the first tick is deferred by one interval,
    /// for callers that already triggered a sync for a newly added account.
    pub fn start_background(self: &Arc<Self>, skip_immediate: bool) -> BackgroundTask {
        let service = Arc::clone(self);
        let first = Arc::new(AtomicBool::new(skip_immediate));

        let task = BackgroundTask::new(
            "periodic-sync",
            self.settings.sync_interval,
            move || {
                let service = service.clone();
                let first = first.clone();
                async move {
                    if first.swap(false, Ordering::SeqCst) {
                        return Ok(());
                    }
                    let active = accounts::list_sync_enabled(&service.db).await?;
                    service
                        .request_sync(active.into_iter().map(|account| account.id).collect())
                        .await;
                    Ok(())
                }
            },
        );
        task.start();
        task
    }

    async fn set_status(&self, account_id: &AccountId, status: AccountSyncStatus) {
        self.status
            .write()
            .await
            .insert(account_id.clone(), status);
    }

    /// Syncs one account, reporting the outcome instead of propagating it.
    async fn sync_one(&self, account_id: &AccountId) {
        self.set_status(account_id, AccountSyncStatus::Syncing).await;
        let _ = self.events.send(SyncEvent::Started(account_id.clone()));

        match self.dispatch(account_id).await {
            Ok(outcome) => {
                if let Some(cursor) = &outcome.cursor {
                    if let Err(e) =
                        accounts::set_sync_cursor(&self.db, account_id, Some(cursor.clone())).await
                    {
                        tracing::error!(account_id = %account_id, error = %e, "failed to store cursor");
                    }
                }
                self.set_status(account_id, AccountSyncStatus::Done).await;
                let _ = self.events.send(SyncEvent::Completed {
                    account_id: account_id.clone(),
                    ingested: outcome.ingested,
                });
            }
            Err(e) => {
                tracing::error!(account_id = %account_id, error = %e, "sync failed");
                self.set_status(account_id, AccountSyncStatus::Error).await;
                let _ = self.events.send(SyncEvent::Failed {
                    account_id: account_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Resolves the account's provider kind and runs the matching engine in
    /// the right mode.
    async fn dispatch(&self, account_id: &AccountId) -> crate::sync::Result<SyncOutcome> {
        let account = accounts::get(&self.db, account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;

        if !account.sync_enabled {
            return Ok(SyncOutcome {
                ingested: 0,
                cursor: None,
            });
        }

        if account.provider_kind == ProviderKind::CalendarOnly {
            // Calendar-only accounts have no mailbox to sync.
            return Ok(SyncOutcome {
                ingested: 0,
                cursor: None,
            });
        }

        let handle = self.clients.read().await.get(account_id).cloned();
        let lookback =
            settings::sync_period_days(&self.db, self.settings.sync_period_days).await?;
        let progress = self.progress_callback(account_id);

        match (account.provider_kind, handle) {
            (ProviderKind::HistoryApi, Some(ProviderHandle::History(client))) => {
                let engine = HistorySyncEngine::new(self.db.clone(), client, lookback);
                match &account.sync_cursor {
                    Some(cursor) => engine.delta_sync(account_id, cursor).await,
                    None => engine.initial_sync(account_id, lookback, Some(progress)).await,
                }
            }
            (ProviderKind::FolderProtocol, Some(ProviderHandle::Folder(client))) => {
                let engine = FolderSyncEngine::new(self.db.clone(), client, lookback);
                match &account.sync_cursor {
                    Some(cursor) => {
                        let outcome = engine.delta_sync(account_id, cursor).await?;
                        self.heal_degenerate_state(account_id, &engine, outcome, lookback, progress)
                            .await
                    }
                    None => engine.initial_sync(account_id, lookback, Some(progress)).await,
                }
            }
            (_, None) => Err(SyncError::Provider(ProviderError::InvalidRequest(
                format!("no provider client registered for account {account_id}"),
            ))),
            (kind, Some(_)) => Err(SyncError::Provider(ProviderError::InvalidRequest(
                format!("registered client does not match provider kind {kind:?}"),
            ))),
        }
    }

    /// Detects a silently failed prior sync and recovers.
    ///
    /// A delta sync that finds nothing new while the cache holds zero
    /// threads means the stored cursors lie; clear them and re-run the
    /// initial sync.
    async fn heal_degenerate_state(
        &self,
        account_id: &AccountId,
        engine: &FolderSyncEngine,
        outcome: SyncOutcome,
        lookback: u32,
        progress: ProgressCallback,
    ) -> crate::sync::Result<SyncOutcome> {
        if outcome.ingested > 0 {
            return Ok(outcome);
        }
        if threads::count_by_account(&self.db, account_id).await? > 0 {
            return Ok(outcome);
        }

        tracing::warn!(
            account_id = %account_id,
            "delta sync found nothing and cache has no threads, forcing full re-sync"
        );
        accounts::clear_sync_cursor(&self.db, account_id).await?;
        folder_sync::clear_all(&self.db, account_id).await?;

        engine
            .initial_sync(account_id, lookback, Some(progress))
            .await
    }

    fn progress_callback(&self, account_id: &AccountId) -> ProgressCallback {
        let events = self.events.clone();
        let account_id = account_id.clone();
        Arc::new(move |progress| {
            let _ = events.send(SyncEvent::Progress {
                account_id: account_id.clone(),
                progress,
            });
        })
    }
}

/// Registers an account row and its provider client in one step.
///
/// Convenience for onboarding; the account row and the client registration
/// normally happen far apart.
pub async fn register_account(
    service: &SyncService,
    account: &Account,
    handle: ProviderHandle,
) -> crate::storage::database::Result<()> {
    accounts::upsert(&service.db, account).await?;
    service
        .register_provider(account.id.clone(), handle)
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Account;
    use crate::providers::{HistoryDelta, HistoryMessage, MailboxActions};
    use async_trait::async_trait;
    use chrono::Utc;

    /// History client returning a fixed set of recent messages.
    struct FixedHistoryClient {
        recent: Vec<HistoryMessage>,
    }

    #[async_trait]
    impl MailboxActions for FixedHistoryClient {
        async fn apply_label(&self, _: &str, _: &str) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn remove_label(&self, _: &str, _: &str) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn mark_read(&self, _: &str, _: bool) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn star(&self, _: &str, _: bool) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn archive(&self, _: &str) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn trash(&self, _: &str) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn move_to_folder(&self, _: &str, _: &str) -> crate::providers::Result<()> {
            Ok(())
        }
        async fn send_message(&self, _: &[u8]) -> crate::providers::Result<String> {
            Ok("id".to_string())
        }
    }

    #[async_trait]
    impl HistoryClient for FixedHistoryClient {
        async fn current_cursor(&self) -> crate::providers::Result<String> {
            Ok("cursor-1".to_string())
        }

        async fn list_recent(&self, _: u32) -> crate::providers::Result<Vec<HistoryMessage>> {
            Ok(self.recent.clone())
        }

        async fn list_history(&self, _: &str) -> crate::providers::Result<HistoryDelta> {
            Ok(HistoryDelta {
                added: vec![],
                updated: vec![],
                deleted: vec![],
                new_cursor: "cursor-2".to_string(),
            })
        }
    }

    fn history_message(id: &str) -> HistoryMessage {
        HistoryMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            from: crate::domain::Address::new("sender@example.com"),
            to: vec![],
            subject: Some("Hello".to_string()),
            body_text: Some("Body".to_string()),
            snippet: None,
            date: Utc::now(),
            labels: vec!["INBOX".to_string()],
            is_read: false,
            is_starred: false,
            list_unsubscribe: None,
        }
    }

    async fn setup(account: Account, handle: ProviderHandle) -> Arc<SyncService> {
        let db = Database::open_in_memory().await.unwrap();
        let service = Arc::new(SyncService::new(db, SyncSettings::default()));
        register_account(&service, &account, handle).await.unwrap();
        service
    }

    #[tokio::test]
    async fn initial_sync_stores_cursor_and_reports_done() {
        let account = Account::new("acct-1", "a@example.com", ProviderKind::HistoryApi);
        let client = Arc::new(FixedHistoryClient {
            recent: vec![history_message("m1"), history_message("m2")],
        });
        let service = setup(account.clone(), ProviderHandle::History(client)).await;

        let mut events = service.subscribe();
        service.sync_account(account.id.clone()).await;

        assert_eq!(
            service.status(&account.id).await,
            AccountSyncStatus::Done
        );

        let stored = accounts::get(&service.db, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_cursor, Some("cursor-1".to_string()));

        let mut saw_started = false;
        let mut saw_completed = false;
        let mut saw_data_changed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::Started(id) => saw_started = id == account.id,
                SyncEvent::Completed { ingested, .. } => {
                    saw_completed = true;
                    assert_eq!(ingested, 2);
                }
                SyncEvent::DataChanged => saw_data_changed = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_completed && saw_data_changed);
    }

    #[tokio::test]
    async fn missing_client_reports_error_status() {
        let account = Account::new("acct-1", "a@example.com", ProviderKind::HistoryApi);
        let db = Database::open_in_memory().await.unwrap();
        let service = Arc::new(SyncService::new(db, SyncSettings::default()));
        accounts::upsert(&service.db, &account).await.unwrap();

        service.sync_account(account.id.clone()).await;
        assert_eq!(
            service.status(&account.id).await,
            AccountSyncStatus::Error
        );
    }

    #[tokio::test]
    async fn calendar_only_accounts_skip_email_sync() {
        let account = Account::new("acct-cal", "c@example.com", ProviderKind::CalendarOnly);
        let service = setup(account.clone(), ProviderHandle::CalendarOnly).await;

        service.sync_account(account.id.clone()).await;

        assert_eq!(service.status(&account.id).await, AccountSyncStatus::Done);
        let stored = accounts::get(&service.db, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.sync_cursor.is_none(), "no email cursor for calendar accounts");
    }

    #[tokio::test]
    async fn one_account_failure_does_not_abort_others() {
        let db = Database::open_in_memory().await.unwrap();
        let service = Arc::new(SyncService::new(db, SyncSettings::default()));

        let broken = Account::new("acct-broken", "b@example.com", ProviderKind::HistoryApi);
        accounts::upsert(&service.db, &broken).await.unwrap();

        let healthy = Account::new("acct-ok", "ok@example.com", ProviderKind::HistoryApi);
        let client = Arc::new(FixedHistoryClient {
            recent: vec![history_message("m1")],
        });
        register_account(&service, &healthy, ProviderHandle::History(client))
            .await
            .unwrap();

        service
            .request_sync(vec![broken.id.clone(), healthy.id.clone()])
            .await;

        assert_eq!(service.status(&broken.id).await, AccountSyncStatus::Error);
        assert_eq!(service.status(&healthy.id).await, AccountSyncStatus::Done);
    }

    #[tokio::test]
    async fn concurrent_request_queues_instead_of_running_twice() {
        let account = Account::new("acct-1", "a@example.com", ProviderKind::HistoryApi);
        let client = Arc::new(FixedHistoryClient {
            recent: vec![history_message("m1")],
        });
        let service = setup(account.clone(), ProviderHandle::History(client)).await;

        // Hold the in-flight flag, then request a sync: it must queue.
        {
            let mut state = service.state.lock().await;
            state.in_flight = true;
        }
        service.sync_account(account.id.clone()).await;
        {
            let state = service.state.lock().await;
            assert_eq!(state.pending, vec![account.id.clone()]);
        }

        // Duplicate requests collapse.
        service.sync_account(account.id.clone()).await;
        {
            let mut state = service.state.lock().await;
            assert_eq!(state.pending.len(), 1);
            state.in_flight = false;
            state.pending.clear();
        }
    }

    #[tokio::test]
    async fn force_full_resync_clears_cursor_first() {
        let mut account = Account::new("acct-1", "a@example.com", ProviderKind::HistoryApi);
        account.sync_cursor = Some("stale".to_string());
        let client = Arc::new(FixedHistoryClient {
            recent: vec![history_message("m1")],
        });
        let service = setup(account.clone(), ProviderHandle::History(client)).await;

        service.force_full_resync(vec![account.id.clone()]).await;

        // The cursor comes from the initial sync, not the delta path.
        let stored = accounts::get(&service.db, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_cursor, Some("cursor-1".to_string()));
    }
}
