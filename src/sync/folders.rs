//! Sync engine for the stateful folder/UID protocol.
//!
//! Initial sync walks the account folder-by-folder: a lightweight UID search
//! bounded by a since-date, then chunked body fetches written inside one
//! transaction per chunk. Every message is stored behind a placeholder
//! thread (thread id = message id) so the thread foreign key holds; a final
//! threading pass groups conversations and repoints the messages. Delta sync
//! asks each folder for UIDs above its stored cursor and treats a
//! UIDVALIDITY change as never-synced.
//!
//! A per-run circuit breaker counts consecutive connection-class failures
//! across folders and abandons the run at five, so a dead network path fails
//! fast instead of timing out once per folder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use super::{report, ProgressCallback, Result, SyncEngine, SyncOutcome, SyncPhase};
use crate::domain::{
    folder_message_id, labels_for_flags, snippet_or_fallback, AccountId, FolderSyncState, Message,
    Thread, ThreadId,
};
use crate::providers::{is_connection_error, FolderClient, RemoteFolder, RemoteMessage};
use crate::services::categorizer::categorize;
use crate::storage::queries::{categories, folder_sync, messages, threads};
use crate::storage::Database;

/// Maximum identifiers per body fetch, bounded by the remote's
/// parameter-count limits.
pub const FETCH_CHUNK_SIZE: usize = 500;

/// Consecutive connection failures after which remaining folders are skipped.
pub const CIRCUIT_BREAKER_MAX_FAILURES: u32 = 5;

/// Sync engine for folder-protocol accounts.
pub struct FolderSyncEngine {
    db: Database,
    client: Arc<dyn FolderClient>,
    default_lookback_days: u32,
}

impl FolderSyncEngine {
    /// Creates an engine for one account's client.
    pub fn new(db: Database, client: Arc<dyn FolderClient>, default_lookback_days: u32) -> Self {
        Self {
            db,
            client,
            default_lookback_days,
        }
    }

    /// Fetches one folder's window of messages and stores them in chunks.
    ///
    /// Returns the number of messages ingested.
    async fn sync_folder_window(
        &self,
        account_id: &AccountId,
        folder: &str,
        since: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let search = self.client.search_ids(folder, since).await?;
        self.ingest_uid_chunks(account_id, folder, &search.uids, search.uid_validity, cutoff)
            .await
    }

    /// Fetches UIDs newer than the stored cursor for one folder.
    async fn sync_folder_delta(
        &self,
        account_id: &AccountId,
        folder: &str,
        state: &FolderSyncState,
        since: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let search = self.client.search_ids_above(folder, state.last_uid).await?;

        if !state.is_valid_for(search.uid_validity) {
            tracing::info!(
                account_id = %account_id,
                folder,
                stored = state.uid_validity,
                current = search.uid_validity,
                "UIDVALIDITY changed, re-scanning folder"
            );
            return self.sync_folder_window(account_id, folder, since, cutoff).await;
        }

        let new_uids: Vec<u32> = search
            .uids
            .iter()
            .copied()
            .filter(|uid| *uid > state.last_uid)
            .collect();

        self.ingest_uid_chunks(account_id, folder, &new_uids, search.uid_validity, cutoff)
            .await
    }

    /// Fetches and stores message bodies in bounded chunks.
    ///
    /// Each chunk commits in one transaction: placeholder thread rows first,
    /// then the messages, then the advanced folder cursor. A failed chunk
    /// therefore never corrupts the chunks committed before it.
    async fn ingest_uid_chunks(
        &self,
        account_id: &AccountId,
        folder: &str,
        uids: &[u32],
        uid_validity: u32,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let mut ingested = 0;

        for chunk in uids.chunks(FETCH_CHUNK_SIZE) {
            let remote = match self.client.fetch_by_ids(folder, chunk).await {
                Ok(remote) => remote,
                Err(e) if is_connection_error(&e) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        account_id = %account_id,
                        folder,
                        error = %e,
                        "chunk fetch failed, continuing with next chunk"
                    );
                    continue;
                }
            };

            let max_uid = chunk.iter().copied().max().unwrap_or(0);
            let batch: Vec<Message> = remote
                .into_iter()
                .filter(|msg| msg.date >= cutoff)
                .map(|msg| to_message(account_id, folder, msg))
                .collect();
            ingested += batch.len();

            let account_id = account_id.clone();
            let state = FolderSyncState::new(account_id.clone(), folder, max_uid, uid_validity);
            self.db
                .transaction(move |tx| {
                    for message in &batch {
                        threads::upsert_in(tx, &Thread::placeholder(message))?;
                        messages::upsert_in(tx, message)?;
                    }
                    folder_sync::upsert_in(tx, &state)?;
                    Ok(())
                })
                .await?;
        }

        Ok(ingested)
    }

    /// Runs the threading pass: groups every cached message of the account
    /// into conversations, writes the final thread rows, repoints messages
    /// away from their placeholders and categorizes each conversation.
    async fn rebuild_threads(
        &self,
        account_id: &AccountId,
        progress: &Option<ProgressCallback>,
    ) -> Result<usize> {
        report(progress, SyncPhase::Threading, 0, 0);

        let all_messages = messages::get_all_for_account(&self.db, account_id).await?;
        if all_messages.is_empty() {
            return Ok(0);
        }

        let groups = super::threading::group_messages(&all_messages);
        let total = groups.len();
        report(progress, SyncPhase::Storing, 0, total);

        let account_id = account_id.clone();
        self.db
            .transaction(move |tx| {
                for group in &groups {
                    threads::upsert_in(tx, &group.thread)?;
                    messages::set_thread_ids_in(
                        tx,
                        &account_id,
                        &group.message_ids,
                        &group.thread.id,
                    )?;

                    let category = categorize(
                        &group.latest_labels,
                        Some(&group.latest_from.email),
                        group.latest_list_unsubscribe.as_deref(),
                    );
                    categories::set_from_rules_in(tx, &account_id, &group.thread.id, category)?;
                }
                threads::delete_orphans_in(tx, &account_id)?;
                Ok(())
            })
            .await?;

        Ok(total)
    }

}

#[async_trait]
impl SyncEngine for FolderSyncEngine {
    async fn initial_sync(
        &self,
        account_id: &AccountId,
        lookback_days: u32,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome> {
        report(&progress, SyncPhase::Folders, 0, 0);

        let folders: Vec<RemoteFolder> = self
            .client
            .list_folders()
            .await?
            .into_iter()
            .filter(RemoteFolder::is_syncable)
            .collect();

        let since = compute_since_date(lookback_days, Utc::now());
        let cutoff = Utc::now() - Duration::days(i64::from(lookback_days) + 1);

        let mut consecutive_failures = 0u32;
        let mut ingested = 0;

        for (idx, folder) in folders.iter().enumerate() {
            if consecutive_failures >= CIRCUIT_BREAKER_MAX_FAILURES {
                tracing::warn!(
                    account_id = %account_id,
                    skipped = folders.len() - idx,
                    "circuit breaker tripped, abandoning remaining folders"
                );
                break;
            }

            report(&progress, SyncPhase::Messages, idx, folders.len());

            if folder.exists == 0 {
                continue;
            }

            match self
                .sync_folder_window(account_id, &folder.name, &since, cutoff)
                .await
            {
                Ok(count) => {
                    ingested += count;
                    consecutive_failures = 0;
                }
                Err(super::SyncError::Provider(e)) if is_connection_error(&e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        account_id = %account_id,
                        folder = %folder.name,
                        failures = consecutive_failures,
                        error = %e,
                        "connection failure during folder sync"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        account_id = %account_id,
                        folder = %folder.name,
                        error = %e,
                        "folder sync failed, continuing with next folder"
                    );
                }
            }
        }

        self.rebuild_threads(account_id, &progress).await?;
        report(&progress, SyncPhase::Done, folders.len(), folders.len());

        Ok(SyncOutcome {
            ingested,
            cursor: Some(Utc::now().to_rfc3339()),
        })
    }

    async fn delta_sync(&self, account_id: &AccountId, _cursor: &str) -> Result<SyncOutcome> {
        let folders: Vec<RemoteFolder> = self
            .client
            .list_folders()
            .await?
            .into_iter()
            .filter(RemoteFolder::is_syncable)
            .collect();

        let states: HashMap<String, FolderSyncState> = folder_sync::get_all(&self.db, account_id)
            .await?
            .into_iter()
            .map(|state| (state.folder.clone(), state))
            .collect();

        let since = compute_since_date(self.default_lookback_days, Utc::now());
        let cutoff = Utc::now() - Duration::days(i64::from(self.default_lookback_days) + 1);

        let mut consecutive_failures = 0u32;
        let mut ingested = 0;

        for (idx, folder) in folders.iter().enumerate() {
            if consecutive_failures >= CIRCUIT_BREAKER_MAX_FAILURES {
                tracing::warn!(
                    account_id = %account_id,
                    skipped = folders.len() - idx,
                    "circuit breaker tripped, abandoning remaining folders"
                );
                break;
            }

            if folder.exists == 0 {
                continue;
            }

            let result = match states.get(&folder.name) {
                Some(state) => {
                    self.sync_folder_delta(account_id, &folder.name, state, &since, cutoff)
                        .await
                }
                // A folder first seen after the initial sync.
                None => {
                    self.sync_folder_window(account_id, &folder.name, &since, cutoff)
                        .await
                }
            };

            match result {
                Ok(count) => {
                    ingested += count;
                    consecutive_failures = 0;
                }
                Err(super::SyncError::Provider(e)) if is_connection_error(&e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        account_id = %account_id,
                        folder = %folder.name,
                        failures = consecutive_failures,
                        error = %e,
                        "connection failure during folder delta sync"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        account_id = %account_id,
                        folder = %folder.name,
                        error = %e,
                        "folder delta sync failed, continuing with next folder"
                    );
                }
            }
        }

        if ingested > 0 {
            self.rebuild_threads(account_id, &None).await?;
        }

        Ok(SyncOutcome {
            ingested,
            cursor: Some(Utc::now().to_rfc3339()),
        })
    }
}

/// Converts a fetched remote message into the canonical cache form, pointing
/// at its placeholder thread.
fn to_message(account_id: &AccountId, folder: &str, remote: RemoteMessage) -> Message {
    let id = folder_message_id(account_id, folder, remote.uid);
    let snippet = snippet_or_fallback(remote.snippet, remote.body_text.as_deref());

    Message {
        thread_id: ThreadId(id.0.clone()),
        id,
        account_id: account_id.clone(),
        rfc_message_id: remote.rfc_message_id,
        in_reply_to: remote.in_reply_to,
        references: remote.references,
        from: remote.from,
        to: remote.to,
        subject: remote.subject,
        body_text: remote.body_text,
        snippet,
        date: remote.date,
        is_read: remote.is_read,
        is_starred: remote.is_starred,
        folder: Some(folder.to_string()),
        labels: labels_for_flags(folder, remote.is_read, remote.is_starred),
        list_unsubscribe: remote.list_unsubscribe,
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats a date in the protocol's `DD-Mon-YYYY` search format, without
/// zero padding.
pub fn format_search_date(date: NaiveDate) -> String {
    format!(
        "{}-{}-{}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

/// Computes the since-date for a lookback window with a one-day safety
/// margin.
pub fn compute_since_date(lookback_days: u32, now: DateTime<Utc>) -> String {
    let since = now.date_naive() - Duration::days(i64::from(lookback_days) + 1);
    format_search_date(since)
}
