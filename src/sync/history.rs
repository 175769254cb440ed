//! Sync engine for the history-cursor REST API.
//!
//! The provider assigns both message and conversation ids, so ingestion can
//! write real thread rows directly: a seed thread row goes in before each
//! batch's messages to satisfy the foreign key, then the rows are refreshed
//! from the stored messages. An expired cursor silently falls back to a full
//! initial sync.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{report, ProgressCallback, Result, SyncEngine, SyncOutcome, SyncPhase};
use crate::domain::{snippet_or_fallback, AccountId, Message, MessageId, Thread, ThreadId};
use crate::providers::{HistoryClient, HistoryMessage, ProviderError};
use crate::services::categorizer::categorize;
use crate::storage::queries::{categories, messages, threads};
use crate::storage::Database;

/// Messages stored per ingestion transaction.
const INGEST_BATCH_SIZE: usize = 100;

/// Sync engine for history-API accounts.
pub struct HistorySyncEngine {
    db: Database,
    client: Arc<dyn HistoryClient>,
    default_lookback_days: u32,
}

impl HistorySyncEngine {
    /// Creates an engine for one account's client.
    pub fn new(db: Database, client: Arc<dyn HistoryClient>, default_lookback_days: u32) -> Self {
        Self {
            db,
            client,
            default_lookback_days,
        }
    }

    /// Stores a batch of provider messages in one transaction and
    /// categorizes their conversations.
    async fn ingest_batch(&self, account_id: &AccountId, batch: Vec<HistoryMessage>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let account_id = account_id.clone();
        self.db
            .transaction(move |tx| {
                let mut seeded: HashSet<String> = HashSet::new();
                for remote in &batch {
                    let message = to_message(&account_id, remote.clone());

                    // Seed the thread row before its first message of the
                    // batch; the refresh below fills in real aggregates.
                    if seeded.insert(message.thread_id.0.clone()) {
                        let mut seed = Thread::placeholder(&message);
                        seed.id = message.thread_id.clone();
                        threads::upsert_in(tx, &seed)?;
                    }
                    messages::upsert_in(tx, &message)?;
                }

                for thread_id in &seeded {
                    let thread_id = ThreadId(thread_id.clone());
                    threads::refresh_in(tx, &account_id, &thread_id)?;
                }

                for remote in &batch {
                    let category = categorize(
                        &remote.labels,
                        Some(&remote.from.email),
                        remote.list_unsubscribe.as_deref(),
                    );
                    categories::set_from_rules_in(
                        tx,
                        &account_id,
                        &ThreadId(remote.thread_id.clone()),
                        category,
                    )?;
                }

                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Applies a metadata change reported by the history API.
    async fn apply_update(
        &self,
        account_id: &AccountId,
        update: &crate::providers::HistoryUpdate,
    ) -> Result<()> {
        let message_id = MessageId(update.message_id.clone());
        let Some(existing) = messages::get_by_id(&self.db, &message_id).await? else {
            // A change for a message outside the lookback window.
            return Ok(());
        };

        messages::apply_update(
            &self.db,
            &message_id,
            update.is_read,
            update.is_starred,
            update.labels.clone(),
        )
        .await?;

        let account_id = account_id.clone();
        let thread_id = existing.thread_id.clone();
        self.db
            .with_conn(move |conn| threads::refresh_in(conn, &account_id, &thread_id))
            .await?;

        Ok(())
    }

    /// Removes a deleted message and any thread it leaves empty.
    async fn apply_delete(&self, account_id: &AccountId, message_id: &str) -> Result<()> {
        let message_id = MessageId(message_id.to_string());
        let Some(existing) = messages::get_by_id(&self.db, &message_id).await? else {
            return Ok(());
        };

        messages::delete(&self.db, &message_id).await?;

        let account_id = account_id.clone();
        let thread_id = existing.thread_id.clone();
        self.db
            .with_conn(move |conn| {
                threads::delete_orphans_in(conn, &account_id)?;
                // The thread may still have other messages.
                threads::refresh_in(conn, &account_id, &thread_id)?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SyncEngine for HistorySyncEngine {
    async fn initial_sync(
        &self,
        account_id: &AccountId,
        lookback_days: u32,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome> {
        report(&progress, SyncPhase::Messages, 0, 0);

        let recent = self.client.list_recent(lookback_days).await?;
        let total = recent.len();
        let mut stored = 0;

        for batch in recent.chunks(INGEST_BATCH_SIZE) {
            self.ingest_batch(account_id, batch.to_vec()).await?;
            stored += batch.len();
            report(&progress, SyncPhase::Storing, stored, total);
        }

        let cursor = self.client.current_cursor().await?;
        report(&progress, SyncPhase::Done, total, total);

        Ok(SyncOutcome {
            ingested: total,
            cursor: Some(cursor),
        })
    }

    async fn delta_sync(&self, account_id: &AccountId, cursor: &str) -> Result<SyncOutcome> {
        let delta = match self.client.list_history(cursor).await {
            Ok(delta) => delta,
            Err(ProviderError::CursorExpired) => {
                // The server no longer retains history back to our cursor;
                // recover with a full re-download instead of surfacing an
                // error.
                tracing::info!(
                    account_id = %account_id,
                    "history cursor expired, falling back to initial sync"
                );
                return self
                    .initial_sync(account_id, self.default_lookback_days, None)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        let ingested = delta.added.len();
        for batch in delta.added.chunks(INGEST_BATCH_SIZE) {
            self.ingest_batch(account_id, batch.to_vec()).await?;
        }

        for update in &delta.updated {
            self.apply_update(account_id, update).await?;
        }

        for deleted in &delta.deleted {
            self.apply_delete(account_id, deleted).await?;
        }

        Ok(SyncOutcome {
            ingested,
            cursor: Some(delta.new_cursor),
        })
    }
}

/// Converts a history-API message into the canonical cache form.
fn to_message(account_id: &AccountId, remote: HistoryMessage) -> Message {
    let snippet = snippet_or_fallback(remote.snippet, remote.body_text.as_deref());

    Message {
        id: MessageId(remote.id),
        account_id: account_id.clone(),
        thread_id: ThreadId(remote.thread_id),
        rfc_message_id: None,
        in_reply_to: None,
        references: vec![],
        from: remote.from,
        to: remote.to,
        subject: remote.subject,
        body_text: remote.body_text,
        snippet,
        date: remote.date,
        is_read: remote.is_read,
        is_starred: remote.is_starred,
        folder: None,
        labels: remote.labels,
        list_unsubscribe: remote.list_unsubscribe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Address;
    use chrono::Utc;

    #[test]
    fn to_message_keeps_provider_thread_id() {
        let remote = HistoryMessage {
            id: "m-1".to_string(),
            thread_id: "t-1".to_string(),
            from: Address::new("sender@example.com"),
            to: vec![],
            subject: Some("Hi".to_string()),
            body_text: Some("Body".to_string()),
            snippet: None,
            date: Utc::now(),
            labels: vec!["INBOX".to_string()],
            is_read: true,
            is_starred: false,
            list_unsubscribe: None,
        };

        let message = to_message(&AccountId::from("acct-1"), remote);

        assert_eq!(message.id.0, "m-1");
        assert_eq!(message.thread_id.0, "t-1");
        assert!(!message.has_placeholder_thread());
        assert_eq!(message.snippet, "Body");
    }
}
