//! Thread domain types.
//!
//! Represents email threads (conversations) which group related messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Message, ThreadId};

/// A conversation grouping one or more messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Unique identifier for this thread.
    pub id: ThreadId,
    /// Account this thread belongs to.
    pub account_id: AccountId,
    /// Thread subject (from the first message).
    pub subject: Option<String>,
    /// Short preview of the latest message.
    pub snippet: String,
    /// Participant email addresses.
    pub participants: Vec<String>,
    /// Date of the most recent message.
    pub last_message_date: DateTime<Utc>,
    /// Total number of messages in the thread.
    pub message_count: u32,
    /// Number of unread messages.
    pub unread_count: u32,
    /// Whether any message in the thread is starred.
    pub is_starred: bool,
    /// Union of the labels on the thread's messages.
    pub labels: Vec<String>,
}

impl Thread {
    /// Builds the temporary self-referential thread written before a message
    /// row so the thread foreign key is satisfied during ingestion.
    ///
    /// The placeholder's id is the message's own id; the threading pass later
    /// replaces it with a real conversation row.
    pub fn placeholder(message: &Message) -> Self {
        Self {
            id: ThreadId(message.id.0.clone()),
            account_id: message.account_id.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            participants: vec![message.from.email.clone()],
            last_message_date: message.date,
            message_count: 1,
            unread_count: if message.is_read { 0 } else { 1 },
            is_starred: message.is_starred,
            labels: message.labels.clone(),
        }
    }

    /// Returns true if the thread has unread messages.
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}
