//! Message domain types.
//!
//! A [`Message`] is the canonical ingested form of a single email,
//! independent of which provider it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Address, MessageId, ThreadId};

const SNIPPET_MAX_LEN: usize = 120;

/// A single ingested email message.
///
/// Invariant: `thread_id` always references an existing thread row. During
/// ingestion this is satisfied with a placeholder thread whose id equals the
/// message's own id, repointed once conversation grouping has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier in the local cache.
    pub id: MessageId,
    /// Account this message belongs to.
    pub account_id: AccountId,
    /// Thread this message belongs to.
    pub thread_id: ThreadId,
    /// RFC 5322 Message-ID header, if the message carried one.
    pub rfc_message_id: Option<String>,
    /// In-Reply-To header value.
    pub in_reply_to: Option<String>,
    /// References header values, oldest first.
    pub references: Vec<String>,
    /// Sender address.
    pub from: Address,
    /// Recipient addresses.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: Option<String>,
    /// Plain-text body, if fetched.
    pub body_text: Option<String>,
    /// Short preview of the body.
    pub snippet: String,
    /// Date the message was sent.
    pub date: DateTime<Utc>,
    /// Whether the message has been read.
    pub is_read: bool,
    /// Whether the message is starred/flagged.
    pub is_starred: bool,
    /// Folder the message was fetched from (folder-protocol accounts).
    pub folder: Option<String>,
    /// Labels applied to this message, including synthesized
    /// `UNREAD`/`STARRED` entries.
    pub labels: Vec<String>,
    /// List-Unsubscribe header value, used by categorization.
    pub list_unsubscribe: Option<String>,
}

impl Message {
    /// Returns true while the message still points at its placeholder thread.
    pub fn has_placeholder_thread(&self) -> bool {
        self.thread_id.0 == self.id.0
    }

    /// Message-ID used for threading; synthesizes a stable value when the
    /// original message carried none.
    pub fn threading_id(&self) -> String {
        match &self.rfc_message_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("synthetic-{}@keel.local", self.id.0),
        }
    }
}

/// Builds the stable cache id for a message fetched over the folder protocol.
pub fn folder_message_id(account_id: &AccountId, folder: &str, uid: u32) -> MessageId {
    MessageId(format!("imap-{}-{}-{}", account_id.0, folder, uid))
}

/// Derives a snippet from the body when the provider supplied none.
pub fn snippet_or_fallback(snippet: Option<String>, body_text: Option<&str>) -> String {
    if let Some(s) = snippet {
        return s;
    }
    match body_text {
        Some(body) => body.chars().take(SNIPPET_MAX_LEN).collect(),
        None => String::new(),
    }
}

/// Synthesizes the label set for a message from its folder and flags.
///
/// Folder-protocol servers track read/starred as flags rather than labels;
/// the cache represents both uniformly as labels.
pub fn labels_for_flags(folder_label: &str, is_read: bool, is_starred: bool) -> Vec<String> {
    let mut labels = vec![folder_label.to_string()];
    if !is_read {
        labels.push("UNREAD".to_string());
    }
    if is_starred {
        labels.push("STARRED".to_string());
    }
    labels
}
