//! Narrow client interfaces to the remote mailbox providers.
//!
//! The sync engines and the queue executor only ever call these traits; the
//! concrete wire implementations (REST calls, IMAP sessions) live outside
//! this crate and are injected per account. Tests substitute scripted fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Address;

/// Result type alias for provider client operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors surfaced by provider clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// The stored history cursor is no longer valid on the server.
    ///
    /// The sync engine recovers by falling back to a full initial sync.
    #[error("sync cursor expired")]
    CursorExpired,

    /// Remote server error (5xx-equivalent).
    #[error("server error: {0}")]
    Server(String),

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-specific error.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Mutation primitives shared by every provider.
///
/// The offline queue executor dispatches queued user actions through these.
#[async_trait]
pub trait MailboxActions: Send + Sync {
    /// Applies a label to the resource.
    async fn apply_label(&self, resource_id: &str, label: &str) -> Result<()>;

    /// Removes a label from the resource.
    async fn remove_label(&self, resource_id: &str, label: &str) -> Result<()>;

    /// Marks the resource read or unread.
    async fn mark_read(&self, resource_id: &str, read: bool) -> Result<()>;

    /// Stars or unstars the resource.
    async fn star(&self, resource_id: &str, starred: bool) -> Result<()>;

    /// Archives the resource.
    async fn archive(&self, resource_id: &str) -> Result<()>;

    /// Moves the resource to trash.
    async fn trash(&self, resource_id: &str) -> Result<()>;

    /// Moves the resource to a folder.
    async fn move_to_folder(&self, resource_id: &str, folder: &str) -> Result<()>;

    /// Sends a raw RFC 5322 message, returning the provider-assigned id.
    async fn send_message(&self, raw: &[u8]) -> Result<String>;
}

/// A folder as reported by a folder-protocol server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFolder {
    /// Normalized folder path.
    pub name: String,
    /// Number of messages the server reports for the folder.
    pub exists: u32,
    /// True for folders that cannot be selected (namespace containers).
    pub no_select: bool,
}

impl RemoteFolder {
    /// Returns true if the folder should be included in sync.
    pub fn is_syncable(&self) -> bool {
        !self.no_select
    }
}

/// Result of a lightweight identifier search in one folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSearch {
    /// Matching message UIDs, ascending.
    pub uids: Vec<u32>,
    /// The folder's current UIDVALIDITY epoch.
    pub uid_validity: u32,
}

/// A full message fetched from a folder-protocol server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Server-assigned UID within the folder.
    pub uid: u32,
    /// RFC 5322 Message-ID header, if present.
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
    /// Plain-text body.
    pub body_text: Option<String>,
    /// Server-provided preview, if any.
    pub snippet: Option<String>,
    /// Date the message was sent.
    pub date: DateTime<Utc>,
    /// Whether the message is flagged seen.
    pub is_read: bool,
    /// Whether the message is flagged starred.
    pub is_starred: bool,
    /// List-Unsubscribe header value.
    pub list_unsubscribe: Option<String>,
}

/// Client for the stateful folder/UID protocol.
#[async_trait]
pub trait FolderClient: MailboxActions {
    /// Lists all folders on the server.
    async fn list_folders(&self) -> Result<Vec<RemoteFolder>>;

    /// Searches one folder for message UIDs received since the given date.
    ///
    /// `since` uses the protocol's `DD-Mon-YYYY` search date format.
    async fn search_ids(&self, folder: &str, since: &str) -> Result<FolderSearch>;

    /// Searches one folder for message UIDs above the given UID.
    async fn search_ids_above(&self, folder: &str, last_uid: u32) -> Result<FolderSearch>;

    /// Fetches full messages for the given UIDs.
    async fn fetch_by_ids(&self, folder: &str, uids: &[u32]) -> Result<Vec<RemoteMessage>>;
}

/// A message delivered by the history-based REST API.
///
/// Unlike the folder protocol, the server assigns both the message id and
/// its conversation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Provider-assigned message id.
    pub id: String,
    /// Provider-assigned conversation id.
    pub thread_id: String,
    /// Sender address.
    pub from: Address,
    /// Recipient addresses.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: Option<String>,
    /// Plain-text body, if fetched.
    pub body_text: Option<String>,
    /// Short preview of the body.
    pub snippet: Option<String>,
    /// Date the message was sent.
    pub date: DateTime<Utc>,
    /// Labels applied by the provider.
    pub labels: Vec<String>,
    /// Whether the message has been read.
    pub is_read: bool,
    /// Whether the message is starred.
    pub is_starred: bool,
    /// List-Unsubscribe header value.
    pub list_unsubscribe: Option<String>,
}

/// A metadata change reported by the history API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryUpdate {
    /// The affected message.
    pub message_id: String,
    /// New read status, if changed.
    pub is_read: Option<bool>,
    /// New starred status, if changed.
    pub is_starred: Option<bool>,
    /// Full replacement label set, if changed.
    pub labels: Option<Vec<String>>,
}

/// Changes since a history cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDelta {
    /// Newly received messages.
    pub added: Vec<HistoryMessage>,
    /// Metadata changes to known messages.
    pub updated: Vec<HistoryUpdate>,
    /// Ids of deleted messages.
    pub deleted: Vec<String>,
    /// Cursor to store for the next delta sync.
    pub new_cursor: String,
}

/// Client for the history-based REST API.
#[async_trait]
pub trait HistoryClient: MailboxActions {
    /// Returns the server's current history cursor.
    async fn current_cursor(&self) -> Result<String>;

    /// Fetches messages received within the lookback window.
    async fn list_recent(&self, lookback_days: u32) -> Result<Vec<HistoryMessage>>;

    /// Fetches changes after the given cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::CursorExpired`] when the server no longer
    /// retains history back to the cursor.
    async fn list_history(&self, cursor: &str) -> Result<HistoryDelta>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_select_folders_are_not_syncable() {
        let container = RemoteFolder {
            name: "[Mail]".to_string(),
            exists: 0,
            no_select: true,
        };
        assert!(!container.is_syncable());

        let inbox = RemoteFolder {
            name: "INBOX".to_string(),
            exists: 12,
            no_select: false,
        };
        assert!(inbox.is_syncable());
    }

    #[test]
    fn provider_error_display() {
        let auth = ProviderError::Authentication("token expired".to_string());
        assert_eq!(auth.to_string(), "authentication failed: token expired");

        let rate = ProviderError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert!(rate.to_string().contains("rate limit"));

        assert_eq!(
            ProviderError::CursorExpired.to_string(),
            "sync cursor expired"
        );
    }

    #[test]
    fn folder_search_serialization() {
        let search = FolderSearch {
            uids: vec![1, 5, 9],
            uid_validity: 77,
        };
        let json = serde_json::to_string(&search).unwrap();
        let parsed: FolderSearch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.uids, vec![1, 5, 9]);
        assert_eq!(parsed.uid_validity, 77);
    }
}
