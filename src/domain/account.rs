//! Account domain types.
//!
//! Represents configured email accounts and their sync state. Secret
//! credential material never lives on this struct; it is stored in the
//! system keychain referenced by account ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// An email account configured in the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: AccountId,
    /// Email address for this account.
    pub email: String,
    /// Display name shown in the UI.
    pub display_name: Option<String>,
    /// Kind of remote provider backing this account.
    pub provider_kind: ProviderKind,
    /// Opaque sync cursor from the last completed sync.
    ///
    /// `None` means the account has never completed an initial sync.
    pub sync_cursor: Option<String>,
    /// Whether automatic sync is enabled.
    pub sync_enabled: bool,
    /// When this account was added.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new account that has never been synced.
    pub fn new(
        id: impl Into<AccountId>,
        email: impl Into<String>,
        provider_kind: ProviderKind,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
            provider_kind,
            sync_cursor: None,
            sync_enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Returns true if this account has completed an initial sync.
    pub fn has_synced(&self) -> bool {
        self.sync_cursor.is_some()
    }
}

/// Kind of remote provider backing an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// REST API with a single global history cursor.
    HistoryApi,
    /// Stateful folder/UID protocol with per-folder cursors.
    FolderProtocol,
    /// Calendar-only account; email sync is skipped entirely.
    CalendarOnly,
}

impl ProviderKind {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::HistoryApi => "history_api",
            ProviderKind::FolderProtocol => "folder_protocol",
            ProviderKind::CalendarOnly => "calendar_only",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "history_api" => Some(ProviderKind::HistoryApi),
            "folder_protocol" => Some(ProviderKind::FolderProtocol),
            "calendar_only" => Some(ProviderKind::CalendarOnly),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_has_no_cursor() {
        let account = Account::new("acct-1", "test@example.com", ProviderKind::FolderProtocol);
        assert!(!account.has_synced());
        assert!(account.sync_enabled);
    }

    #[test]
    fn provider_kind_round_trips() {
        for kind in [
            ProviderKind::HistoryApi,
            ProviderKind::FolderProtocol,
            ProviderKind::CalendarOnly,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("pop3"), None);
    }

    #[test]
    fn account_serialization() {
        let mut account = Account::new("acct-1", "test@example.com", ProviderKind::HistoryApi);
        account.sync_cursor = Some("12345".to_string());

        let json = serde_json::to_string(&account).unwrap();
        let deserialized: Account = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.email, "test@example.com");
        assert_eq!(deserialized.sync_cursor, Some("12345".to_string()));
        assert_eq!(deserialized.provider_kind, ProviderKind::HistoryApi);
    }
}
