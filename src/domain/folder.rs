//! Per-folder sync cursor state for folder-protocol accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Highest-seen UID and folder epoch for one account folder.
///
/// Created lazily on the first successful sync of a folder and updated after
/// every successful chunk. A UIDVALIDITY change invalidates every stored UID
/// for the folder, forcing a full re-scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSyncState {
    /// Account this state belongs to.
    pub account_id: AccountId,
    /// Folder path as reported by the provider.
    pub folder: String,
    /// Highest UID fetched so far.
    pub last_uid: u32,
    /// Folder epoch marker; a change invalidates `last_uid`.
    pub uid_validity: u32,
    /// When this state was last updated.
    pub updated_at: DateTime<Utc>,
}

impl FolderSyncState {
    /// Creates state after the first successful sync of a folder.
    pub fn new(account_id: AccountId, folder: impl Into<String>, last_uid: u32, uid_validity: u32) -> Self {
        Self {
            account_id,
            folder: folder.into(),
            last_uid,
            uid_validity,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the stored UIDs are still valid for the given epoch.
    pub fn is_valid_for(&self, uid_validity: u32) -> bool {
        self.uid_validity == uid_validity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_validity_change_invalidates() {
        let state = FolderSyncState::new(AccountId::from("acct-1"), "INBOX", 420, 7);
        assert!(state.is_valid_for(7));
        assert!(!state.is_valid_for(8));
    }
}
