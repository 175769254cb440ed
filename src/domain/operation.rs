//! Pending offline operations.
//!
//! A [`PendingOperation`] is a durable record of a user action awaiting
//! execution against the remote provider. The operation kind is a tagged
//! enum so the queue executor dispatches exhaustively instead of switching
//! on strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Retry delays in seconds, indexed by `min(retry_count - 1, 3)`.
pub const BACKOFF_SCHEDULE_SECS: [i64; 4] = [60, 300, 900, 3600];

/// A user action queued for eventual remote execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique identifier for this operation.
    pub id: String,
    /// Account the operation targets.
    pub account_id: AccountId,
    /// The action and its typed parameters.
    pub kind: OperationKind,
    /// Remote resource (thread or message id) the action applies to.
    pub resource_id: String,
    /// Current queue status.
    pub status: OperationStatus,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Attempts allowed before the operation is marked failed.
    pub max_retries: u32,
    /// Earliest time the next attempt may run; `None` means immediately.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Message from the most recent failure.
    pub error_message: Option<String>,
    /// When the operation was enqueued.
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Returns true if the operation is due for execution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending
            && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Queue status of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to run.
    Pending,
    /// Currently being executed.
    Executing,
    /// Terminally failed; excluded from drains until retried or cleared.
    Failed,
}

impl OperationStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Executing => "executing",
            OperationStatus::Failed => "failed",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OperationStatus::Pending),
            "executing" => Some(OperationStatus::Executing),
            "failed" => Some(OperationStatus::Failed),
            _ => None,
        }
    }
}

/// The action a queued operation performs, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Star or unstar the resource.
    Star { starred: bool },
    /// Mark the resource read or unread.
    MarkRead { read: bool },
    /// Apply a label.
    AddLabel { label: String },
    /// Remove a label.
    RemoveLabel { label: String },
    /// Move the resource to a folder.
    MoveToFolder { folder: String },
    /// Archive the resource.
    Archive,
    /// Move the resource to trash.
    Trash,
    /// Send a raw RFC 5322 message.
    Send { raw: String },
}

impl OperationKind {
    /// Discriminant stored in its own column for compaction queries.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::Star { .. } => "star",
            OperationKind::MarkRead { .. } => "mark_read",
            OperationKind::AddLabel { .. } => "add_label",
            OperationKind::RemoveLabel { .. } => "remove_label",
            OperationKind::MoveToFolder { .. } => "move_to_folder",
            OperationKind::Archive => "archive",
            OperationKind::Trash => "trash",
            OperationKind::Send { .. } => "send",
        }
    }

    /// The boolean payload of a toggle-style operation (`Star`, `MarkRead`).
    ///
    /// Compaction cancels two same-type toggles with opposite values.
    pub fn toggle_value(&self) -> Option<bool> {
        match self {
            OperationKind::Star { starred } => Some(*starred),
            OperationKind::MarkRead { read } => Some(*read),
            _ => None,
        }
    }

    /// The label payload of a label operation.
    pub fn label(&self) -> Option<&str> {
        match self {
            OperationKind::AddLabel { label } | OperationKind::RemoveLabel { label } => {
                Some(label)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_op(kind: OperationKind) -> PendingOperation {
        PendingOperation {
            id: "op-1".to_string(),
            account_id: AccountId::from("acct-1"),
            kind,
            resource_id: "thread-1".to_string(),
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn kind_serialization_is_tagged() {
        let kind = OperationKind::Star { starred: true };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"star\""));

        let parsed: OperationKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, kind);
    }

    #[test]
    fn type_names_are_stable() {
        assert_eq!(OperationKind::Star { starred: false }.type_name(), "star");
        assert_eq!(OperationKind::MarkRead { read: true }.type_name(), "mark_read");
        assert_eq!(
            OperationKind::MoveToFolder {
                folder: "Archive".to_string()
            }
            .type_name(),
            "move_to_folder"
        );
    }

    #[test]
    fn toggle_value_only_for_toggles() {
        assert_eq!(
            OperationKind::Star { starred: true }.toggle_value(),
            Some(true)
        );
        assert_eq!(
            OperationKind::MarkRead { read: false }.toggle_value(),
            Some(false)
        );
        assert_eq!(OperationKind::Archive.toggle_value(), None);
    }

    #[test]
    fn label_accessor() {
        let add = OperationKind::AddLabel {
            label: "Work".to_string(),
        };
        assert_eq!(add.label(), Some("Work"));
        assert_eq!(OperationKind::Trash.label(), None);
    }

    #[test]
    fn due_when_no_retry_time() {
        let op = make_op(OperationKind::Archive);
        assert!(op.is_due(Utc::now()));
    }

    #[test]
    fn not_due_before_retry_time() {
        let mut op = make_op(OperationKind::Archive);
        op.next_retry_at = Some(Utc::now() + Duration::minutes(5));
        assert!(!op.is_due(Utc::now()));
    }

    #[test]
    fn failed_is_never_due() {
        let mut op = make_op(OperationKind::Archive);
        op.status = OperationStatus::Failed;
        assert!(!op.is_due(Utc::now()));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Executing,
            OperationStatus::Failed,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OperationStatus::parse("done"), None);
    }
}
