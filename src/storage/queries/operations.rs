//! Offline operation queue persistence.
//!
//! Pending operations are processed in creation order; before every drain
//! the queue is compacted so redundant or mutually-cancelling edits never
//! reach the network.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::domain::{
    AccountId, OperationKind, OperationStatus, PendingOperation, BACKOFF_SCHEDULE_SECS,
};
use crate::storage::database::{Database, DatabaseError, Result};

/// Appends a pending operation and returns its generated id.
pub async fn enqueue(
    db: &Database,
    account_id: &AccountId,
    resource_id: &str,
    kind: OperationKind,
    max_retries: u32,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let account_id = account_id.clone();
    let resource_id = resource_id.to_string();
    let op_id = id.clone();

    db.with_conn(move |conn| {
        let params_json = serde_json::to_string(&kind)
            .map_err(|e| DatabaseError::InvalidRow(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO pending_operations (
                id, account_id, operation_type, resource_id, params, status,
                retry_count, max_retries, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7)
            "#,
            params![
                op_id,
                account_id.0,
                kind.type_name(),
                resource_id,
                params_json,
                max_retries,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await?;

    Ok(id)
}

/// Fetches up to `limit` oldest pending operations whose retry time elapsed.
pub async fn due_pending(db: &Database, limit: u32) -> Result<Vec<PendingOperation>> {
    let now = Utc::now().to_rfc3339();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account_id, operation_type, resource_id, params, status,
                   retry_count, max_retries, next_retry_at, error_message, created_at
            FROM pending_operations
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= ?1)
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![now, limit], row_to_operation)?;
        collect_operations(rows)
    })
    .await
}

/// Fetches all pending operations for a resource, in creation order.
pub async fn get_for_resource(
    db: &Database,
    account_id: &AccountId,
    resource_id: &str,
) -> Result<Vec<PendingOperation>> {
    let account_id = account_id.clone();
    let resource_id = resource_id.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account_id, operation_type, resource_id, params, status,
                   retry_count, max_retries, next_retry_at, error_message, created_at
            FROM pending_operations
            WHERE account_id = ?1 AND resource_id = ?2 AND status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;

        let rows = stmt.query_map(params![account_id.0, resource_id], row_to_operation)?;
        collect_operations(rows)
    })
    .await
}

/// Updates an operation's status and error message.
pub async fn set_status(
    db: &Database,
    id: &str,
    status: OperationStatus,
    error_message: Option<String>,
) -> Result<()> {
    let id = id.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE pending_operations SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![status.as_str(), error_message, id],
        )?;
        Ok(())
    })
    .await
}

/// Deletes an operation (after successful execution).
pub async fn delete(db: &Database, id: &str) -> Result<()> {
    let id = id.to_string();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM pending_operations WHERE id = ?1", [&id])?;
        Ok(())
    })
    .await
}

/// Records a failed attempt, scheduling the retry or failing terminally.
///
/// The retry delay follows the fixed backoff schedule indexed by
/// `min(retry_count - 1, 3)`; once the retry count reaches `max_retries`
/// the operation is marked failed.
pub async fn increment_retry(db: &Database, id: &str) -> Result<()> {
    let id = id.to_string();

    db.with_conn(move |conn| {
        let row: Option<(u32, u32)> = conn
            .query_row(
                "SELECT retry_count, max_retries FROM pending_operations WHERE id = ?1",
                [&id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((retry_count, max_retries)) = row else {
            return Ok(());
        };

        let new_count = retry_count + 1;
        if new_count >= max_retries {
            conn.execute(
                "UPDATE pending_operations SET status = 'failed', retry_count = ?1 WHERE id = ?2",
                params![new_count, id],
            )?;
            return Ok(());
        }

        let backoff_idx = std::cmp::min(new_count as usize - 1, BACKOFF_SCHEDULE_SECS.len() - 1);
        let next_retry_at = Utc::now() + Duration::seconds(BACKOFF_SCHEDULE_SECS[backoff_idx]);

        conn.execute(
            "UPDATE pending_operations SET retry_count = ?1, next_retry_at = ?2 WHERE id = ?3",
            params![new_count, next_retry_at.to_rfc3339(), id],
        )?;
        Ok(())
    })
    .await
}

/// Counts pending operations, optionally for one account.
pub async fn pending_count(db: &Database, account_id: Option<&AccountId>) -> Result<u32> {
    count_with_status(db, account_id, OperationStatus::Pending).await
}

/// Counts terminally failed operations, optionally for one account.
pub async fn failed_count(db: &Database, account_id: Option<&AccountId>) -> Result<u32> {
    count_with_status(db, account_id, OperationStatus::Failed).await
}

async fn count_with_status(
    db: &Database,
    account_id: Option<&AccountId>,
    status: OperationStatus,
) -> Result<u32> {
    let account_id = account_id.cloned();

    db.with_conn(move |conn| {
        let count: u32 = match account_id {
            Some(account_id) => conn.query_row(
                "SELECT COUNT(*) FROM pending_operations WHERE account_id = ?1 AND status = ?2",
                params![account_id.0, status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM pending_operations WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    })
    .await
}

/// Returns failed operations to the pending state with retries reset.
pub async fn retry_failed(db: &Database, account_id: Option<&AccountId>) -> Result<()> {
    let account_id = account_id.cloned();

    db.with_conn(move |conn| {
        let sql = "UPDATE pending_operations
                   SET status = 'pending', retry_count = 0, next_retry_at = NULL, error_message = NULL
                   WHERE status = 'failed'";
        match account_id {
            Some(account_id) => {
                conn.execute(&format!("{sql} AND account_id = ?1"), [&account_id.0])?;
            }
            None => {
                conn.execute(sql, [])?;
            }
        }
        Ok(())
    })
    .await
}

/// Removes failed operations, optionally for one account.
pub async fn clear_failed(db: &Database, account_id: Option<&AccountId>) -> Result<()> {
    let account_id = account_id.cloned();

    db.with_conn(move |conn| {
        match account_id {
            Some(account_id) => {
                conn.execute(
                    "DELETE FROM pending_operations WHERE status = 'failed' AND account_id = ?1",
                    [&account_id.0],
                )?;
            }
            None => {
                conn.execute("DELETE FROM pending_operations WHERE status = 'failed'", [])?;
            }
        }
        Ok(())
    })
    .await
}

/// Compacts the pending queue, returning the number of deleted operations.
///
/// Per `account:resource` group, in creation order: opposite-value toggle
/// pairs cancel, an add-label cancels against a later remove-label for the
/// same label, and repeated moves collapse to the most recent. Operations on
/// different resources are never reordered and no other kinds are merged.
/// Running compaction twice in a row is a no-op the second time.
pub async fn compact(db: &Database, account_id: Option<&AccountId>) -> Result<usize> {
    let ops = all_pending(db, account_id).await?;

    // Group by account:resource, preserving creation order within groups.
    let mut groups: HashMap<String, Vec<PendingOperation>> = HashMap::new();
    for op in ops {
        let key = format!("{}:{}", op.account_id.0, op.resource_id);
        groups.entry(key).or_default().push(op);
    }

    let mut to_delete: Vec<String> = Vec::new();

    for group in groups.values() {
        compact_toggles(group, "star", &mut to_delete);
        compact_toggles(group, "mark_read", &mut to_delete);
        compact_labels(group, &mut to_delete);
        compact_moves(group, &mut to_delete);
    }

    if to_delete.is_empty() {
        return Ok(0);
    }

    let deleted = to_delete.len();
    db.with_conn(move |conn| {
        let placeholders = to_delete
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");
        conn.execute(
            &format!("DELETE FROM pending_operations WHERE id IN ({placeholders})"),
            rusqlite::params_from_iter(to_delete),
        )?;
        Ok(())
    })
    .await?;

    Ok(deleted)
}

/// Cancels opposite-value toggle pairs, pairing oldest-with-next.
fn compact_toggles(group: &[PendingOperation], type_name: &str, to_delete: &mut Vec<String>) {
    let mut toggles: Vec<&PendingOperation> = group
        .iter()
        .filter(|op| op.kind.type_name() == type_name)
        .collect();

    while toggles.len() >= 2 {
        let a = toggles.remove(0);
        let b = toggles.remove(0);
        if a.kind.toggle_value() != b.kind.toggle_value() {
            to_delete.push(a.id.clone());
            to_delete.push(b.id.clone());
        }
    }
}

/// Cancels each add-label against the first later remove-label of the same label.
fn compact_labels(group: &[PendingOperation], to_delete: &mut Vec<String>) {
    let mut used_removes: Vec<usize> = Vec::new();

    for (add_idx, add) in group.iter().enumerate() {
        let OperationKind::AddLabel { label } = &add.kind else {
            continue;
        };

        let matched = group.iter().enumerate().skip(add_idx + 1).find(|(i, op)| {
            !used_removes.contains(i)
                && matches!(&op.kind, OperationKind::RemoveLabel { label: l } if l == label)
        });

        if let Some((remove_idx, remove)) = matched {
            used_removes.push(remove_idx);
            to_delete.push(add.id.clone());
            to_delete.push(remove.id.clone());
        }
    }
}

/// Collapses repeated moves on one resource to the most recent.
fn compact_moves(group: &[PendingOperation], to_delete: &mut Vec<String>) {
    let moves: Vec<&PendingOperation> = group
        .iter()
        .filter(|op| matches!(op.kind, OperationKind::MoveToFolder { .. }))
        .collect();

    if moves.len() > 1 {
        for op in &moves[..moves.len() - 1] {
            to_delete.push(op.id.clone());
        }
    }
}

async fn all_pending(
    db: &Database,
    account_id: Option<&AccountId>,
) -> Result<Vec<PendingOperation>> {
    let account_id = account_id.cloned();

    db.with_conn(move |conn| {
        let base = r#"
            SELECT id, account_id, operation_type, resource_id, params, status,
                   retry_count, max_retries, next_retry_at, error_message, created_at
            FROM pending_operations
            WHERE status = 'pending'
        "#;

        match account_id {
            Some(account_id) => {
                let mut stmt = conn.prepare(&format!(
                    "{base} AND account_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ))?;
                let rows = stmt.query_map([&account_id.0], row_to_operation)?;
                collect_operations(rows)
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("{base} ORDER BY created_at ASC, rowid ASC"))?;
                let rows = stmt.query_map([], row_to_operation)?;
                collect_operations(rows)
            }
        }
    })
    .await
}

type OperationRow = rusqlite::Result<Result<PendingOperation>>;

fn collect_operations(
    rows: impl Iterator<Item = OperationRow>,
) -> Result<Vec<PendingOperation>> {
    let mut ops = Vec::new();
    for row in rows {
        ops.push(row??);
    }
    Ok(ops)
}

fn row_to_operation(row: &Row<'_>) -> OperationRow {
    let params_json: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let next_retry_str: Option<String> = row.get(8)?;
    let created_str: String = row.get(10)?;

    let kind: OperationKind = match serde_json::from_str(&params_json) {
        Ok(kind) => kind,
        Err(e) => {
            return Ok(Err(DatabaseError::InvalidRow(format!(
                "bad operation params: {e}"
            ))))
        }
    };

    let Some(status) = OperationStatus::parse(&status_str) else {
        return Ok(Err(DatabaseError::InvalidRow(format!(
            "unknown operation status: {status_str}"
        ))));
    };

    let next_retry_at = next_retry_str.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    });
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Ok(PendingOperation {
        id: row.get(0)?,
        account_id: AccountId(row.get(1)?),
        kind,
        resource_id: row.get(3)?,
        status,
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        next_retry_at,
        error_message: row.get(9)?,
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, ProviderKind};
    use crate::storage::queries::accounts;

    async fn setup() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        let account = Account::new("acct-1", "test@example.com", ProviderKind::HistoryApi);
        accounts::upsert(&db, &account).await.unwrap();
        db
    }

    fn acct() -> AccountId {
        AccountId::from("acct-1")
    }

    #[tokio::test]
    async fn enqueue_and_fetch_due() {
        let db = setup().await;

        let id = enqueue(
            &db,
            &acct(),
            "thread-1",
            OperationKind::Star { starred: true },
            3,
        )
        .await
        .unwrap();

        let due = due_pending(&db, 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].kind, OperationKind::Star { starred: true });
        assert_eq!(due[0].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn due_respects_retry_time() {
        let db = setup().await;
        let id = enqueue(&db, &acct(), "thread-1", OperationKind::Archive, 3)
            .await
            .unwrap();

        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        db.with_conn(move |conn| {
            conn.execute(
                "UPDATE pending_operations SET next_retry_at = ?1 WHERE id = ?2",
                params![future, id],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let due = due_pending(&db, 50).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn due_preserves_creation_order() {
        let db = setup().await;
        let first = enqueue(&db, &acct(), "t1", OperationKind::Archive, 3)
            .await
            .unwrap();
        let second = enqueue(&db, &acct(), "t2", OperationKind::Trash, 3)
            .await
            .unwrap();

        let due = due_pending(&db, 50).await.unwrap();
        assert_eq!(due[0].id, first);
        assert_eq!(due[1].id, second);
    }

    #[tokio::test]
    async fn increment_retry_applies_backoff() {
        let db = setup().await;
        let id = enqueue(&db, &acct(), "thread-1", OperationKind::Archive, 5)
            .await
            .unwrap();

        increment_retry(&db, &id).await.unwrap();

        let ops = get_for_resource(&db, &acct(), "thread-1").await.unwrap();
        assert_eq!(ops[0].retry_count, 1);
        let delay = ops[0].next_retry_at.unwrap() - Utc::now();
        assert!(delay.num_seconds() > 50 && delay.num_seconds() <= 60);
    }

    #[tokio::test]
    async fn increment_retry_fails_terminally_at_max() {
        let db = setup().await;
        let id = enqueue(&db, &acct(), "thread-1", OperationKind::Archive, 2)
            .await
            .unwrap();

        increment_retry(&db, &id).await.unwrap();
        increment_retry(&db, &id).await.unwrap();

        assert_eq!(pending_count(&db, None).await.unwrap(), 0);
        assert_eq!(failed_count(&db, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_failed_resets_state() {
        let db = setup().await;
        let id = enqueue(&db, &acct(), "thread-1", OperationKind::Archive, 1)
            .await
            .unwrap();
        increment_retry(&db, &id).await.unwrap();
        assert_eq!(failed_count(&db, None).await.unwrap(), 1);

        retry_failed(&db, Some(&acct())).await.unwrap();
        assert_eq!(failed_count(&db, None).await.unwrap(), 0);

        let due = due_pending(&db, 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 0);
        assert!(due[0].next_retry_at.is_none());
    }

    #[tokio::test]
    async fn clear_failed_removes_rows() {
        let db = setup().await;
        let id = enqueue(&db, &acct(), "thread-1", OperationKind::Archive, 1)
            .await
            .unwrap();
        increment_retry(&db, &id).await.unwrap();

        clear_failed(&db, None).await.unwrap();
        assert_eq!(failed_count(&db, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compact_cancels_opposite_star_pair() {
        let db = setup().await;
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: false }, 3)
            .await
            .unwrap();

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(pending_count(&db, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compact_keeps_same_value_toggles() {
        let db = setup().await;
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(pending_count(&db, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn compact_ignores_toggles_on_different_resources() {
        let db = setup().await;
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();
        enqueue(&db, &acct(), "t2", OperationKind::Star { starred: false }, 3)
            .await
            .unwrap();

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn compact_cancels_add_remove_label_pair() {
        let db = setup().await;
        enqueue(
            &db,
            &acct(),
            "t1",
            OperationKind::AddLabel {
                label: "Work".to_string(),
            },
            3,
        )
        .await
        .unwrap();
        enqueue(
            &db,
            &acct(),
            "t1",
            OperationKind::RemoveLabel {
                label: "Work".to_string(),
            },
            3,
        )
        .await
        .unwrap();
        enqueue(
            &db,
            &acct(),
            "t1",
            OperationKind::AddLabel {
                label: "Personal".to_string(),
            },
            3,
        )
        .await
        .unwrap();

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = get_for_resource(&db, &acct(), "t1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind.label(), Some("Personal"));
    }

    #[tokio::test]
    async fn compact_does_not_cancel_remove_before_add() {
        let db = setup().await;
        enqueue(
            &db,
            &acct(),
            "t1",
            OperationKind::RemoveLabel {
                label: "Work".to_string(),
            },
            3,
        )
        .await
        .unwrap();
        enqueue(
            &db,
            &acct(),
            "t1",
            OperationKind::AddLabel {
                label: "Work".to_string(),
            },
            3,
        )
        .await
        .unwrap();

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 0, "remove-then-add is not redundant");
    }

    #[tokio::test]
    async fn compact_collapses_moves_to_latest() {
        let db = setup().await;
        for folder in ["Archive", "Work", "Personal"] {
            enqueue(
                &db,
                &acct(),
                "t1",
                OperationKind::MoveToFolder {
                    folder: folder.to_string(),
                },
                3,
            )
            .await
            .unwrap();
        }

        let deleted = compact(&db, None).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = get_for_resource(&db, &acct(), "t1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining[0].kind,
            OperationKind::MoveToFolder {
                folder: "Personal".to_string()
            }
        );
    }

    #[tokio::test]
    async fn compact_is_idempotent() {
        let db = setup().await;
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: false }, 3)
            .await
            .unwrap();
        enqueue(&db, &acct(), "t1", OperationKind::Star { starred: true }, 3)
            .await
            .unwrap();
        for folder in ["A", "B"] {
            enqueue(
                &db,
                &acct(),
                "t2",
                OperationKind::MoveToFolder {
                    folder: folder.to_string(),
                },
                3,
            )
            .await
            .unwrap();
        }

        let first = compact(&db, None).await.unwrap();
        assert!(first > 0);
        let after_first = due_pending(&db, 50).await.unwrap();

        let second = compact(&db, None).await.unwrap();
        assert_eq!(second, 0);
        let after_second = due_pending(&db, 50).await.unwrap();

        let ids_first: Vec<_> = after_first.iter().map(|op| &op.id).collect();
        let ids_second: Vec<_> = after_second.iter().map(|op| &op.id).collect();
        assert_eq!(ids_first, ids_second);
    }
}
