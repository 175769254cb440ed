//! Per-folder sync cursor queries for folder-protocol accounts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{AccountId, FolderSyncState};
use crate::storage::database::{Database, Result};

/// Inserts or updates a folder's sync state using a borrowed connection.
///
/// Called after every successful chunk so a later failure never loses the
/// progress already committed.
pub fn upsert_in(conn: &Connection, state: &FolderSyncState) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO folder_sync_state (account_id, folder, last_uid, uid_validity, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(account_id, folder) DO UPDATE SET
            last_uid = excluded.last_uid,
            uid_validity = excluded.uid_validity,
            updated_at = excluded.updated_at
        "#,
        params![
            state.account_id.0,
            state.folder,
            state.last_uid,
            state.uid_validity,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Inserts or updates a folder's sync state.
pub async fn upsert(db: &Database, state: &FolderSyncState) -> Result<()> {
    let state = state.clone();
    db.with_conn(move |conn| upsert_in(conn, &state)).await
}

/// Retrieves the sync state for one folder.
pub async fn get(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
) -> Result<Option<FolderSyncState>> {
    let account_id = account_id.clone();
    let folder = folder.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, folder, last_uid, uid_validity, updated_at
            FROM folder_sync_state
            WHERE account_id = ?1 AND folder = ?2
            "#,
        )?;

        let result = stmt
            .query_row(params![account_id.0, folder], row_to_state)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves sync state for all of an account's folders.
pub async fn get_all(db: &Database, account_id: &AccountId) -> Result<Vec<FolderSyncState>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, folder, last_uid, uid_validity, updated_at
            FROM folder_sync_state
            WHERE account_id = ?1
            ORDER BY folder ASC
            "#,
        )?;

        let rows = stmt.query_map([&account_id.0], row_to_state)?;
        let states: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(states?)
    })
    .await
}

/// Clears all folder cursors for an account, forcing full re-scans.
pub async fn clear_all(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "DELETE FROM folder_sync_state WHERE account_id = ?1",
            [&account_id.0],
        )?;
        Ok(())
    })
    .await
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<FolderSyncState> {
    let updated_str: String = row.get(4)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(FolderSyncState {
        account_id: AccountId(row.get(0)?),
        folder: row.get(1)?,
        last_uid: row.get(2)?,
        uid_validity: row.get(3)?,
        updated_at,
    })
}
